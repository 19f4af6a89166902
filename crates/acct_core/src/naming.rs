//! CSV table file names: `{filter-name}_{Table}_{tag}.csv`.

use core::fmt;
use std::path::Path;

use crate::errors::CoreError;
use crate::period::TimeWindow;
use crate::table::AggTable;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableFileName {
    /// Human filter name, spaces allowed (e.g. `OSG schedd job history`).
    pub filter_name: String,
    pub table: AggTable,
    /// Window tag, see [`TimeWindow::csv_tag`].
    pub tag: String,
}

impl TableFileName {
    pub fn new(filter_name: &str, table: AggTable, window: &TimeWindow) -> Self {
        Self { filter_name: filter_name.to_string(), table, tag: window.csv_tag() }
    }

    /// Parse from a path or bare stem; the `.csv` extension is optional.
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| CoreError::InvalidFileName(path.display().to_string()))?;

        let mut parts = stem.splitn(3, '_');
        let (Some(name), Some(table), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CoreError::InvalidFileName(stem.to_string()));
        };
        if name.is_empty() || tag.is_empty() {
            return Err(CoreError::InvalidFileName(stem.to_string()));
        }

        Ok(Self {
            filter_name: name.replace('-', " "),
            table: table.parse()?,
            tag: tag.to_string(),
        })
    }

    /// Filter name as it appears in the file stem, dashes for spaces.
    pub fn stem_name(&self) -> String {
        self.filter_name.replace(' ', "-")
    }

    /// Leading tag component: the period for fixed windows.
    pub fn tag_head(&self) -> &str {
        self.tag.split('_').next().unwrap_or(&self.tag)
    }

    /// Trailing tag component: the start date for fixed windows.
    pub fn tag_tail(&self) -> &str {
        self.tag.split('_').nth(1).unwrap_or("")
    }
}

impl fmt::Display for TableFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}.csv", self.stem_name(), self.table, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::ReportPeriod;

    #[test]
    fn formats_with_dashes() {
        let w = TimeWindow::new(1710374400, 1710460800, ReportPeriod::Daily);
        let n = TableFileName::new("OSG schedd job history", AggTable::Users, &w);
        assert_eq!(n.to_string(), "OSG-schedd-job-history_Users_daily_2024-03-14.csv");
    }

    #[test]
    fn parses_back_from_path() {
        let n = TableFileName::parse("csv/OSG-schedd-job-history_Schedds_weekly_2024-03-07.csv")
            .unwrap();
        assert_eq!(n.filter_name, "OSG schedd job history");
        assert_eq!(n.stem_name(), "OSG-schedd-job-history");
        assert_eq!(n.table, AggTable::Schedds);
        assert_eq!(n.tag, "weekly_2024-03-07");
        assert_eq!(n.tag_head(), "weekly");
        assert_eq!(n.tag_tail(), "2024-03-07");
    }

    #[test]
    fn rejects_short_names() {
        assert!(TableFileName::parse("only_two.csv").is_err());
        assert!(TableFileName::parse("a_Bogus_tag.csv").is_err());
    }
}
