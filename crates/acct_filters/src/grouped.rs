//! Grouped ads and the shared merge step.

use std::collections::BTreeMap;
use std::rc::Rc;

use acct_core::{AggTable, Cell, ColumnSet, JobAd, Table, TOTAL};

/// Group name → ads kept for that group.
pub type Groups = BTreeMap<String, Vec<Rc<JobAd>>>;

/// Per table, the groups an ad was filed under. An ad is stored once and
/// shared by every table it belongs to.
#[derive(Clone, Debug, Default)]
pub struct GroupedAds {
    tables: BTreeMap<AggTable, Groups>,
}

impl GroupedAds {
    pub fn new() -> Self {
        Self::default()
    }

    /// File one ad under a group in each of the given tables.
    pub fn add<G>(&mut self, ad: &JobAd, memberships: impl IntoIterator<Item = (AggTable, G)>)
    where
        G: Into<String>,
    {
        let shared = Rc::new(ad.clone());
        for (table, group) in memberships {
            self.tables.entry(table).or_default().entry(group.into()).or_default().push(Rc::clone(&shared));
        }
    }

    pub fn groups(&self, table: AggTable) -> Option<&Groups> {
        self.tables.get(&table)
    }

    pub fn counts(&self) -> BTreeMap<AggTable, BTreeMap<String, usize>> {
        self.tables
            .iter()
            .map(|(t, g)| (*t, g.iter().map(|(k, v)| (k.clone(), v.len())).collect()))
            .collect()
    }
}

/// Column name → value for one merged row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row(BTreeMap<String, Cell>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &str, value: impl Into<Cell>) -> &mut Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.0.get(column)
    }

    /// Cells in `header` order; columns the row never set are blank.
    fn into_cells(self, header: &[String]) -> Vec<Cell> {
        header
            .iter()
            .map(|h| {
                self.0.get(h).cloned().unwrap_or_else(|| {
                    tracing::debug!(column = %h, "column not computed for row");
                    Cell::Blank
                })
            })
            .collect()
    }
}

/// Merge one table of grouped ads.
///
/// Column 0 is the table's singular name holding the group. Empty groups are
/// skipped. With `with_total`, a `TOTAL` row computed over every ad of the
/// table comes first. The remaining rows are sorted descending by
/// `sort_col`; sorting happens before any header rename by the caller.
pub fn merge_grouped<F>(
    table: AggTable,
    groups: Option<&Groups>,
    columns: &ColumnSet,
    sort_col: Option<&str>,
    with_total: bool,
    compute_row: F,
) -> Table
where
    F: Fn(&str, &[&JobAd]) -> Row,
{
    let mut header = vec![table.singular().to_string()];
    header.extend(columns.names());
    let mut out = Table::new(header);

    let Some(groups) = groups else {
        return out;
    };

    for (name, ads) in groups.iter().filter(|(_, ads)| !ads.is_empty()) {
        let refs: Vec<&JobAd> = ads.iter().map(|a| &**a).collect();
        let mut row = compute_row(name, &refs);
        row.set(&out.header[0], Cell::text(name.as_str()));
        out.rows.push(row.into_cells(&out.header));
    }

    if let Some(col) = sort_col {
        out.sort_desc_by(col);
    }

    if with_total && !out.rows.is_empty() {
        let all: Vec<&JobAd> = groups.values().flatten().map(|a| &**a).collect();
        let mut row = compute_row(TOTAL, &all);
        row.set(&out.header[0], Cell::text(TOTAL));
        let cells = row.into_cells(&out.header);
        out.rows.insert(0, cells);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ad(user: &str, secs: f64) -> JobAd {
        JobAd::from_value(&json!({"User": user, "RemoteWallClockTime": secs})).unwrap()
    }

    fn hours(_: &str, ads: &[&JobAd]) -> Row {
        let mut r = Row::new();
        r.set("Jobs", ads.len());
        r.set("Hours", ads.iter().filter_map(|a| a.remote_wall_clock_time).sum::<f64>() / 3600.0);
        r
    }

    #[test]
    fn total_first_then_descending() {
        let mut g = GroupedAds::new();
        g.add(&ad("a", 3600.0), [(AggTable::Users, "a")]);
        g.add(&ad("b", 7200.0), [(AggTable::Users, "b")]);
        g.add(&ad("b", 3600.0), [(AggTable::Users, "b")]);
        g.add(&ad("c", 5400.0), [(AggTable::Users, "c")]);

        let cols = ColumnSet::from([(10, "Hours"), (20, "Jobs")]);
        let t = merge_grouped(AggTable::Users, g.groups(AggTable::Users), &cols, Some("Hours"), true, hours);

        assert_eq!(t.header, vec!["User", "Hours", "Jobs"]);
        let names: Vec<_> = t.rows.iter().map(|r| r[0].to_string()).collect();
        assert_eq!(names, vec!["TOTAL", "b", "c", "a"]);
        assert_eq!(t.rows[0][2], Cell::Int(4));
        assert_eq!(t.rows[1][1], Cell::Float(3.0));
    }

    #[test]
    fn missing_table_gives_header_only() {
        let cols = ColumnSet::from([(10, "Hours")]);
        let t = merge_grouped(AggTable::Projects, None, &cols, Some("Hours"), true, hours);
        assert_eq!(t.header, vec!["Project", "Hours"]);
        assert!(t.rows.is_empty());
    }

    #[test]
    fn uncomputed_columns_are_blank() {
        let mut g = GroupedAds::new();
        g.add(&ad("a", 60.0), [(AggTable::Users, "a")]);
        let cols = ColumnSet::from([(10, "Hours"), (30, "Other")]);
        let t = merge_grouped(AggTable::Users, g.groups(AggTable::Users), &cols, None, false, hours);
        assert_eq!(t.rows.len(), 1);
        assert_eq!(t.rows[0][2], Cell::Blank);
    }

    #[test]
    fn counts_per_group() {
        let mut g = GroupedAds::new();
        g.add(&ad("a", 1.0), [(AggTable::Users, "a")]);
        g.add(&ad("a", 1.0), [(AggTable::Users, "a"), (AggTable::Schedds, "s")]);
        let c = g.counts();
        assert_eq!(c[&AggTable::Users]["a"], 2);
        assert_eq!(c[&AggTable::Schedds]["s"], 1);
    }

    #[test]
    fn one_ad_is_shared_across_tables() {
        let mut g = GroupedAds::new();
        g.add(&ad("a", 1.0), [(AggTable::Users, "a"), (AggTable::Schedds, "s"), (AggTable::Projects, "p")]);

        let user = &g.groups(AggTable::Users).unwrap()["a"][0];
        let schedd = &g.groups(AggTable::Schedds).unwrap()["s"][0];
        assert!(Rc::ptr_eq(user, schedd));
        assert_eq!(Rc::strong_count(user), 3);
    }
}
