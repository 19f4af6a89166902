//! Table cells, ordered column sets and merged report tables.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::TOTAL;

/// CSV marker for "value not available".
pub const MISSING_SENTINEL: i64 = -999;

/// One table cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    Blank,
    Missing,
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    /// Whole-number floats collapse to `Int` so counts stay integral in CSV.
    pub fn number(v: f64) -> Self {
        if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
            Cell::Int(v as i64)
        } else {
            Cell::Float(v)
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Missing => Some(MISSING_SENTINEL as f64),
            Cell::Text(_) | Cell::Blank => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Render for CSV: floats with four decimals, `Missing` as `-999`.
    pub fn to_csv_field(&self) -> String {
        match self {
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => format!("{f:.4}"),
            Cell::Text(s) => s.clone(),
            Cell::Blank => String::new(),
            Cell::Missing => MISSING_SENTINEL.to_string(),
        }
    }

    /// Inverse of [`Cell::to_csv_field`].
    pub fn from_csv_field(raw: &str) -> Self {
        let s = raw.trim();
        if s.is_empty() {
            return Cell::Blank;
        }
        if let Ok(i) = s.parse::<i64>() {
            return if i == MISSING_SENTINEL { Cell::Missing } else { Cell::Int(i) };
        }
        match s.parse::<f64>() {
            Ok(f) if f == MISSING_SENTINEL as f64 => Cell::Missing,
            Ok(f) if f.is_finite() => Cell::Float(f),
            _ => Cell::Text(raw.to_string()),
        }
    }

    fn sort_key(&self) -> f64 {
        match self {
            Cell::Int(i) => *i as f64,
            Cell::Float(f) => *f,
            _ => f64::NEG_INFINITY,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_csv_field())
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<usize> for Cell {
    fn from(v: usize) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

/// Aggregation dimension of a report table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum AggTable {
    Projects,
    Users,
    Schedds,
    Site,
    Institution,
    Jobs,
}

impl AggTable {
    /// Order tables appear in a report email.
    pub const REPORT_ORDER: [AggTable; 6] = [
        AggTable::Projects,
        AggTable::Users,
        AggTable::Schedds,
        AggTable::Site,
        AggTable::Institution,
        AggTable::Jobs,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AggTable::Projects => "Projects",
            AggTable::Users => "Users",
            AggTable::Schedds => "Schedds",
            AggTable::Site => "Site",
            AggTable::Institution => "Institution",
            AggTable::Jobs => "Jobs",
        }
    }

    /// Label of column 0: the table name without a trailing `s`.
    pub fn singular(self) -> &'static str {
        let s = self.as_str();
        s.strip_suffix('s').unwrap_or(s)
    }

    pub fn report_rank(self) -> usize {
        Self::REPORT_ORDER.iter().position(|t| *t == self).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for AggTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggTable {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::REPORT_ORDER
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownTable(s.to_string()))
    }
}

/// Numeric key → column name. Columns are emitted in ascending key order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ColumnSet(BTreeMap<u32, String>);

impl ColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: u32, name: impl Into<String>) -> &mut Self {
        self.0.insert(key, name.into());
        self
    }

    pub fn remove_keys(&mut self, keys: &[u32]) -> &mut Self {
        for k in keys {
            self.0.remove(k);
        }
        self
    }

    /// Rename by column name; unknown names are ignored.
    pub fn rename(&mut self, from: &str, to: &str) -> &mut Self {
        for name in self.0.values_mut() {
            if name == from {
                *name = to.to_string();
            }
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.values().any(|n| n == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[(u32, &str); N]> for ColumnSet {
    fn from(pairs: [(u32, &str); N]) -> Self {
        ColumnSet(pairs.into_iter().map(|(k, v)| (k, v.to_string())).collect())
    }
}

/// Header plus data rows. In grouped tables the first data row is `TOTAL`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(header: Vec<String>) -> Self {
        Self { header, rows: Vec::new() }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    pub fn has_total_row(&self) -> bool {
        self.rows
            .first()
            .and_then(|r| r.first())
            .and_then(Cell::as_text)
            .is_some_and(|s| s == TOTAL)
    }

    /// Rows after the optional `TOTAL` row.
    pub fn data_rows(&self) -> &[Vec<Cell>] {
        if self.has_total_row() {
            &self.rows[1..]
        } else {
            &self.rows
        }
    }

    /// Sort descending by `column`, keeping `TOTAL` first.
    ///
    /// Ties (and non-numeric cells, which sort last) fall back to the group
    /// name in column 0, ascending. Unknown columns leave the order alone.
    pub fn sort_desc_by(&mut self, column: &str) {
        let Some(idx) = self.column_index(column) else {
            return;
        };
        let skip = usize::from(self.has_total_row());
        self.rows[skip..].sort_by(|a, b| {
            let ka = a.get(idx).map_or(f64::NEG_INFINITY, Cell::sort_key);
            let kb = b.get(idx).map_or(f64::NEG_INFINITY, Cell::sort_key);
            kb.total_cmp(&ka).then_with(|| cmp_label(a.first(), b.first()))
        });
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        for h in self.header.iter_mut() {
            if h == from {
                *h = to.to_string();
            }
        }
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }
}

fn cmp_label(a: Option<&Cell>, b: Option<&Cell>) -> Ordering {
    let la = a.map(Cell::to_csv_field).unwrap_or_default();
    let lb = b.map(Cell::to_csv_field).unwrap_or_default();
    la.cmp(&lb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, v: i64) -> Vec<Cell> {
        vec![Cell::text(name), Cell::Int(v)]
    }

    #[test]
    fn csv_field_rendering() {
        assert_eq!(Cell::Int(12).to_csv_field(), "12");
        assert_eq!(Cell::Float(1.0 / 3.0).to_csv_field(), "0.3333");
        assert_eq!(Cell::Missing.to_csv_field(), "-999");
        assert_eq!(Cell::Blank.to_csv_field(), "");
        assert_eq!(Cell::text("a b").to_csv_field(), "a b");
    }

    #[test]
    fn csv_field_parsing() {
        assert_eq!(Cell::from_csv_field("-999"), Cell::Missing);
        assert_eq!(Cell::from_csv_field("-999.0000"), Cell::Missing);
        assert_eq!(Cell::from_csv_field("42"), Cell::Int(42));
        assert_eq!(Cell::from_csv_field("2.5000"), Cell::Float(2.5));
        assert_eq!(Cell::from_csv_field(""), Cell::Blank);
        assert_eq!(Cell::from_csv_field("-"), Cell::text("-"));
        assert_eq!(Cell::from_csv_field("n/a"), Cell::text("n/a"));
    }

    #[test]
    fn number_collapses_whole_values() {
        assert_eq!(Cell::number(3.0), Cell::Int(3));
        assert_eq!(Cell::number(3.5), Cell::Float(3.5));
    }

    #[test]
    fn column_set_orders_by_key() {
        let mut cols = ColumnSet::from([(20, "B"), (10, "A"), (30, "C")]);
        cols.insert(0, "User").remove_keys(&[30]).rename("A", "Renamed");
        assert_eq!(cols.names(), vec!["User", "Renamed", "B"]);
        assert!(cols.contains("B"));
        assert!(!cols.contains("C"));
    }

    #[test]
    fn sort_keeps_total_first_and_breaks_ties_by_name() {
        let mut t = Table::new(vec!["User".into(), "Hours".into()]);
        t.rows = vec![row(TOTAL, 30), row("carol", 5), row("bob", 10), row("alice", 10)];
        t.sort_desc_by("Hours");
        let names: Vec<_> = t.rows.iter().map(|r| r[0].to_csv_field()).collect();
        assert_eq!(names, vec![TOTAL, "alice", "bob", "carol"]);
        assert_eq!(t.data_rows().len(), 3);
    }

    #[test]
    fn sort_without_total_row() {
        let mut t = Table::new(vec!["User".into(), "Hours".into()]);
        t.rows = vec![row("a", 1), row("b", 2)];
        t.sort_desc_by("Hours");
        assert_eq!(t.rows[0][0], Cell::text("b"));
        assert!(!t.has_total_row());
    }

    #[test]
    fn agg_table_names() {
        assert_eq!(AggTable::Users.singular(), "User");
        assert_eq!(AggTable::Site.singular(), "Site");
        assert_eq!("schedds".parse::<AggTable>().unwrap(), AggTable::Schedds);
        assert!("nope".parse::<AggTable>().is_err());
        assert!(AggTable::Projects.report_rank() < AggTable::Institution.report_rank());
    }
}
