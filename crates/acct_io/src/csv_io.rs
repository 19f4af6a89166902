//! CSV persistence for merged tables.

use std::fs;
use std::path::{Path, PathBuf};

use acct_core::{Cell, Table};

use crate::{IoError, IoResult};

/// String cells exactly as read from disk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Re-type cells; column 0 (group names) always stays text.
    pub fn to_table(&self) -> Table {
        let rows = self
            .rows
            .iter()
            .map(|r| {
                r.iter()
                    .enumerate()
                    .map(|(j, v)| if j == 0 { Cell::Text(v.clone()) } else { Cell::from_csv_field(v) })
                    .collect()
            })
            .collect();
        Table { header: self.header.clone(), rows }
    }
}

/// Header row, `TOTAL` (first data) row and the number of remaining rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TotalsRow {
    pub header: Vec<String>,
    pub totals: Vec<String>,
    pub entries: usize,
}

/// Write `table` to `dir/file_name`, creating `dir`. Returns the path.
pub fn write_table(dir: &Path, file_name: &str, table: &Table) -> IoResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| IoError::Path(format!("mkdir {}: {e}", dir.display())))?;
    let path = dir.join(file_name);

    let mut w = csv::WriterBuilder::new().flexible(true).from_path(&path)?;
    w.write_record(&table.header)?;
    for row in &table.rows {
        w.write_record(row.iter().map(Cell::to_csv_field))?;
    }
    w.flush()?;

    tracing::debug!(path = %path.display(), rows = table.rows.len(), "wrote table");
    Ok(path)
}

pub fn read_table(path: &Path) -> IoResult<RawTable> {
    let mut r = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| IoError::Csv(format!("{}: {e}", path.display())))?;
    let header = r.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for rec in r.records() {
        rows.push(rec?.iter().map(str::to_string).collect());
    }
    Ok(RawTable { header, rows })
}

pub fn read_totals(path: &Path) -> IoResult<TotalsRow> {
    let mut raw = read_table(path)?;
    if raw.rows.is_empty() {
        return Err(IoError::Invalid(format!("{}: no totals row", path.display())));
    }
    let totals = raw.rows.remove(0);
    Ok(TotalsRow { header: raw.header, totals, entries: raw.rows.len() })
}
