// crates/acct_pipeline/src/render.rs
//
// Offline re-rendering: table CSVs back to the report HTML, no backend.

use std::path::PathBuf;

use acct_core::{AggTable, Table, TableFileName, TimeWindow};
use acct_io::csv_io::read_table;
use acct_report::{render_report, ReportStyle};

use crate::PipelineError;

/// Rebuild the report body from CSVs written by an earlier run. The table of
/// each file comes from its name; tables are laid out in report order.
pub fn render_from_csv(
    files: &[PathBuf],
    style: &ReportStyle,
    window: &TimeWindow,
) -> Result<String, PipelineError> {
    let mut tables: Vec<(AggTable, Table)> = Vec::with_capacity(files.len());
    for path in files {
        let name = TableFileName::parse(path)?;
        let table = read_table(path)?.to_table();
        tracing::debug!(path = %path.display(), table = %name.table, rows = table.rows.len(), "read table");
        tables.push((name.table, table));
    }
    tables.sort_by_key(|(agg, _)| agg.report_rank());
    Ok(render_report(&tables, style, window)?)
}
