//! Job resource request histogram: memory rows × disk columns, each cell the
//! percentage of single-core jobs, shaded green by size.
//!
//! The merged table's corner header holds `single/total` job counts.

use std::fmt::Write as _;

use acct_core::{AggTable, Cell, Table, TimeWindow};

use crate::format::{break_chars, fmt_int};
use crate::html::HtmlBuilder;
use crate::style::ReportStyle;
use crate::ReportError;

const CORNER: &str = r#"<th style="font-family: monospace; white-space: pre; margin: 0; text-align: left">      Disk
Memory</th>"#;

const NOTE: &str = "\n<p><strong>Note:</strong> Blank values denote no jobs with the corresponding resource requests,\n\
while values of 0 denote fewer than 1% of jobs. The usage table may have fewer jobs due to\n\
missing usage data in job ads.</p>\n";

/// `(single_core_jobs, total_jobs)` from the corner header.
pub fn parse_counts(corner: &str) -> Result<(u64, u64), ReportError> {
    let bad = || ReportError::BadHistogramHeader(corner.to_string());
    let (single, total) = corner.split_once('/').ok_or_else(bad)?;
    let single = single.trim().parse().map_err(|_| bad())?;
    let total = total.trim().parse().map_err(|_| bad())?;
    Ok((single, total))
}

/// One percentage cell.
pub fn shade_cell(cell: &Cell) -> String {
    let Some(x) = cell.as_f64().filter(|_| !matches!(cell, Cell::Missing)) else {
        return "<td>n/a</td>".to_string();
    };
    if x < 1e-12 {
        return "<td></td>".to_string();
    }
    if x < 1.0 {
        return "<td>0</td>".to_string();
    }
    let side = 100.0 - x / 2.0;
    format!(r#"<td style="background-color: rgb({side}%, 100%, {side}%)">{x:.0}</td>"#)
}

fn histogram_table(table: &Table) -> Result<String, ReportError> {
    let corner = table.header.first().map(String::as_str).unwrap_or_default();
    let (single, total) = parse_counts(corner)?;
    let share = if total == 0 { 0.0 } else { 100.0 * single as f64 / total as f64 };

    let mut out = String::from("<table>\n");
    let _ = writeln!(
        out,
        r#"  <tr><th style="text-align: center"></th><th style="text-align: center" colspan="{}">Percentage of {} single-core jobs ({share:.1}% of all jobs).<br>Memory and disk requests in GB.</th></tr>"#,
        table.header.len().saturating_sub(1),
        fmt_int(single as i64),
    );

    out.push_str("  <tr>");
    out.push_str(CORNER);
    for h in table.header.iter().skip(1) {
        let _ = write!(out, r#"<th style="text-align: center; font-weight: bold">{}</th>"#, break_chars(h));
    }
    out.push_str("</tr>\n");

    for row in &table.rows {
        out.push_str("  <tr>");
        let label = row.first().map(Cell::to_csv_field).unwrap_or_default();
        let _ = write!(
            out,
            r#"<td style="background-color: #ddd; text-align: right; font-weight: bold">{}</td>"#,
            break_chars(&label)
        );
        for cell in row.iter().skip(1) {
            out.push_str(&shade_cell(cell));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
    Ok(out)
}

/// Full HTML body for the histogram variant. Only the `Jobs` table is drawn.
pub fn render(tables: &[(AggTable, Table)], style: &ReportStyle, window: &TimeWindow) -> Result<String, ReportError> {
    let mut b = HtmlBuilder::new();
    b.start(&style.css());
    let mut drawn = 0;
    for (agg, table) in tables.iter().filter(|(agg, _)| *agg == AggTable::Jobs) {
        b.heading(&style.title(*agg, window));
        b.raw(&histogram_table(table)?);
        drawn += 1;
    }
    if drawn == 0 {
        return Err(ReportError::NoTables);
    }
    b.raw(NOTE);
    Ok(b.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use acct_core::ReportPeriod;
    use acct_filters::FilterKind;

    fn table() -> Table {
        let mut t = Table::new(vec!["40/50".into(), "[0, 2)".into(), "[2,)".into()]);
        t.rows.push(vec![Cell::text("[0, 1)"), Cell::Int(50), Cell::Float(0.5)]);
        t.rows.push(vec![Cell::text("[1,)"), Cell::Int(0), Cell::Float(49.5)]);
        t
    }

    #[test]
    fn counts_from_corner() {
        assert_eq!(parse_counts("40/50").unwrap(), (40, 50));
        assert!(matches!(parse_counts("User"), Err(ReportError::BadHistogramHeader(_))));
        assert!(parse_counts("a/b").is_err());
    }

    #[test]
    fn cells_are_shaded_or_hidden() {
        assert_eq!(shade_cell(&Cell::Int(0)), "<td></td>");
        assert_eq!(shade_cell(&Cell::Float(0.4)), "<td>0</td>");
        assert_eq!(shade_cell(&Cell::Int(50)), r#"<td style="background-color: rgb(75%, 100%, 75%)">50</td>"#);
        assert_eq!(shade_cell(&Cell::Missing), "<td>n/a</td>");
    }

    #[test]
    fn renders_header_rows_and_note() {
        let window = TimeWindow::new(1_710_374_400, 1_710_460_800, ReportPeriod::Daily);
        let style = ReportStyle::for_kind(FilterKind::OsgJobDistro);
        let html = render(&[(AggTable::Jobs, table())], &style, &window).unwrap();
        assert!(html.contains("<h1>Resource requests histogram for jobs completed on 2024-03-14</h1>"));
        assert!(html.contains(r#"colspan="2">Percentage of 40 single-core jobs (80.0% of all jobs)."#));
        assert!(html.contains("      Disk\nMemory</th>"));
        assert!(html.contains(r#"font-weight: bold">[0, 1)</td><td style="background-color: rgb(75%, 100%, 75%)">50</td><td>0</td></tr>"#));
        assert!(html.contains("<strong>Note:</strong>"));
    }

    #[test]
    fn malformed_corner_is_an_error() {
        let window = TimeWindow::new(0, 86_400, ReportPeriod::Daily);
        let style = ReportStyle::for_kind(FilterKind::OsgJobDistro);
        let mut t = table();
        t.header[0] = "Jobs".into();
        assert!(matches!(render(&[(AggTable::Jobs, t)], &style, &window), Err(ReportError::BadHistogramHeader(_))));
    }
}
