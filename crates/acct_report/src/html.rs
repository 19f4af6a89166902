// crates/acct_report/src/html.rs
//
// Report email body: one titled table per aggregation, then the legend.
// Tables keep their CSV column order; a leading unnamed column numbers the
// rows, and the TOTAL row carries the number of data rows instead.

use std::fmt::Write as _;

use acct_core::{AggTable, Table, TimeWindow};
use acct_filters::FilterKind;

use crate::format::{escape, fmt_int, render_cell, ColumnFormat};
use crate::style::ReportStyle;
use crate::{histogram, ReportError};

/* ------------------------------- builder -------------------------------- */

pub struct HtmlBuilder {
    buf: String,
}

impl Default for HtmlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlBuilder {
    pub fn new() -> Self {
        Self { buf: String::with_capacity(32 * 1024) }
    }

    /// `<html>` through the opening `<body>`, with `css` inlined.
    pub fn start(&mut self, css: &str) {
        let _ = write!(self.buf, "<html>\n<head>\n<style>{css}</style>\n</head>\n<body>\n");
    }

    pub fn heading(&mut self, title_html: &str) {
        let _ = write!(self.buf, "\n<h1>{title_html}</h1>\n");
    }

    /// A grouped table, styled by `style`.
    pub fn table(&mut self, table: &Table, style: &ReportStyle) {
        let visible: Vec<usize> = (0..table.header.len()).filter(|i| !style.is_hidden(&table.header[*i])).collect();

        self.buf.push_str("<table>\n  <tr><th></th>");
        for &i in &visible {
            let _ = write!(self.buf, "<th>{}</th>", escape(&table.header[i]));
        }
        self.buf.push_str("</tr>\n");

        let has_total = table.has_total_row();
        let n_data = table.data_rows().len();
        for (i, row) in table.rows.iter().enumerate() {
            let number = match (has_total, i) {
                (true, 0) => n_data,
                (true, _) => i,
                (false, _) => i + 1,
            };
            let class = if i % 2 == 0 { "even" } else { "odd" };
            let _ = write!(self.buf, r#"  <tr class="{class}"><td>{}</td>"#, fmt_int(number as i64));
            for &j in &visible {
                // the group label is always text, even when it looks numeric
                let fmt = if j == 0 { ColumnFormat::Text } else { style.format_of(&table.header[j]) };
                match row.get(j) {
                    Some(cell) => self.buf.push_str(&render_cell(cell, fmt)),
                    None => self.buf.push_str("<td></td>"),
                }
            }
            self.buf.push_str("</tr>\n");
        }
        self.buf.push_str("</table>\n");
    }

    pub fn legend(&mut self, items: &[(&str, &str)]) {
        if items.is_empty() {
            return;
        }
        self.buf.push_str("\n<p>Legend:\n<ul>\n");
        for (key, text) in items {
            let _ = writeln!(self.buf, "  <li><strong>{}:</strong> {}</li>", escape(key), escape(text));
        }
        self.buf.push_str("</ul>\n</p>\n");
    }

    pub fn raw(&mut self, html: &str) {
        self.buf.push_str(html);
    }

    pub fn finish(mut self) -> String {
        self.buf.push_str("</body>\n</html>\n");
        self.buf
    }
}

/* ------------------------------- reports -------------------------------- */

/// Full HTML body for `tables`, ordered as given.
pub fn render_report(
    tables: &[(AggTable, Table)],
    style: &ReportStyle,
    window: &TimeWindow,
) -> Result<String, ReportError> {
    if tables.is_empty() {
        return Err(ReportError::NoTables);
    }
    if style.kind == FilterKind::OsgJobDistro {
        return histogram::render(tables, style, window);
    }

    let mut b = HtmlBuilder::new();
    b.start(&style.css());
    for (agg, table) in tables {
        b.heading(&style.title(*agg, window));
        b.table(table, style);
    }
    b.legend(style.legend());
    tracing::debug!(tables = tables.len(), variant = %style.kind, "rendered report html");
    Ok(b.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use acct_core::{Cell, ReportPeriod};

    fn window() -> TimeWindow {
        TimeWindow::new(1_710_374_400, 1_710_460_800, ReportPeriod::Daily)
    }

    fn users() -> Table {
        let mut t = Table::new(
            ["User", "Num Uniq Job Ids", "% Rm'd Jobs", "Num Short Jobs", "Med Hrs"].map(String::from).to_vec(),
        );
        t.rows.push(vec![Cell::text("TOTAL"), Cell::Int(12345), Cell::Float(2.34), Cell::Int(3), Cell::Float(1.5)]);
        t.rows.push(vec![Cell::text("alice@ap40"), Cell::Int(12000), Cell::Float(2.0), Cell::Int(3), Cell::Missing]);
        t.rows.push(vec![Cell::text("bob"), Cell::Int(345), Cell::Float(-999.0), Cell::Int(0), Cell::Float(0.25)]);
        t
    }

    #[test]
    fn grouped_table_rows() {
        let style = ReportStyle::for_kind(FilterKind::OsgCpu);
        let html = render_report(&[(AggTable::Users, users())], &style, &window()).unwrap();

        assert!(html.starts_with("<html>\n<head>\n<style>\n"));
        assert!(html.contains("<h1>OSPool per User usage for jobs completed on <strong>2024-03-14</strong></h1>"));
        assert!(html.contains("<tr><th></th><th>User</th><th>Num Uniq Job Ids</th><th>% Rm&#x27;d Jobs</th><th>Med Hrs</th></tr>"));
        assert!(!html.contains("Num Short Jobs</th>"));
        assert!(html.contains(
            r#"<tr class="even"><td>2</td><td class="text">TOTAL</td><td>12,345</td><td>2.3</td><td>01:30</td></tr>"#
        ));
        assert!(html.contains(
            r#"<tr class="odd"><td>1</td><td class="text">alice@&#8203;ap40</td><td>12,000</td><td>2.0</td><td></td></tr>"#
        ));
        assert!(html.contains(r#"<tr class="even"><td>2</td><td class="text">bob</td><td>345</td><td></td><td>00:15</td></tr>"#));
        assert!(html.contains("<p>Legend:"));
        assert!(html.ends_with("</body>\n</html>\n"));
    }

    #[test]
    fn rows_without_total_start_at_one() {
        let mut t = Table::new(vec!["User".into(), "Last Wall Hrs".into()]);
        t.rows.push(vec![Cell::text("a"), Cell::Float(10.0)]);
        let mut b = HtmlBuilder::new();
        b.table(&t, &ReportStyle::for_kind(FilterKind::OsgLongJob));
        let html = b.finish();
        assert!(html.contains(r#"<tr class="even"><td>1</td><td class="text">a</td><td>10:00</td></tr>"#));
    }

    #[test]
    fn no_tables_is_an_error() {
        let style = ReportStyle::default();
        assert!(matches!(render_report(&[], &style, &window()), Err(ReportError::NoTables)));
    }
}
