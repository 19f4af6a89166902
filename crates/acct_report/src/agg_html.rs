//! HTML for the aggregation report: one `<h3>` heading and table per
//! grouping field, under a compact stylesheet that survives mail clients.

use std::fmt::Write as _;

use acct_core::{Cell, Table};

use crate::format::escape;
use crate::render_text::plain;

const AGG_STYLE: &str = "
<style>
    table {
        width: 100%;
        border-collapse: collapse;
    }
    th {
        white-space: nowrap;
        background-color: #d6d6d6;
    }
    th, td {
        padding: 10px;
        text-align: left;
        border: 1px solid black;
    }
    table tr:nth-child(even) td {
        background-color: #fce3f4;
    }
</style>
";

fn table_html(table: &Table) -> String {
    let mut out = String::from("<table>\n<thead>\n<tr>");
    for h in &table.header {
        let _ = write!(out, "<th>{}</th>", escape(h));
    }
    out.push_str("</tr>\n</thead>\n<tbody>\n");
    for row in &table.rows {
        out.push_str("<tr>");
        for cell in row {
            let align = if matches!(cell, Cell::Int(_) | Cell::Float(_)) { r#" style="text-align: right""# } else { "" };
            let _ = write!(out, "<td{align}>{}</td>", escape(&plain(cell)));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n");
    out
}

/// Document for `(heading, table)` pairs, in order.
pub fn render(sections: &[(String, Table)]) -> String {
    let mut out = String::from(AGG_STYLE);
    for (heading, table) in sections {
        let _ = writeln!(out, "<h3>{}</h3>", escape(heading));
        out.push_str(&table_html(table));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_in_order() {
        let mut t = Table::new(vec!["Project".into(), "# Jobs".into(), "% Goodput".into()]);
        t.rows.push(vec![Cell::text("Totals"), Cell::Int(10), Cell::Missing]);
        let html = render(&[
            ("CHTC Jobs by ProjectName from A TO B".into(), t.clone()),
            ("CHTC Jobs by User from A TO B".into(), t),
        ]);
        assert!(html.starts_with("\n<style>"));
        let first = html.find("<h3>CHTC Jobs by ProjectName").unwrap();
        let second = html.find("<h3>CHTC Jobs by User").unwrap();
        assert!(first < second);
        assert!(html.contains(r#"<tr><td>Totals</td><td style="text-align: right">10</td><td></td></tr>"#));
        assert!(html.contains("<th>% Goodput</th>"));
    }
}
