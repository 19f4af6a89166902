//! Plain-text grid for terminals, in the `+---+` / `+===+` style.

use acct_core::{Cell, Table};

use crate::format::fmt_int;

/// Display value of a cell outside HTML: grouped integers, two decimals,
/// blanks for missing values.
pub fn plain(cell: &Cell) -> String {
    match cell {
        Cell::Int(i) => fmt_int(*i),
        Cell::Float(f) if f.is_finite() => format!("{f:.2}"),
        Cell::Float(_) | Cell::Missing | Cell::Blank => String::new(),
        Cell::Text(s) => s.clone(),
    }
}

fn is_numeric(cell: &Cell) -> bool {
    matches!(cell, Cell::Int(_) | Cell::Float(_))
}

fn rule(widths: &[usize], fill: char) -> String {
    let mut out = String::from("+");
    for w in widths {
        out.extend(std::iter::repeat(fill).take(w + 2));
        out.push('+');
    }
    out
}

/// Render `table` as a grid; numbers are right-aligned, text left-aligned.
pub fn grid(table: &Table) -> String {
    let ncols = table.header.len().max(table.rows.iter().map(Vec::len).max().unwrap_or(0));
    let rows: Vec<Vec<(String, bool)>> = table
        .rows
        .iter()
        .map(|r| {
            (0..ncols)
                .map(|i| r.get(i).map_or((String::new(), false), |c| (plain(c), is_numeric(c))))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> =
        (0..ncols).map(|i| table.header.get(i).map_or(0, |h| h.chars().count())).collect();
    for row in &rows {
        for (i, (s, _)) in row.iter().enumerate() {
            widths[i] = widths[i].max(s.chars().count());
        }
    }

    let mut out = String::new();
    out.push_str(&rule(&widths, '-'));
    out.push('\n');
    out.push('|');
    for (i, w) in widths.iter().enumerate() {
        let h = table.header.get(i).map(String::as_str).unwrap_or("");
        out.push_str(&format!(" {h:<w$} |"));
    }
    out.push('\n');
    out.push_str(&rule(&widths, '='));
    out.push('\n');
    for row in &rows {
        out.push('|');
        for ((s, numeric), w) in row.iter().zip(&widths) {
            if *numeric {
                out.push_str(&format!(" {s:>w$} |"));
            } else {
                out.push_str(&format!(" {s:<w$} |"));
            }
        }
        out.push('\n');
        out.push_str(&rule(&widths, '-'));
        out.push('\n');
    }
    out
}
