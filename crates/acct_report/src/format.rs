// crates/acct_report/src/format.rs
//
// Cell-level HTML formatting: escaping, line-break hints, integer grouping,
// HH:MM durations and per-column number formats.

use acct_core::Cell;

const ZERO_WIDTH_SPACE: &str = "&#8203;";
const NON_BREAKING_HYPHEN: &str = "&#8209;";

/// How a column's numeric cells are printed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColumnFormat {
    /// Truncated integer with thousands separators.
    #[default]
    Int,
    /// Fixed number of decimals.
    Fixed(u8),
    /// Hours as `HH:MM`.
    HhMm,
    /// Left-aligned text, with break hints.
    Text,
}

/// Escape text for HTML.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape, then allow a line break after `@`, `_` and `.`; never break at `-`.
pub fn break_chars(s: &str) -> String {
    let escaped = escape(s);
    let mut out = String::with_capacity(escaped.len() + 16);
    for ch in escaped.chars() {
        match ch {
            '@' | '_' | '.' => {
                out.push(ch);
                out.push_str(ZERO_WIDTH_SPACE);
            }
            '-' => out.push_str(NON_BREAKING_HYPHEN),
            _ => out.push(ch),
        }
    }
    out
}

/// Integer with `,` thousands separators.
pub fn fmt_int(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, d) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(d);
    }
    out
}

/// Zero-padded `HH:MM`; minutes are truncated.
pub fn hhmm(hours: f64) -> String {
    let h = hours.trunc();
    let m = (60.0 * (hours - h)).trunc();
    format!("{:02}:{:02}", h as i64, m as i64)
}

fn format_number(v: f64, fmt: ColumnFormat) -> String {
    match fmt {
        ColumnFormat::Int => fmt_int(v.trunc() as i64),
        ColumnFormat::Fixed(n) => format!("{v:.prec$}", prec = usize::from(n)),
        ColumnFormat::HhMm => hhmm(v),
        ColumnFormat::Text => Cell::number(v).to_csv_field(),
    }
}

/// One `<td>` for `cell`.
///
/// Missing values and negative numbers mean "undefined" and render blank.
/// A lone `-` in a numeric column marks "not possible" and stays right-aligned.
pub fn render_cell(cell: &Cell, fmt: ColumnFormat) -> String {
    let number = match cell {
        Cell::Missing | Cell::Blank => return "<td></td>".to_string(),
        Cell::Int(i) => *i as f64,
        Cell::Float(f) => *f,
        Cell::Text(s) if s == "-" && fmt != ColumnFormat::Text => {
            return r#"<td style="text-align: right">-</td>"#.to_string();
        }
        Cell::Text(s) => return format!(r#"<td class="text">{}</td>"#, break_chars(s)),
    };
    if number < 0.0 || !number.is_finite() {
        return "<td></td>".to_string();
    }
    match fmt {
        ColumnFormat::Text => format!(r#"<td class="text">{}</td>"#, format_number(number, fmt)),
        _ => format!("<td>{}</td>", format_number(number, fmt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn break_hints() {
        assert_eq!(break_chars("a.b@c_d"), "a.&#8203;b@&#8203;c_&#8203;d");
        assert_eq!(break_chars("osg-htc"), "osg&#8209;htc");
        assert_eq!(break_chars("<x>"), "&lt;x&gt;");
    }

    #[test]
    fn durations() {
        assert_eq!(hhmm(0.0), "00:00");
        assert_eq!(hhmm(1.5), "01:30");
        assert_eq!(hhmm(26.999), "26:59");
        assert_eq!(hhmm(123.25), "123:15");
    }

    #[test]
    fn grouped_integers() {
        assert_eq!(fmt_int(0), "0");
        assert_eq!(fmt_int(999), "999");
        assert_eq!(fmt_int(1000), "1,000");
        assert_eq!(fmt_int(1234567), "1,234,567");
        assert_eq!(fmt_int(-12345), "-12,345");
    }

    #[test]
    fn cells() {
        assert_eq!(render_cell(&Cell::Float(1234.9), ColumnFormat::Int), "<td>1,234</td>");
        assert_eq!(render_cell(&Cell::Float(12.345), ColumnFormat::Fixed(1)), "<td>12.3</td>");
        assert_eq!(render_cell(&Cell::Float(2.5), ColumnFormat::HhMm), "<td>02:30</td>");
        assert_eq!(render_cell(&Cell::Int(-5), ColumnFormat::Int), "<td></td>");
        assert_eq!(render_cell(&Cell::Missing, ColumnFormat::Fixed(2)), "<td></td>");
        assert_eq!(render_cell(&Cell::text("-"), ColumnFormat::Int), r#"<td style="text-align: right">-</td>"#);
        assert_eq!(render_cell(&Cell::text("n/a"), ColumnFormat::Fixed(1)), r#"<td class="text">n/a</td>"#);
        assert_eq!(render_cell(&Cell::text("ap1.wisc.edu"), ColumnFormat::Text), r#"<td class="text">ap1.&#8203;wisc.&#8203;edu</td>"#);
        assert_eq!(render_cell(&Cell::Int(42), ColumnFormat::Text), r#"<td class="text">42</td>"#);
    }

    proptest! {
        #[test]
        fn grouping_keeps_digits(n in any::<i64>()) {
            prop_assert_eq!(fmt_int(n).replace(',', ""), n.to_string());
        }

        #[test]
        fn minutes_stay_below_sixty(h in 0.0f64..1.0e6) {
            let s = hhmm(h);
            let (_, m) = s.rsplit_once(':').unwrap();
            prop_assert!(m.parse::<u32>().unwrap() < 60);
        }
    }
}
