//! Body and subject of the "report failed" email.

use acct_core::TimeWindow;
use acct_filters::FilterKind;

use crate::format::escape;
use crate::style::error_label;

pub fn subject(kind: FilterKind, window: &TimeWindow) -> String {
    format!(
        "Error sending {} {} Usage Report {}",
        error_label(kind),
        window.period.capitalized(),
        window.date_label()
    )
}

/// HTML with the tail of the log in a preformatted block.
pub fn body(lines: &[String]) -> String {
    let log = lines.iter().map(|l| escape(l.trim_end())).collect::<Vec<_>>().join("\n");
    format!(
        "<html>\n<head>\n</head>\n<body>\nLast {} lines of log\n\
         <p style=\"font-family: monospace; white-space: pre\">\n{log}\n</p>\n</body>\n</html>\n",
        lines.len()
    )
}
