//! acct_report: offline rendering of merged accounting tables.
//!
//! Everything here is a pure function of tables, a [`ReportStyle`] and a
//! [`TimeWindow`](acct_core::TimeWindow): no backend, no filesystem, no mail.
//! The pipeline writes what these functions return.

#![forbid(unsafe_code)]

use thiserror::Error;

pub mod agg_html;
pub mod error_email;
pub mod format;
pub mod histogram;
pub mod html;
pub mod render_text;
pub mod style;

pub use html::{render_report, HtmlBuilder};
pub use style::ReportStyle;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("nothing to render: no tables")]
    NoTables,

    #[error("histogram header must be `single/total`, got {0:?}")]
    BadHistogramHeader(String),
}
