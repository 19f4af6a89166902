//! acct_pipeline: one report run, end to end.
//!
//! scan → reduce → merge → CSV → HTML → mail → totals push
//!
//! The backend and the mail relay are passed in as trait objects, so runs can
//! be driven against in-memory fakes. Everything on disk goes through
//! `acct_io`; everything rendered comes from `acct_report`.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use acct_core::TimeWindow;
use acct_io::config::DEFAULT_INDEX;
use acct_io::MailConfig;
use thiserror::Error;

pub mod agg;
pub mod error_report;
pub mod render;
pub mod report;
pub mod totals;

pub use agg::{run_agg_report, AggOutcome, AggSpec};
pub use error_report::run_error_report;
pub use render::render_from_csv;
pub use report::{run_report, ReportOutcome};
pub use totals::{push_totals, DEFAULT_TOTALS_INDEX};

/// Debug dump of group sizes per table.
pub const LAST_DATA_FILE: &str = "last_data.json";
/// Copy of the last rendered report body.
pub const LAST_HTML_FILE: &str = "last_html.html";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Io(#[from] acct_io::IoError),

    #[error(transparent)]
    Filter(#[from] acct_filters::FilterError),

    #[error(transparent)]
    Report(#[from] acct_report::ReportError),

    #[error(transparent)]
    Core(#[from] acct_core::CoreError),

    #[error("mail not delivered to: {}", .0.join(", "))]
    Undelivered(Vec<String>),
}

/// Settings shared by every kind of run.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub window: TimeWindow,
    /// Index (or pattern) scanned for job ads.
    pub index: String,
    /// Where table CSVs are written.
    pub csv_dir: PathBuf,
    /// Where `last_data.json` and `last_html.html` land.
    pub work_dir: PathBuf,
    pub mail: MailConfig,
    pub no_email: bool,
    pub no_push: bool,
    pub totals_index: String,
}

impl RunContext {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            index: DEFAULT_INDEX.to_string(),
            csv_dir: PathBuf::from("csv"),
            work_dir: PathBuf::from("."),
            mail: MailConfig::default(),
            no_email: false,
            no_push: false,
            totals_index: DEFAULT_TOTALS_INDEX.to_string(),
        }
    }
}
