//! acct_io: every external effect of the accounting reports.
//!
//! - Search backend seam (`SearchBackend`) and its blocking HTTP client
//! - Query/aggregation body builders
//! - CSV table persistence and atomic JSON cache files
//! - Topology site map and schedd → collector host map
//! - MIME message building and SMTP delivery
//!
//! Shared error type (`IoError`) with `From` conversions used across modules.

#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    /// Filesystem / path errors (create_dir_all, rename, fsync, etc.)
    #[error("io/path error: {0}")]
    Path(String),

    /// JSON serialization/deserialization errors with an optional JSON Pointer.
    #[error("json error at {pointer}: {msg}")]
    Json { pointer: String, msg: String },

    #[error("csv error: {0}")]
    Csv(String),

    /// Invalid or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Non-2xx backend response; `body` is truncated.
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport failures (connect, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),

    #[error("xml error: {0}")]
    Xml(String),

    #[error("mail error: {0}")]
    Mail(String),

    #[error("no recipients in the To: field, not sending email")]
    NoRecipients,

    /// External helper command failed or is unavailable.
    #[error("command error: {0}")]
    Command(String),

    /// Generic validation / invariants.
    #[error("invalid: {0}")]
    Invalid(String),
}

pub type IoResult<T> = Result<T, IoError>;

/* ---------------- From conversions (used by file modules) ---------------- */

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Path(e.to_string())
    }
}

impl From<serde_json::Error> for IoError {
    fn from(e: serde_json::Error) -> Self {
        // serde_json keeps line/column, not a pointer; callers may enrich.
        IoError::Json { pointer: "/".to_string(), msg: e.to_string() }
    }
}

impl From<csv::Error> for IoError {
    fn from(e: csv::Error) -> Self {
        IoError::Csv(e.to_string())
    }
}

impl From<roxmltree::Error> for IoError {
    fn from(e: roxmltree::Error) -> Self {
        IoError::Xml(e.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for IoError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => IoError::Http { status: status.as_u16(), body: e.to_string() },
            None => IoError::Network(e.to_string()),
        }
    }
}

impl From<lettre::error::Error> for IoError {
    fn from(e: lettre::error::Error) -> Self {
        IoError::Mail(e.to_string())
    }
}

impl From<lettre::address::AddressError> for IoError {
    fn from(e: lettre::address::AddressError) -> Self {
        IoError::Mail(format!("bad address: {e}"))
    }
}

impl From<lettre::transport::smtp::Error> for IoError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        IoError::Mail(e.to_string())
    }
}

impl From<acct_core::CoreError> for IoError {
    fn from(e: acct_core::CoreError) -> Self {
        IoError::Invalid(e.to_string())
    }
}

/* ---------------- Public modules ---------------- */

pub mod cache;
pub mod collectors;
pub mod config;
pub mod csv_io;
pub mod mail;
pub mod query;
pub mod search;
pub mod topology;

pub use config::{MailConfig, SearchConfig};
pub use search::SearchBackend;

pub mod prelude {
    pub use crate::{IoError, IoResult};

    pub use crate::cache::{is_stale, read_json, write_json_atomic};
    pub use crate::collectors::{CollectorHostMap, CollectorLookup};
    pub use crate::config::{MailConfig, SearchConfig};
    pub use crate::csv_io::{read_table, read_totals, write_table, RawTable, TotalsRow};
    pub use crate::mail::{DeliveryReport, MailRelay};
    pub use crate::search::{ScanQuery, SearchBackend};
    pub use crate::topology::SiteMap;

    #[cfg(feature = "http")]
    pub use crate::search::HttpSearchClient;
}
