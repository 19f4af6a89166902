//! acct_core: core types for HTC pool accounting reports.
//!
//! This crate is **I/O-free**. It defines the stable types used across the
//! workspace (`acct_io`, `acct_filters`, `acct_report`, `acct_pipeline`, `acct_cli`).
//!
//! - Report periods and resolved time windows
//! - Typed, lenient job-history ads
//! - Table cells, column sets and row ordering
//! - CSV table file naming
//! - Small statistics helpers (median, stdev, percentiles, mode)

#![forbid(unsafe_code)]

pub mod errors {
    use core::fmt;

    /// Error set for core-domain validation & parsing.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum CoreError {
        /// `custom` period without both bounds.
        MissingCustomBound,
        /// Both bounds given while the period is not `custom`.
        BoundsRequireCustom,
        UnknownPeriod(String),
        UnknownTable(String),
        InvalidTimestamp(i64),
        InvalidFileName(String),
    }

    impl fmt::Display for CoreError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                CoreError::MissingCustomBound => {
                    write!(f, "start and end timestamps are required when the period is custom")
                }
                CoreError::BoundsRequireCustom => {
                    write!(f, "period must be custom when both start and end timestamps are given")
                }
                CoreError::UnknownPeriod(p) => {
                    write!(f, "unknown report period: {p} (expected daily, weekly, monthly or custom)")
                }
                CoreError::UnknownTable(t) => write!(f, "unknown table: {t}"),
                CoreError::InvalidTimestamp(ts) => write!(f, "invalid timestamp: {ts}"),
                CoreError::InvalidFileName(n) => write!(f, "invalid table file name: {n}"),
            }
        }
    }

    impl std::error::Error for CoreError {}
}

pub mod job;
pub mod naming;
pub mod period;
pub mod stats;
pub mod table;

pub use errors::CoreError;
pub use job::JobAd;
pub use naming::TableFileName;
pub use period::{ReportPeriod, TimeWindow};
pub use table::{AggTable, Cell, ColumnSet, Table};

/// Label used for missing or blank grouping values.
pub const UNKNOWN: &str = "UNKNOWN";

/// Label of the totals row in grouped tables.
pub const TOTAL: &str = "TOTAL";
