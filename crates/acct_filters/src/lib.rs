//! acct_filters: the reduction engine.
//!
//! A report filter receives every job ad matched by its query, groups the
//! ads per table (Users, Projects, ...) and finally merges each table into
//! a [`Table`] with a `TOTAL` row first and the rest sorted descending.
//!
//! Variants live under [`variants`]; [`FilterKind`] maps CLI names onto them.

#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use acct_core::{AggTable, JobAd, Table, TimeWindow};
use acct_io::search::ScanQuery;
use acct_io::topology::SiteMap;
use thiserror::Error;

pub mod agg_report;
pub mod grouped;
pub mod pool;
pub mod usage;

pub mod variants {
    pub mod base;
    pub mod chtc_gpu;
    pub mod osg_cpu;
    pub mod osg_job_distro;
    pub mod osg_long_job;
    pub mod osg_retry;

    pub use base::BaseFilter;
    pub use chtc_gpu::ChtcGpuFilter;
    pub use osg_cpu::OsgCpuFilter;
    pub use osg_job_distro::OsgJobDistroFilter;
    pub use osg_long_job::OsgLongJobFilter;
    pub use osg_retry::OsgRetryFilter;
}

pub use grouped::{merge_grouped, GroupedAds, Groups, Row};
pub use pool::PoolMembership;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unknown filter: {0} (expected one of base, osg-cpu, osg-retry, osg-long-job, osg-job-distro, chtc-gpu)")]
    UnknownFilter(String),

    #[error("filter {filter} has no {table} table")]
    NoSuchTable { filter: &'static str, table: AggTable },

    #[error("aggregation response: {0}")]
    BadResponse(String),

    #[error(transparent)]
    Io(#[from] acct_io::IoError),
}

/// One report variant: its query, its per-ad reduction and its merge.
pub trait ReportFilter {
    /// Human name, also the stem of CSV file names.
    fn name(&self) -> &'static str;

    fn kind(&self) -> FilterKind;

    fn query(&self, window: &TimeWindow) -> ScanQuery;

    /// Reduce one ad into the filter state.
    fn accept(&mut self, ad: &JobAd);

    /// Tables this filter produces, in report order.
    fn tables(&self) -> Vec<AggTable>;

    fn merge(&self, table: AggTable) -> Result<Table, FilterError>;

    /// Column the merged rows are ordered by, if any.
    fn sort_column(&self) -> Option<&'static str>;

    /// Per table, group name → number of ads kept.
    fn group_counts(&self) -> BTreeMap<AggTable, BTreeMap<String, usize>>;

    /// Release resources held for the scan, e.g. persist lookups.
    fn finish(&mut self) -> Result<(), FilterError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Base,
    OsgCpu,
    OsgRetry,
    OsgLongJob,
    OsgJobDistro,
    ChtcGpu,
}

impl FilterKind {
    pub const ALL: [FilterKind; 6] = [
        FilterKind::Base,
        FilterKind::OsgCpu,
        FilterKind::OsgRetry,
        FilterKind::OsgLongJob,
        FilterKind::OsgJobDistro,
        FilterKind::ChtcGpu,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            FilterKind::Base => "base",
            FilterKind::OsgCpu => "osg-cpu",
            FilterKind::OsgRetry => "osg-retry",
            FilterKind::OsgLongJob => "osg-long-job",
            FilterKind::OsgJobDistro => "osg-job-distro",
            FilterKind::ChtcGpu => "chtc-gpu",
        }
    }

    /// Whether the filter needs OSPool membership (collector lookups).
    pub const fn uses_pool(self) -> bool {
        matches!(
            self,
            FilterKind::OsgCpu | FilterKind::OsgRetry | FilterKind::OsgLongJob | FilterKind::OsgJobDistro
        )
    }

    /// Whether the filter maps resources to institutions.
    pub const fn uses_site_map(self) -> bool {
        matches!(self, FilterKind::OsgCpu)
    }

    pub fn build(self, setup: FilterSetup) -> Box<dyn ReportFilter> {
        use variants::*;
        match self {
            FilterKind::Base => Box::new(BaseFilter::new()),
            FilterKind::OsgCpu => Box::new(OsgCpuFilter::new(setup.pool, setup.site_map)),
            FilterKind::OsgRetry => Box::new(OsgRetryFilter::new(setup.pool)),
            FilterKind::OsgLongJob => Box::new(OsgLongJobFilter::new(setup.pool)),
            FilterKind::OsgJobDistro => Box::new(OsgJobDistroFilter::new(setup.pool)),
            FilterKind::ChtcGpu => Box::new(ChtcGpuFilter::new()),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let want = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == want)
            .ok_or_else(|| FilterError::UnknownFilter(s.to_string()))
    }
}

/// External state a filter may need while reducing.
#[derive(Default)]
pub struct FilterSetup {
    pub pool: PoolMembership,
    pub site_map: SiteMap,
}
