//! Plain per-user job history report.

use std::collections::BTreeMap;

use acct_core::job::GroupField;
use acct_core::stats::{max_or_missing, percent};
use acct_core::{AggTable, Cell, ColumnSet, JobAd, Table, TimeWindow};
use acct_io::query::{range, search_body};
use acct_io::search::ScanQuery;

use crate::{merge_grouped, FilterError, FilterKind, GroupedAds, ReportFilter, Row};

const SORT_COLUMN: &str = "All CPU Hours";

fn columns() -> ColumnSet {
    ColumnSet::from([
        (10, "All CPU Hours"),
        (20, "% Good CPU Hours"),
        (30, "Good CPU Hours"),
        (40, "Num Uniq Job Ids"),
        (50, "Max Rqst Mem MB"),
        (60, "Max Used Mem MB"),
        (70, "Max Rqst Cpus"),
        (80, "Max MB Sent"),
        (90, "Max MB Recv"),
    ])
}

fn max_mb(values: impl Iterator<Item = Option<f64>>) -> Cell {
    values.flatten().reduce(f64::max).map_or(Cell::Missing, |b| Cell::Float(b / 1e6))
}

/// RequestCpus is taken as stored here, without the one-CPU floor.
fn cpu_secs(ads: &[&JobAd], time: impl Fn(&JobAd) -> Option<f64>) -> f64 {
    ads.iter().filter_map(|a| Some(time(*a)? * a.request_cpus?)).sum()
}

fn user_row(ads: &[&JobAd]) -> Row {
    let all = cpu_secs(ads, |a| a.remote_wall_clock_time) / 3600.0;
    let good = cpu_secs(ads, |a| a.committed_time) / 3600.0;

    let mut row = Row::new();
    row.set("All CPU Hours", all)
        .set("Good CPU Hours", good)
        .set("% Good CPU Hours", percent(good, all))
        .set("Num Uniq Job Ids", ads.len())
        .set("Max Rqst Mem MB", max_or_missing(ads.iter().map(|a| a.request_memory)))
        .set("Max Used Mem MB", max_or_missing(ads.iter().map(|a| a.memory_usage)))
        .set("Max Rqst Cpus", max_or_missing(ads.iter().map(|a| a.request_cpus)))
        .set("Max MB Sent", max_mb(ads.iter().map(|a| a.bytes_sent)))
        .set("Max MB Recv", max_mb(ads.iter().map(|a| a.bytes_recvd)));
    row
}

#[derive(Default)]
pub struct BaseFilter {
    data: GroupedAds,
}

impl BaseFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportFilter for BaseFilter {
    fn name(&self) -> &'static str {
        "job history"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::Base
    }

    fn query(&self, window: &TimeWindow) -> ScanQuery {
        ScanQuery::new(search_body(range("RecordTime", window.start_ts, window.end_ts), None))
    }

    fn accept(&mut self, ad: &JobAd) {
        self.data.add(ad, [(AggTable::Users, ad.group_key(GroupField::User))]);
    }

    fn tables(&self) -> Vec<AggTable> {
        vec![AggTable::Users]
    }

    fn merge(&self, table: AggTable) -> Result<Table, FilterError> {
        if table != AggTable::Users {
            return Err(FilterError::NoSuchTable { filter: self.name(), table });
        }
        Ok(merge_grouped(table, self.data.groups(table), &columns(), Some(SORT_COLUMN), true, |_, ads| {
            user_row(ads)
        }))
    }

    fn sort_column(&self) -> Option<&'static str> {
        Some(SORT_COLUMN)
    }

    fn group_counts(&self) -> BTreeMap<AggTable, BTreeMap<String, usize>> {
        self.data.counts()
    }
}
