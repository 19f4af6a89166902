//! OSPool retry report: how often jobs needed more than one shadow, and how
//! much of that is due to input transfer errors.

use std::collections::BTreeMap;

use acct_core::job::{GroupField, UNIVERSE_VANILLA};
use acct_core::stats::mode;
use acct_core::{AggTable, Cell, ColumnSet, JobAd, Table, TimeWindow};
use acct_io::query::{bool_filter, range, range_gt, search_body, term};
use acct_io::search::ScanQuery;

use crate::usage::distinct;
use crate::{merge_grouped, FilterError, FilterKind, GroupedAds, PoolMembership, ReportFilter, Row};

/// Sort key; holds the job count and is renamed once sorted.
const SORT_COLUMN: &str = "All CPU Hours";
const JOB_COUNT_COLUMN: &str = "Num Uniq Job Ids";

/// Hold reasons that mean the input sandbox never arrived.
const INPUT_TRANSFER_HOLDS: [&str; 2] = ["TransferInputError", "UploadFileError"];

fn columns(table: AggTable) -> ColumnSet {
    let mut cols = ColumnSet::from([
        (10, SORT_COLUMN),
        (20, "Shadow Starts / Job Id"),
        (30, "Non Success Shadows (NSS)"),
        (50, "% Jobs w/ >1 Shadow Starts"),
        (60, "% Jobs w/ >0 Input Xfer Errs"),
        (70, "% NSS due to Input Xfer Errs"),
    ]);
    match table {
        AggTable::Users => {
            cols.insert(5, "Most Used Project").insert(175, "Most Used Schedd");
        }
        AggTable::Projects => {
            cols.insert(5, "Num Users");
        }
        _ => {}
    }
    cols
}

fn pct_or_na(n: f64, d: f64) -> Cell {
    if d > 0.0 {
        Cell::Float(100.0 * n / d)
    } else {
        Cell::text("n/a")
    }
}

fn retry_row(table: AggTable, ads: &[&JobAd]) -> Row {
    let n = ads.len() as f64;
    let mut nss = 0.0;
    let mut multi_shadow = 0usize;
    let mut input_holds = 0.0;
    let mut input_hold_jobs = 0usize;

    for ad in ads {
        if let (Some(shadows), Some(_)) = (ad.num_shadow_starts, ad.job_status) {
            multi_shadow += usize::from(shadows > 1.0);
            // the last shadow of a job that was not removed is taken as the successful one
            nss += if ad.is_removed() { shadows } else { (shadows - 1.0).max(0.0) };
        }
        if let Some(reasons) = &ad.num_holds_by_reason {
            let holds: f64 = INPUT_TRANSFER_HOLDS.iter().filter_map(|r| reasons.get(*r)).map(|v| v.trunc()).sum();
            input_holds += holds;
            input_hold_jobs += usize::from(holds > 0.0);
        }
    }
    let shadows: f64 = ads.iter().filter_map(|a| a.num_shadow_starts).sum();

    let mut row = Row::new();
    row.set(SORT_COLUMN, ads.len())
        .set("Non Success Shadows (NSS)", Cell::number(nss))
        .set(
            "Shadow Starts / Job Id",
            if n > 0.0 { Cell::Float(shadows / n) } else { Cell::text("n/a") },
        )
        .set("% Jobs w/ >1 Shadow Starts", pct_or_na(multi_shadow as f64, n))
        .set("% Jobs w/ >0 Input Xfer Errs", pct_or_na(input_hold_jobs as f64, n))
        .set("% NSS due to Input Xfer Errs", pct_or_na(input_holds, nss));

    match table {
        AggTable::Users => {
            let projects: Vec<String> = ads.iter().map(|a| a.group_key(GroupField::Project)).collect();
            let schedds: Vec<String> = ads.iter().map(|a| a.group_key(GroupField::Schedd)).collect();
            row.set("Most Used Project", mode(projects.iter().map(String::as_str)));
            row.set("Most Used Schedd", mode(schedds.iter().map(String::as_str)));
        }
        AggTable::Projects => {
            row.set("Num Users", distinct(ads.iter().map(|a| a.user.as_deref())));
        }
        _ => {}
    }
    row
}

pub struct OsgRetryFilter {
    pool: PoolMembership,
    data: GroupedAds,
}

impl OsgRetryFilter {
    pub fn new(pool: PoolMembership) -> Self {
        Self { pool, data: GroupedAds::new() }
    }
}

impl ReportFilter for OsgRetryFilter {
    fn name(&self) -> &'static str {
        "OSG schedd retried job history"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::OsgRetry
    }

    fn query(&self, window: &TimeWindow) -> ScanQuery {
        let q = bool_filter(
            vec![
                range("RecordTime", window.start_ts, window.end_ts),
                range_gt("NumShadowStarts", 0),
                term("JobUniverse", UNIVERSE_VANILLA),
            ],
            vec![],
        );
        ScanQuery::new(search_body(q, None))
    }

    fn accept(&mut self, ad: &JobAd) {
        if !self.pool.is_ospool_job(ad) {
            return;
        }
        self.data.add(
            ad,
            [
                (AggTable::Schedds, ad.group_key(GroupField::Schedd)),
                (AggTable::Users, ad.group_key(GroupField::User)),
                (AggTable::Projects, ad.group_key(GroupField::Project)),
            ],
        );
    }

    fn tables(&self) -> Vec<AggTable> {
        vec![AggTable::Projects, AggTable::Users, AggTable::Schedds]
    }

    fn merge(&self, table: AggTable) -> Result<Table, FilterError> {
        if !self.tables().contains(&table) {
            return Err(FilterError::NoSuchTable { filter: self.name(), table });
        }
        let mut t = merge_grouped(table, self.data.groups(table), &columns(table), Some(SORT_COLUMN), true, |_, ads| {
            retry_row(table, ads)
        });
        t.rename_column(SORT_COLUMN, JOB_COUNT_COLUMN);
        Ok(t)
    }

    fn sort_column(&self) -> Option<&'static str> {
        Some(SORT_COLUMN)
    }

    fn group_counts(&self) -> BTreeMap<AggTable, BTreeMap<String, usize>> {
        self.data.counts()
    }

    fn finish(&mut self) -> Result<(), FilterError> {
        self.pool.save()?;
        Ok(())
    }
}
