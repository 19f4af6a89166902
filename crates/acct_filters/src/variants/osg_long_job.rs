//! OSPool long job report: each user's longest job over three hours.

use std::collections::BTreeMap;
use std::rc::Rc;

use acct_core::job::{label_or_unknown, GroupField, UNIVERSE_VANILLA};
use acct_core::{AggTable, Cell, ColumnSet, JobAd, Table, TimeWindow, UNKNOWN};
use acct_io::query::{bool_filter, range, range_gt, search_body, term};
use acct_io::search::ScanQuery;

use crate::{merge_grouped, FilterError, FilterKind, PoolMembership, ReportFilter, Row};

/// Jobs shorter than this (committed seconds) are not scanned.
pub const LONG_JOB_SECS: i64 = 3 * 3600;

const SORT_COLUMN: &str = "All CPU Hours";
const LAST_WALL_COLUMN: &str = "Last Wall Hrs";

const MIB: f64 = 1024.0;
const GIB_KB: f64 = 1024.0 * 1024.0;

fn columns() -> ColumnSet {
    ColumnSet::from([
        (5, "Project"),
        (10, SORT_COLUMN),
        (20, "Total Wall Hrs"),
        (30, "Potent CPU Hrs"),
        (40, "Actual CPU Hrs"),
        (50, "% CPU Eff"),
        (100, "Job Id"),
        (110, "Access Point"),
        (120, "Project"),
        (200, "Last Site"),
        (210, "Last Wrkr Node"),
        (220, "Last Wrkr MIPS"),
        (300, "Num Exec Atts"),
        (310, "Num Shadw Starts"),
        (330, "Num Holds"),
        (400, "Rqst Cpus"),
        (405, "CPUs Used"),
        (410, "Rqst Gpus"),
        (420, "Rqst Mem GB"),
        (425, "Mem Used GB"),
        (430, "Rqst Disk GB"),
        (435, "Disk Used GB"),
        (440, "MB Sent"),
        (450, "MB Recvd"),
    ])
}

fn num(v: Option<f64>) -> Cell {
    v.map_or(Cell::Missing, Cell::number)
}

fn scaled(v: Option<f64>, div: f64) -> Cell {
    v.map_or(Cell::Missing, |x| Cell::Float(x / div))
}

fn long_job_row(ad: &JobAd) -> Row {
    let last_wall = ad.committed_time.map(|t| t / 3600.0);
    let potent = last_wall.zip(ad.request_cpus).map(|(h, c)| h * c);
    let actual = last_wall.zip(ad.cpus_usage).map(|(h, c)| h * c);
    let eff = match (ad.cpus_usage, ad.request_cpus) {
        (Some(used), Some(req)) if req != 0.0 => Cell::Float(100.0 * used / req),
        _ => Cell::Missing,
    };

    let mut row = Row::new();
    row.set(SORT_COLUMN, scaled(ad.committed_time, 3600.0))
        .set("Total Wall Hrs", scaled(ad.remote_wall_clock_time, 3600.0))
        .set("Potent CPU Hrs", potent.map_or(Cell::Missing, Cell::Float))
        .set("Actual CPU Hrs", actual.map_or(Cell::Missing, Cell::Float))
        .set("% CPU Eff", eff)
        .set("Job Id", ad.job_id().unwrap_or(UNKNOWN))
        .set("Access Point", ad.group_key(GroupField::Schedd))
        .set("Project", ad.group_key(GroupField::Project))
        .set("Last Site", label_or_unknown(ad.match_exp_job_glidein_resource_name.as_deref()))
        .set("Last Wrkr Node", ad.execute_host().unwrap_or(UNKNOWN))
        .set(
            "Last Wrkr MIPS",
            ad.machine_attr_mips0.filter(|m| *m != 0.0).map_or(Cell::text("n/a"), Cell::number),
        )
        .set("Num Exec Atts", Cell::number(ad.num_job_starts.unwrap_or(0.0)))
        .set("Num Shadw Starts", Cell::number(ad.num_shadow_starts.unwrap_or(0.0)))
        .set("Num Holds", Cell::number(ad.num_holds.unwrap_or(0.0)))
        .set("Rqst Cpus", num(ad.request_cpus))
        .set("CPUs Used", num(ad.cpus_usage))
        .set("Rqst Gpus", Cell::number(ad.request_gpus.unwrap_or(0.0)))
        .set("Rqst Mem GB", scaled(ad.request_memory, MIB))
        .set("Mem Used GB", scaled(ad.memory_usage, MIB))
        .set("Rqst Disk GB", scaled(ad.request_disk, GIB_KB))
        .set("Disk Used GB", scaled(ad.disk_usage, GIB_KB))
        .set("MB Sent", scaled(ad.bytes_sent, MIB * MIB))
        .set("MB Recvd", scaled(ad.bytes_recvd, MIB * MIB));
    row
}

pub struct OsgLongJobFilter {
    pool: PoolMembership,
    /// One ad per user: the one with the most committed time seen so far.
    longest: BTreeMap<String, Vec<Rc<JobAd>>>,
}

impl OsgLongJobFilter {
    pub fn new(pool: PoolMembership) -> Self {
        Self { pool, longest: BTreeMap::new() }
    }
}

impl ReportFilter for OsgLongJobFilter {
    fn name(&self) -> &'static str {
        "OSG schedd long job history"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::OsgLongJob
    }

    fn query(&self, window: &TimeWindow) -> ScanQuery {
        let q = bool_filter(
            vec![
                range("RecordTime", window.start_ts, window.end_ts),
                range_gt("CommittedTime", LONG_JOB_SECS),
                term("JobUniverse", UNIVERSE_VANILLA),
            ],
            vec![],
        );
        ScanQuery::new(search_body(q, None)).with_page(500, "5s")
    }

    fn accept(&mut self, ad: &JobAd) {
        if !self.pool.is_ospool_job(ad) {
            return;
        }
        let slot = self.longest.entry(ad.group_key(GroupField::User)).or_default();
        if let Some(kept) = slot.first() {
            if let Some(best) = kept.committed_time {
                if ad.committed_time.unwrap_or(0.0) < best {
                    return;
                }
            }
        }
        *slot = vec![Rc::new(ad.clone())];
    }

    fn tables(&self) -> Vec<AggTable> {
        vec![AggTable::Users]
    }

    fn merge(&self, table: AggTable) -> Result<Table, FilterError> {
        if table != AggTable::Users {
            return Err(FilterError::NoSuchTable { filter: self.name(), table });
        }
        let mut t = merge_grouped(table, Some(&self.longest), &columns(), Some(SORT_COLUMN), false, |_, ads| {
            ads.first().map(|ad| long_job_row(ad)).unwrap_or_default()
        });
        t.rename_column(SORT_COLUMN, LAST_WALL_COLUMN);
        Ok(t)
    }

    fn sort_column(&self) -> Option<&'static str> {
        Some(SORT_COLUMN)
    }

    fn group_counts(&self) -> BTreeMap<AggTable, BTreeMap<String, usize>> {
        let users = self.longest.iter().map(|(k, v)| (k.clone(), v.len())).collect::<BTreeMap<_, _>>();
        if users.is_empty() {
            BTreeMap::new()
        } else {
            BTreeMap::from([(AggTable::Users, users)])
        }
    }

    fn finish(&mut self) -> Result<(), FilterError> {
        self.pool.save()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acct_core::ReportPeriod;
    use serde_json::json;

    fn ad(v: serde_json::Value) -> JobAd {
        let mut v = v;
        v["LastRemotePool"] = json!("cm-2.ospool.osg-htc.org");
        JobAd::from_value(&v).unwrap()
    }

    #[test]
    fn query_pages_are_small() {
        let q = OsgLongJobFilter::new(PoolMembership::default()).query(&TimeWindow::new(0, 1, ReportPeriod::Daily));
        assert_eq!(q.page_size, 500);
        assert_eq!(q.scroll, "5s");
        assert_eq!(q.body["query"]["bool"]["filter"][1]["range"]["CommittedTime"]["gt"], json!(10800));
    }

    #[test]
    fn keeps_the_longest_job_per_user() {
        let mut f = OsgLongJobFilter::new(PoolMembership::default());
        f.accept(&ad(json!({"User": "a", "CommittedTime": 20000, "GlobalJobId": "ap1#1.0#1"})));
        f.accept(&ad(json!({"User": "a", "CommittedTime": 36000, "GlobalJobId": "ap1#2.0#1"})));
        f.accept(&ad(json!({"User": "a", "CommittedTime": 15000, "GlobalJobId": "ap1#3.0#1"})));
        f.accept(&ad(json!({"User": "b", "CommittedTime": 18000, "GlobalJobId": "ap2#9.0#1"})));

        let t = f.merge(AggTable::Users).unwrap();
        assert!(!t.has_total_row());
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.header[2], LAST_WALL_COLUMN);
        assert_eq!(t.cell(0, "User"), Some(&Cell::text("a")));
        assert_eq!(t.cell(0, "Job Id"), Some(&Cell::text("2.0")));
        assert_eq!(t.cell(0, LAST_WALL_COLUMN), Some(&Cell::Float(10.0)));
        assert_eq!(f.group_counts()[&AggTable::Users]["a"], 1);
    }

    #[test]
    fn row_values_and_fallbacks() {
        let row = long_job_row(&ad(json!({
            "CommittedTime": 7200, "RequestCpus": 4, "CPUsUsage": 2, "RequestMemory": 2048,
            "RequestDisk": 1048576, "BytesSent": 1048576, "LastRemoteHost": "slot1@wn.example.edu",
            "ProjectName": "Proj",
        })));
        assert_eq!(row.get("Potent CPU Hrs"), Some(&Cell::Float(8.0)));
        assert_eq!(row.get("Actual CPU Hrs"), Some(&Cell::Float(4.0)));
        assert_eq!(row.get("% CPU Eff"), Some(&Cell::Float(50.0)));
        assert_eq!(row.get("Rqst Mem GB"), Some(&Cell::Float(2.0)));
        assert_eq!(row.get("Rqst Disk GB"), Some(&Cell::Float(1.0)));
        assert_eq!(row.get("MB Sent"), Some(&Cell::Float(1.0)));
        assert_eq!(row.get("Last Wrkr Node"), Some(&Cell::text("wn.example.edu")));
        assert_eq!(row.get("Last Wrkr MIPS"), Some(&Cell::text("n/a")));
        assert_eq!(row.get("Rqst Gpus"), Some(&Cell::Int(0)));
        assert_eq!(row.get("Num Holds"), Some(&Cell::Int(0)));
        assert_eq!(row.get("Mem Used GB"), Some(&Cell::Missing));
        assert_eq!(row.get("Project"), Some(&Cell::text("Proj")));
        assert_eq!(row.get("Job Id"), Some(&Cell::text(UNKNOWN)));
    }
}
