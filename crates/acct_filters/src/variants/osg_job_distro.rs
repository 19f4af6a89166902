//! Memory × disk request histogram of single-core OSG Connect jobs.

use std::collections::BTreeMap;

use acct_core::job::UNIVERSE_VANILLA;
use acct_core::{AggTable, Cell, JobAd, Table, TimeWindow};
use acct_io::query::{bool_filter, range, search_body, term};
use acct_io::search::ScanQuery;

use crate::{FilterError, FilterKind, PoolMembership, ReportFilter};

/// Access points whose jobs are counted.
pub const OSG_CONNECT_APS: [&str; 6] = [
    "login04.osgconnect.net",
    "login05.osgconnect.net",
    "login-test.osgconnect.net",
    "ap2007.chtc.wisc.edu",
    "ap7.chtc.wisc.edu",
    "ap7.chtc.wisc.edu@ap2007.chtc.wisc.edu",
];

/// Lower bounds of the disk columns, in GB; the last one is open-ended.
const DISK_BUCKETS: [u32; 11] = [0, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20];
/// Lower bounds of the memory rows, in GB; the last one is open-ended.
const MEMORY_BUCKETS: [u32; 9] = [0, 1, 2, 3, 4, 5, 6, 7, 8];

fn bucket(value_gb: f64, bounds: &[u32]) -> u32 {
    let v = value_gb.trunc();
    bounds.iter().copied().take_while(|b| v >= f64::from(*b)).last().unwrap_or(0)
}

/// Disk bucket of a `RequestDisk` value in KB.
pub fn disk_bucket(kb: f64) -> u32 {
    bucket(kb / (1024.0 * 1024.0), &DISK_BUCKETS)
}

/// Memory bucket of a `RequestMemory` value in MB.
pub fn memory_bucket(mb: f64) -> u32 {
    bucket(mb / 1024.0, &MEMORY_BUCKETS)
}

fn label(bounds: &[u32], i: usize) -> String {
    match bounds.get(i + 1) {
        Some(next) => format!("[{}, {next})", bounds[i]),
        None => format!("[{},)", bounds[i]),
    }
}

#[derive(Default)]
struct Histogram {
    /// (disk, memory) bucket → jobs
    cells: BTreeMap<(u32, u32), u64>,
    total: u64,
    single: u64,
}

pub struct OsgJobDistroFilter {
    pool: PoolMembership,
    hist: Histogram,
}

impl OsgJobDistroFilter {
    pub fn new(pool: PoolMembership) -> Self {
        Self { pool, hist: Histogram::default() }
    }
}

impl ReportFilter for OsgJobDistroFilter {
    fn name(&self) -> &'static str {
        "OSG schedd job distribution"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::OsgJobDistro
    }

    fn query(&self, window: &TimeWindow) -> ScanQuery {
        let q = bool_filter(
            vec![range("RecordTime", window.start_ts, window.end_ts), term("JobUniverse", UNIVERSE_VANILLA)],
            vec![],
        );
        ScanQuery::new(search_body(q, None))
    }

    fn accept(&mut self, ad: &JobAd) {
        if !OSG_CONNECT_APS.contains(&ad.submit_host()) {
            return;
        }
        if !self.pool.is_ospool_job(ad) {
            return;
        }
        self.hist.total += 1;
        if ad.request_cpus.unwrap_or(1.0) > 1.0 {
            return;
        }
        let (Some(disk), Some(mem)) = (ad.request_disk, ad.request_memory) else {
            return;
        };
        *self.hist.cells.entry((disk_bucket(disk), memory_bucket(mem))).or_default() += 1;
        self.hist.single += 1;
    }

    fn tables(&self) -> Vec<AggTable> {
        vec![AggTable::Jobs]
    }

    fn merge(&self, table: AggTable) -> Result<Table, FilterError> {
        if table != AggTable::Jobs {
            return Err(FilterError::NoSuchTable { filter: self.name(), table });
        }
        let h = &self.hist;
        let mut header = vec![format!("{}/{}", h.single, h.total)];
        header.extend((0..DISK_BUCKETS.len()).map(|i| label(&DISK_BUCKETS, i)));
        let mut t = Table::new(header);

        for (mi, mem) in MEMORY_BUCKETS.iter().enumerate() {
            let mut row = vec![Cell::text(label(&MEMORY_BUCKETS, mi))];
            for disk in DISK_BUCKETS {
                let n = h.cells.get(&(disk, *mem)).copied().unwrap_or(0);
                let pct = if h.single == 0 { 0.0 } else { 100.0 * n as f64 / h.single as f64 };
                row.push(Cell::number(pct));
            }
            t.rows.push(row);
        }
        Ok(t)
    }

    fn sort_column(&self) -> Option<&'static str> {
        None
    }

    fn group_counts(&self) -> BTreeMap<AggTable, BTreeMap<String, usize>> {
        if self.hist.total == 0 {
            return BTreeMap::new();
        }
        let jobs = BTreeMap::from([
            ("total".to_string(), self.hist.total as usize),
            ("single core".to_string(), self.hist.single as usize),
        ]);
        BTreeMap::from([(AggTable::Jobs, jobs)])
    }

    fn finish(&mut self) -> Result<(), FilterError> {
        self.pool.save()?;
        Ok(())
    }
}
