//! Per-group usage tally shared by the CPU and GPU history reports.
//!
//! [`usage_row`] computes every usage column for a slice of ads; the table
//! header decides which of them end up in the merged table.

use std::collections::BTreeSet;

use acct_core::job::GroupField;
use acct_core::stats::{max_or_missing, mean, median, mode, percent, ratio, LongJobStats};
use acct_core::{AggTable, Cell, JobAd, UNKNOWN};

use crate::grouped::Row;

/// Activation metrics are trusted only for jobs started after this.
const ACTIVATION_CUTOFF: f64 = 1_640_100_600.0;
const DAY: f64 = 86_400.0;

/// HTCondor release that started reporting OSDF transfer stats.
const OSDF_STATS_VERSION: (u32, u32, u32) = (9, 7, 0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsageOptions {
    /// Add GPU hour columns; CPU hours then also need `RequestGpus`.
    pub gpu: bool,
    /// Count resumable on-exit-or-evict jobs as checkpointable.
    pub include_resumable: bool,
}

impl UsageOptions {
    pub const CPU: UsageOptions = UsageOptions { gpu: false, include_resumable: false };
    pub const GPU: UsageOptions = UsageOptions { gpu: true, include_resumable: true };
}

/* ---------------- transfer stats ---------------- */

#[derive(Default)]
struct Transfers {
    in_files: f64,
    in_bytes: f64,
    in_starts: f64,
    any_in_starts: bool,
    out_files: f64,
    out_bytes: f64,
    out_jobs: f64,
    osdf_files: f64,
    osdf_bytes: f64,
}

/// Sum one `Transfer*Stats` map: `(files, bytes)`, adding OSDF counters to
/// `t` on the way. `fallback_bytes` is used when no Cedar byte count exists.
fn sum_stats(
    stats: &std::collections::BTreeMap<String, f64>,
    fallback_bytes: f64,
    t: &mut Transfers,
) -> (f64, f64) {
    let (mut files, mut bytes, mut got_cedar) = (0.0, 0.0, false);
    for (attr, v) in stats {
        let key = attr.to_lowercase();
        if key == "stashfilescounttotal" || key == "osdffilescounttotal" {
            t.osdf_files += v;
        }
        if key == "stashsizebytestotal" || key == "osdfsizebytestotal" {
            t.osdf_bytes += v;
        }
        if key.ends_with("filescounttotal") {
            files += v;
        } else if key.ends_with("sizebytestotal") {
            bytes += v;
            got_cedar |= key == "cedarsizebytestotal";
        }
    }
    if !got_cedar {
        bytes += fallback_bytes;
    }
    (files, bytes)
}

impl Transfers {
    fn add(&mut self, ad: &JobAd) {
        if ad.has_no_shadow() {
            return;
        }
        if let Some(stats) = &ad.transfer_input_stats {
            let (f, b) = sum_stats(stats, ad.bytes_recvd.unwrap_or(0.0), self);
            self.in_files += f;
            self.in_bytes += b;
            if let Some(starts) = ad.num_job_starts {
                self.in_starts += starts;
                self.any_in_starts |= starts != 0.0;
            }
        }
        if let Some(stats) = &ad.transfer_output_stats {
            let (f, b) = sum_stats(stats, ad.bytes_sent.unwrap_or(0.0), self);
            self.out_files += f;
            self.out_bytes += b;
            self.out_jobs += 1.0;
        }
    }

    fn write(&self, ads: &[&JobAd], row: &mut Row) {
        let (mut total_files, mut total_bytes) = (0.0, 0.0);
        let mut xferd: Option<f64> = None;
        let mut in_per_att = Cell::Missing;
        let mut out_per_job = Cell::Missing;

        if self.any_in_starts {
            total_files += self.in_files;
            total_bytes += self.in_bytes;
            if self.in_starts > 0.0 {
                in_per_att = Cell::Float(self.in_files / self.in_starts);
            }
            if self.in_files > 0.0 {
                xferd = Some(xferd.unwrap_or(0.0) + self.in_files);
            }
        }
        if self.out_jobs > 0.0 {
            total_files += self.out_files;
            total_bytes += self.out_bytes;
            out_per_job = Cell::Float(self.out_files / self.out_jobs);
            if self.out_files > 0.0 {
                xferd = Some(xferd.unwrap_or(0.0) + self.out_files);
            }
        }
        row.set("Input Files / Exec Att", in_per_att);
        row.set("Output Files / Job", out_per_job);
        row.set("Total Files Xferd", xferd.map_or(Cell::Missing, Cell::number));

        let osdf = ["OSDF Files Xferd", "% OSDF Files", "% OSDF Bytes"];
        if self.osdf_files == 0.0 || self.osdf_bytes == 0.0 {
            let pre_osdf = ads
                .iter()
                .filter_map(|a| a.condor_version())
                .all(|v| v < OSDF_STATS_VERSION);
            for col in osdf {
                row.set(col, if pre_osdf { Cell::text("-") } else { Cell::Int(0) });
            }
        } else {
            row.set(osdf[0], Cell::number(self.osdf_files));
            if total_files > 0.0 && total_bytes > 0.0 {
                row.set(osdf[1], 100.0 * self.osdf_files / total_files);
                row.set(osdf[2], 100.0 * self.osdf_bytes / total_bytes);
            } else {
                row.set(osdf[1], Cell::Blank);
                row.set(osdf[2], Cell::Blank);
            }
        }
    }
}

/* ---------------- the tally ---------------- */

#[derive(Default)]
struct Counts {
    dag: usize,
    removed: usize,
    held: usize,
    over_disk: usize,
    restarted: usize,
    short: usize,
    local: usize,
    sched: usize,
    ckpt: usize,
    sty: usize,
}

fn max_of<I: IntoIterator<Item = Option<f64>>>(values: I) -> Option<f64> {
    values.into_iter().flatten().reduce(f64::max)
}

fn activation_start(ad: &JobAd) -> Option<f64> {
    ad.job_current_start_date.filter(|d| *d != 0.0).or(ad.job_start_date)
}

/// Every usage column for `ads`.
pub fn usage_row(ads: &[&JobAd], opts: UsageOptions) -> Row {
    let n = ads.len() as f64;

    let (mut all_cpu, mut good_cpu, mut bad_cpu) = (0.0, 0.0, 0.0);
    let (mut all_gpu, mut good_gpu, mut bad_gpu) = (0.0, 0.0, 0.0);
    let mut bad_starts = 0.0;
    let (mut exec_atts, mut shadow_starts, mut holds) = (0.0, 0.0, 0.0);
    let mut c = Counts::default();
    let mut long_times = Vec::new();
    let mut used_mem = Vec::new();
    let (mut act, mut setup) = (Vec::new(), Vec::new());
    let mut xfer = Transfers::default();

    for ad in ads {
        let cpus = ad.cpus();
        let gpus = if opts.gpu { ad.request_gpus } else { Some(1.0) };
        if let (Some(nc), Some(ng)) = (cpus, gpus) {
            if let Some(t) = ad.remote_wall_clock_time {
                all_cpu += t * nc;
                all_gpu += t * ng;
            }
            if let Some(t) = ad.committed_time {
                good_cpu += t * nc;
                good_gpu += t * ng;
            }
        }
        if let Some((secs, starts)) = ad.badput() {
            if let (Some(nc), Some(ng)) = (cpus, gpus) {
                bad_cpu += secs * nc;
                bad_gpu += secs * ng;
            }
            bad_starts += starts;
        }

        if !ad.has_no_shadow() {
            exec_atts += ad.num_job_starts.unwrap_or(0.0);
            shadow_starts += ad.num_shadow_starts.unwrap_or(0.0);
        }
        holds += ad.num_holds.unwrap_or(0.0);

        c.dag += usize::from(ad.is_dag_node());
        c.removed += usize::from(ad.is_removed());
        c.held += usize::from(ad.num_holds.is_some_and(|h| h > 0.0));
        let disk_req = ad.request_disk.filter(|r| *r != 0.0).unwrap_or(1.0);
        c.over_disk += usize::from(ad.disk_usage.unwrap_or(0.0) > disk_req);
        c.restarted += usize::from(ad.num_job_starts.is_some_and(|s| s > 1.0));
        c.short += usize::from(ad.is_short() == Some(true));
        c.local += usize::from(ad.universe() == acct_core::job::UNIVERSE_LOCAL);
        c.sched += usize::from(ad.universe() == acct_core::job::UNIVERSE_SCHEDULER);
        c.ckpt += usize::from(ad.is_checkpointable(opts.include_resumable));
        c.sty += usize::from(ad.singularity_image.is_some());

        if ad.is_short() == Some(false) && !ad.has_no_shadow() && !ad.is_removed() {
            if let Some(t) = ad.committed_time {
                long_times.push(t);
            }
        }
        if let Some(m) = ad.memory_usage {
            used_mem.push(m);
        }
        if let (Some(start), Some(a), Some(s)) =
            (activation_start(ad), ad.activation_duration, ad.activation_setup_duration)
        {
            if start > ACTIVATION_CUTOFF && a < ACTIVATION_CUTOFF - DAY && s < ACTIVATION_CUTOFF - DAY {
                act.push(a);
                setup.push(s);
            }
        }
        xfer.add(ad);
    }

    let mut row = Row::new();
    row.set("Num Uniq Job Ids", ads.len())
        .set("All CPU Hours", all_cpu / 3600.0)
        .set("Good CPU Hours", good_cpu / 3600.0)
        .set("% Good CPU Hours", percent(good_cpu, all_cpu))
        .set("CPU Hours / Bad Exec Att", ratio(bad_cpu / 3600.0, bad_starts))
        .set("Num Exec Atts", Cell::number(exec_atts))
        .set("Num Shadw Starts", Cell::number(shadow_starts))
        .set("Num Job Holds", Cell::number(holds))
        .set("Num DAG Node Jobs", c.dag)
        .set("Num Rm'd Jobs", c.removed)
        .set("Num Jobs w/1+ Holds", c.held)
        .set("Num Jobs Over Rqst Disk", c.over_disk)
        .set("Num Jobs w/>1 Exec Att", c.restarted)
        .set("Num Short Jobs", c.short)
        .set("Num Local Univ Jobs", c.local)
        .set("Num Sched Univ Jobs", c.sched)
        .set("Num Ckpt Able Jobs", c.ckpt)
        .set("Num S'ty Jobs", c.sty)
        .set("Shadw Starts / Job Id", ratio(shadow_starts, n))
        .set("Holds / Job Id", ratio(holds, n))
        .set("% Rm'd Jobs", percent(c.removed as f64, n))
        .set("% Short Jobs", percent(c.short as f64, n))
        .set("% Jobs w/>1 Exec Att", percent(c.restarted as f64, n))
        .set("% Jobs w/1+ Holds", percent(c.held as f64, n))
        .set("% Jobs Over Rqst Disk", percent(c.over_disk as f64, n))
        .set("% Ckpt Able", percent(c.ckpt as f64, n))
        .set("% Jobs using S'ty", percent(c.sty as f64, n))
        .set("Exec Atts / Shadw Start", ratio(exec_atts, shadow_starts))
        .set("Max Rqst Mem MB", max_or_missing(ads.iter().map(|a| a.request_memory)))
        .set("Med Used Mem MB", median(&used_mem).map_or(Cell::Missing, Cell::number))
        .set("Max Used Mem MB", max_or_missing(ads.iter().map(|a| a.memory_usage)))
        .set("Max Rqst Disk GB", max_of(ads.iter().map(|a| a.request_disk)).map_or(Cell::Missing, |d| Cell::Float(d / 1e6)))
        .set("Max Used Disk GB", max_of(ads.iter().map(|a| a.disk_usage)).map_or(Cell::Missing, |d| Cell::Float(d / 1e6)))
        .set("Max Rqst Cpus", max_or_missing(ads.iter().map(|a| a.request_cpus)))
        .set("Mean Actv Hrs", mean(&act).map_or(Cell::Blank, |m| Cell::Float(m / 3600.0)))
        .set("Mean Setup Secs", mean(&setup).map_or(Cell::Blank, Cell::Float));

    if opts.gpu {
        row.set("All GPU Hours", all_gpu / 3600.0)
            .set("Good GPU Hours", good_gpu / 3600.0)
            .set("% Good GPU Hours", percent(good_gpu, all_gpu))
            .set("GPU Hours / Bad Exec Att", ratio(bad_gpu / 3600.0, bad_starts))
            .set("Max Rqst Gpus", max_or_missing(ads.iter().map(|a| a.request_gpus)));
    }

    let s = LongJobStats::from_unsorted(long_times);
    row.set("Min Hrs", s.min)
        .set("25% Hrs", s.p25)
        .set("Med Hrs", s.median)
        .set("75% Hrs", s.p75)
        .set("95% Hrs", s.p95)
        .set("Max Hrs", s.max)
        .set("Mean Hrs", s.mean)
        .set("Std Hrs", s.std);

    xfer.write(ads, &mut row);
    row
}

/// Usage row for tables that only keep a job's final execution attempt:
/// "All" hours count committed time only.
pub fn final_attempt_row(ads: &[&JobAd], opts: UsageOptions) -> Row {
    let mut row = usage_row(ads, opts);
    for (all, good) in [("All CPU Hours", "Good CPU Hours"), ("All GPU Hours", "Good GPU Hours")] {
        if let Some(v) = row.get(good).cloned() {
            row.set(all, v);
        }
    }
    row
}

/// Number of distinct values, with "absent" counted as one value.
pub fn distinct<'a, I: IntoIterator<Item = Option<&'a str>>>(values: I) -> usize {
    values.into_iter().collect::<BTreeSet<_>>().len()
}

/// Columns every per-dimension table adds on top of its usage columns:
/// the busiest project and schedd for a user, the user count for a project.
pub fn add_group_extras(table: AggTable, ads: &[&JobAd], row: &mut Row) {
    match table {
        AggTable::Users => {
            let most_used = [("Most Used Project", GroupField::Project), ("Most Used Schedd", GroupField::Schedd)];
            for (column, field) in most_used {
                // missing values count as UNKNOWN
                let keys: Vec<String> = ads.iter().map(|a| a.group_key(field)).collect();
                row.set(column, mode(keys.iter().map(String::as_str)));
            }
        }
        AggTable::Projects => {
            row.set("Num Users", distinct(ads.iter().map(|a| a.user.as_deref())));
        }
        _ => {}
    }
}

/// Site label for the GPU report: the execute host when it is on campus,
/// else the schedd the job came through.
pub fn campus_site(ad: &JobAd) -> String {
    let host = ad.last_remote_host.as_deref().filter(|h| !h.is_empty()).unwrap_or(UNKNOWN);
    let host = host.rsplit('@').next().unwrap_or(host);
    if host.to_lowercase().contains("wisc.edu") {
        host.to_string()
    } else {
        format!("OSG via {}", ad.schedd_name.as_deref().unwrap_or(UNKNOWN))
    }
}
