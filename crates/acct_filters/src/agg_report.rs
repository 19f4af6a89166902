//! Server-side aggregation report.
//!
//! Instead of scanning every ad, this mode asks the search backend for one
//! `terms` bucket per value of a keyword field (project, user, ...) with all
//! metrics computed as sub-aggregations. A second query without buckets
//! yields the `Totals` row; its ratios are computed here since pipeline
//! aggregations need a parent bucket.

use core::cmp::Ordering;

use acct_core::job::{UNIVERSE_LOCAL, UNIVERSE_SCHEDULER, UNIVERSE_VANILLA};
use acct_core::{Cell, Table, TimeWindow};
use acct_io::query::{
    bool_filter, bool_must, bool_should, bucket_script, exists, filter_agg, metric, percentiles, range,
    range_gt, range_lte, runtime_field, script_filter, term, terms, terms_agg, wildcard, with_sub_aggs,
};
use serde_json::{json, Map, Value};

use crate::FilterError;

pub const DEFAULT_AGG_INDEX: &str = "chtc-schedd-*";
pub const DEFAULT_AGG_FIELD: &str = "ProjectName.keyword";
pub const TOTALS_LABEL: &str = "Totals";

const GROUPS_AGG: &str = "groups";
const MAX_BUCKETS: usize = 1024;
const SCHEDD_PATTERN: &str = "*.chtc.wisc.edu";
const PERCENTS: [f64; 4] = [25.0, 50.0, 75.0, 95.0];
const JOB_COUNT_COLUMN: &str = "# Jobs";

/* ---------------- runtime fields ---------------- */

const CPU_CORE_HOURS_SRC: &str = r#"
    double hours = 0;
    int cpus = 1;
    if (doc.containsKey("RemoteWallClockTime") && doc["RemoteWallClockTime"].size() > 0) {
        hours = (double)doc["RemoteWallClockTime"].value / (double)3600;
    }
    if (doc.containsKey("RequestCpus") && doc["RequestCpus"].size() > 0) {
        cpus = (int)doc["RequestCpus"].value;
    }
    emit((double)cpus * hours);
"#;

const GOOD_CPU_CORE_HOURS_SRC: &str = r#"
    double hours = 0;
    int cpus = 1;
    if (doc.containsKey("lastremotewallclocktime.keyword") && doc["lastremotewallclocktime.keyword"].size() > 0) {
        hours = Double.parseDouble(doc["lastremotewallclocktime.keyword"].value) / (double)3600;
    }
    if (doc.containsKey("RequestCpus") && doc["RequestCpus"].size() > 0) {
        cpus = (int)doc["RequestCpus"].value;
    }
    emit((double)cpus * hours);
"#;

/// One job unit is 1 cpu, 4096 MB of memory or 4 GiB (in KB) of disk,
/// whichever request is largest.
const JOB_UNIT_HOURS_SRC: &str = r#"
    double unit_hours = 0;
    if (doc.containsKey("RequestCpus") && doc["RequestCpus"].size() > 0
        && doc.containsKey("RequestMemory") && doc["RequestMemory"].size() > 0
        && doc.containsKey("RequestDisk") && doc["RequestDisk"].size() > 0
        && doc.containsKey("RemoteWallClockTime") && doc["RemoteWallClockTime"].size() > 0) {
        double units = Math.max(
            Math.max(1, (int)doc["RequestCpus"].value) / 1.0,
            Math.max(
                Math.max(0, (int)doc["RequestMemory"].value) / 4096.0,
                Math.max(0, (long)doc["RequestDisk"].value) / 4194304.0));
        unit_hours = ((double)doc["RemoteWallClockTime"].value / (double)3600) * units;
    }
    emit(unit_hours);
"#;

const NUM_HOLDS_SRC: &str = r#"
    if (doc.containsKey("numholds.keyword") && doc["numholds.keyword"].size() > 0) {
        emit(Double.parseDouble(doc["numholds.keyword"].value));
    }
"#;

const ACTIVATION_HOURS_SRC: &str = r#"
    if (doc.containsKey("activationduration.keyword") && doc["activationduration.keyword"].size() > 0) {
        emit(Double.parseDouble(doc["activationduration.keyword"].value) / (double)3600);
    }
"#;

pub fn runtime_mappings() -> Map<String, Value> {
    [
        runtime_field("CpuCoreHours", "double", CPU_CORE_HOURS_SRC),
        runtime_field("GoodCpuCoreHours", "double", GOOD_CPU_CORE_HOURS_SRC),
        runtime_field("jobUnitHours", "double", JOB_UNIT_HOURS_SRC),
        runtime_field("numHolds", "double", NUM_HOLDS_SRC),
        runtime_field("ActivationDuration", "double", ACTIVATION_HOURS_SRC),
    ]
    .into_iter()
    .collect()
}

/* ---------------- columns ---------------- */

/// Operand of a ratio: a metric value or a filter bucket's document count.
#[derive(Clone, Copy, Debug)]
enum Part {
    Value(&'static str),
    DocCount(&'static str),
}

impl Part {
    fn bucket_path(self) -> String {
        match self {
            Part::Value(name) => name.to_string(),
            Part::DocCount(name) => format!("{name}._count"),
        }
    }

    fn read(self, aggs: &Value) -> Option<f64> {
        match self {
            Part::Value(name) => aggs.get(name)?.get("value")?.as_f64(),
            Part::DocCount(name) => aggs.get(name)?.get("doc_count")?.as_f64(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Source {
    /// Single-value metric read from the response.
    Metric(&'static str),
    /// One key of the `percentiles` aggregation.
    Percentile(&'static str),
    /// `num / den * scale`; a bucket script named `name` in grouped rows,
    /// computed locally for the totals row.
    Ratio { name: &'static str, num: Part, den: Part, scale: f64 },
}

struct Column {
    header: &'static str,
    source: Source,
}

const fn col(header: &'static str, source: Source) -> Column {
    Column { header, source }
}

const fn pct(name: &'static str, filter: &'static str) -> Source {
    Source::Ratio { name, num: Part::DocCount(filter), den: Part::Value("total_jobs"), scale: 100.0 }
}

const COLUMNS: [Column; 20] = [
    col("# Users", Source::Metric("uniq_users")),
    col(JOB_COUNT_COLUMN, Source::Metric("uniq_job_ids")),
    col("CPU Hours", Source::Metric("cpu_core_hours")),
    col(
        "% Goodput",
        Source::Ratio {
            name: "goodput_percent",
            num: Part::Value("good_core_hours"),
            den: Part::Value("cpu_core_hours"),
            scale: 100.0,
        },
    ),
    col("Job Unit Hours", Source::Metric("job_unit_hours")),
    col("% Ckptable", pct("ckptable_percent", "ckptable_filt")),
    col("% Removed", pct("rmd_percent", "rmd_filt")),
    col(
        "Shadow Starts / ID",
        Source::Ratio {
            name: "shadw_starts_per_id",
            num: Part::Value("num_shadw_starts"),
            den: Part::Value("total_jobs"),
            scale: 1.0,
        },
    ),
    col(
        "Exec Att / Shadow Start",
        Source::Ratio {
            name: "exec_att_per_shadw_start",
            num: Part::Value("num_exec_attempts"),
            den: Part::Value("num_shadw_starts"),
            scale: 1.0,
        },
    ),
    col(
        "Holds / ID",
        Source::Ratio {
            name: "hold_per_id",
            num: Part::Value("num_holds"),
            den: Part::Value("total_jobs"),
            scale: 1.0,
        },
    ),
    col("25.0% Hrs", Source::Percentile("25.0")),
    col("50.0% Hrs", Source::Percentile("50.0")),
    col("75.0% Hrs", Source::Percentile("75.0")),
    col("95.0% Hrs", Source::Percentile("95.0")),
    col("% Short", pct("percent_short_jobs", "short_jobs")),
    col("% Restarted", pct("percent_restarted", "restarted_jobs")),
    col("% Held", pct("percent_held", "held_jobs")),
    col("% Over Req. Disk", pct("percent_over_disk", "over_disk_jobs")),
    col("% S'ty Jobs", pct("percent_sty", "sty_jobs")),
    col("Mean Actv Hours", Source::Metric("mean_act_hrs")),
];

/// Label of the first column: the field name without its `.keyword` suffix.
pub fn field_label(field: &str) -> &str {
    field.split('.').next().unwrap_or(field)
}

pub fn columns(field: &str) -> Vec<String> {
    let mut header = vec![field_label(field).to_string()];
    header.extend(COLUMNS.iter().map(|c| c.header.to_string()));
    header
}

/* ---------------- queries ---------------- */

fn base_filter(window: &TimeWindow) -> Value {
    bool_filter(
        vec![
            range("RecordTime", window.start_ts, window.end_ts),
            wildcard("ScheddName.keyword", SCHEDD_PATTERN),
        ],
        vec![terms("JobUniverse", &[UNIVERSE_SCHEDULER, UNIVERSE_LOCAL])],
    )
}

fn checkpointable_filter() -> Value {
    let on_exit_or_evict =
        bool_must(vec![term("WhenToTransferOutput.keyword", "ON_EXIT_OR_EVICT"), term("Is_resumable", false)]);
    let exit_code = bool_must(vec![term("SuccessCheckpointExitBySignal", false), exists("SuccessCheckpointExitCode")]);
    bool_must(vec![term("JobUniverse", UNIVERSE_VANILLA), bool_should(vec![on_exit_or_evict, exit_code])])
}

/// Metrics and filter buckets shared by grouped rows and the totals query.
fn metric_aggs() -> Map<String, Value> {
    let mut aggs = Map::new();
    let mut add = |name: &str, agg: Value| {
        aggs.insert(name.to_string(), agg);
    };
    add("uniq_users", metric("cardinality", "User.keyword"));
    add("uniq_job_ids", metric("cardinality", "GlobalJobId.keyword"));
    add("total_jobs", metric("value_count", "GlobalJobId.keyword"));
    add("cpu_core_hours", metric("sum", "CpuCoreHours"));
    add("good_core_hours", metric("sum", "GoodCpuCoreHours"));
    add("job_unit_hours", metric("sum", "jobUnitHours"));
    add("num_shadw_starts", metric("sum", "NumShadowStarts"));
    add("num_exec_attempts", metric("sum", "NumJobStarts"));
    add("num_holds", metric("sum", "numHolds"));
    add("mean_act_hrs", metric("avg", "ActivationDuration"));
    add("percentiles", percentiles("CpuCoreHours", &PERCENTS));

    add("ckptable_filt", filter_agg(checkpointable_filter()));
    add("rmd_filt", filter_agg(term("JobStatus", 3)));
    add("short_jobs", filter_agg(range_lte("lastremotewallclocktime", 60)));
    add("restarted_jobs", filter_agg(range_gt("NumJobStarts", 1)));
    add("held_jobs", filter_agg(range_gt("numholds", 0)));
    add(
        "over_disk_jobs",
        filter_agg(bool_filter(vec![script_filter(r#"doc["DiskUsage"].value > doc["RequestDisk"].value"#)], vec![])),
    );
    add("sty_jobs", filter_agg(bool_filter(vec![exists("SingularityImage")], vec![])));
    aggs
}

/// Ratio columns as bucket scripts, evaluated per group by the backend.
fn ratio_scripts() -> Map<String, Value> {
    COLUMNS
        .iter()
        .filter_map(|c| match c.source {
            Source::Ratio { name, num, den, scale } => {
                let script = if scale == 1.0 {
                    "params.num / params.den".to_string()
                } else {
                    format!("params.num / params.den * {scale}")
                };
                let paths = [("num", num.bucket_path()), ("den", den.bucket_path())];
                let paths: Vec<(&str, &str)> = paths.iter().map(|(k, v)| (*k, v.as_str())).collect();
                Some((name.to_string(), bucket_script(&paths, &script)))
            }
            _ => None,
        })
        .collect()
}

fn body(window: &TimeWindow, aggs: Map<String, Value>) -> Value {
    json!({
        "query": base_filter(window),
        "size": 0,
        "track_scores": false,
        "runtime_mappings": runtime_mappings(),
        "aggs": aggs,
    })
}

/// Search body bucketing by `field`.
pub fn build_query(window: &TimeWindow, field: &str) -> Value {
    let mut subs = metric_aggs();
    subs.extend(ratio_scripts());
    let mut aggs = Map::new();
    aggs.insert(GROUPS_AGG.to_string(), with_sub_aggs(terms_agg(field, MAX_BUCKETS), subs));
    body(window, aggs)
}

/// Search body for the totals row: same metrics, no buckets.
pub fn totals_query(window: &TimeWindow) -> Value {
    body(window, metric_aggs())
}

/* ---------------- responses ---------------- */

fn read_cell(aggs: &Value, source: Source, totals: bool) -> Cell {
    let v = match source {
        Source::Metric(name) => Part::Value(name).read(aggs),
        Source::Percentile(key) => {
            aggs.get("percentiles").and_then(|p| p.get("values")).and_then(|v| v.get(key)).and_then(Value::as_f64)
        }
        Source::Ratio { name, .. } if !totals => Part::Value(name).read(aggs),
        Source::Ratio { num, den, scale, .. } => match (num.read(aggs), den.read(aggs)) {
            (Some(n), Some(d)) if d != 0.0 => Some(n / d * scale),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        },
    };
    v.map_or(Cell::Missing, Cell::number)
}

fn bucket_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One row per bucket of a [`build_query`] response, unsorted.
pub fn parse_buckets(resp: &Value) -> Result<Vec<Vec<Cell>>, FilterError> {
    let buckets = resp
        .pointer(&format!("/aggregations/{GROUPS_AGG}/buckets"))
        .and_then(Value::as_array)
        .ok_or_else(|| FilterError::BadResponse(format!("missing aggregations.{GROUPS_AGG}.buckets")))?;

    buckets
        .iter()
        .map(|b| {
            let key = b.get("key").ok_or_else(|| FilterError::BadResponse("bucket without a key".into()))?;
            let mut row = vec![Cell::text(bucket_label(key))];
            row.extend(COLUMNS.iter().map(|c| read_cell(b, c.source, false)));
            Ok(row)
        })
        .collect()
}

/// The `Totals` row of a [`totals_query`] response.
pub fn parse_totals(resp: &Value) -> Result<Vec<Cell>, FilterError> {
    let aggs = resp
        .get("aggregations")
        .filter(|a| a.is_object())
        .ok_or_else(|| FilterError::BadResponse("missing aggregations".into()))?;
    let mut row = vec![Cell::text(TOTALS_LABEL)];
    row.extend(COLUMNS.iter().map(|c| read_cell(aggs, c.source, true)));
    Ok(row)
}

/// Totals first, then groups by `# Jobs` descending.
pub fn build_table(field: &str, groups: &Value, totals: &Value) -> Result<Table, FilterError> {
    let mut rows = parse_buckets(groups)?;
    let jobs = COLUMNS.iter().position(|c| c.header == JOB_COUNT_COLUMN).map_or(1, |i| i + 1);
    rows.sort_by(|a, b| {
        let ka = a.get(jobs).and_then(Cell::as_f64).unwrap_or(f64::NEG_INFINITY);
        let kb = b.get(jobs).and_then(Cell::as_f64).unwrap_or(f64::NEG_INFINITY);
        kb.partial_cmp(&ka).unwrap_or(Ordering::Equal)
    });

    let mut t = Table::new(columns(field));
    t.rows.push(parse_totals(totals)?);
    t.rows.extend(rows);
    Ok(t)
}

/// Heading above each grouped table in the HTML body.
pub fn table_heading(field: &str, window: &TimeWindow) -> String {
    format!("CHTC Jobs by {} from {}", field_label(field), window.datetime_range().replacen(" to ", " TO ", 1))
}

pub fn subject(window: &TimeWindow) -> String {
    format!("{}-day CHTC Usage Report {} to {}", window.days(), window.date_label(), window.end_date_label())
}
