// crates/acct_pipeline/tests/runs.rs
//
// End-to-end runs against an in-memory search backend and a mail relay that
// only records what it was handed.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use acct_core::{Cell, ReportPeriod, Table, TimeWindow, TOTAL};
use acct_filters::{FilterKind, FilterSetup};
use acct_io::csv_io::write_table;
use acct_io::mail::MailRelay;
use acct_io::search::ScanQuery;
use acct_io::{IoError, IoResult, SearchBackend};
use acct_pipeline::agg::AGG_HTML_FILE;
use acct_pipeline::{
    render_from_csv, run_agg_report, run_error_report, run_report, AggSpec, PipelineError, RunContext,
    LAST_DATA_FILE, LAST_HTML_FILE,
};
use acct_report::ReportStyle;
use assert_json_diff::assert_json_include;
use serde_json::{json, Value};

/* ---------------- fakes ---------------- */

#[derive(Default)]
struct FakeBackend {
    hits: Vec<Value>,
    groups: Value,
    totals: Value,
    existing_indices: Vec<String>,
    scans: RefCell<Vec<(String, ScanQuery)>>,
    searches: RefCell<Vec<Value>>,
    created: RefCell<Vec<String>>,
    indexed: RefCell<Vec<(String, String, Value)>>,
}

impl SearchBackend for FakeBackend {
    fn scan(&self, index: &str, query: &ScanQuery, on_hit: &mut dyn FnMut(&Value)) -> IoResult<u64> {
        self.scans.borrow_mut().push((index.to_string(), query.clone()));
        for hit in &self.hits {
            on_hit(hit);
        }
        Ok(self.hits.len() as u64)
    }

    fn search(&self, _index: &str, body: &Value) -> IoResult<Value> {
        self.searches.borrow_mut().push(body.clone());
        if body.pointer("/aggs/groups").is_some() {
            Ok(self.groups.clone())
        } else {
            Ok(self.totals.clone())
        }
    }

    fn index_exists(&self, index: &str) -> IoResult<bool> {
        Ok(self.existing_indices.iter().any(|i| i == index) || self.created.borrow().iter().any(|i| i == index))
    }

    fn create_index(&self, index: &str, _body: &Value) -> IoResult<()> {
        self.created.borrow_mut().push(index.to_string());
        Ok(())
    }

    fn index_document(&self, index: &str, id: &str, body: &Value) -> IoResult<()> {
        self.indexed.borrow_mut().push((index.to_string(), id.to_string(), body.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingRelay {
    refuse: Option<&'static str>,
    sent: RefCell<Vec<(String, String, String)>>,
}

impl MailRelay for RecordingRelay {
    fn send(&self, server: &str, _from: &str, to: &str, message: &[u8]) -> IoResult<()> {
        if self.refuse == Some(to) {
            return Err(IoError::Mail(format!("550 {to} rejected")));
        }
        self.sent.borrow_mut().push((server.to_string(), to.to_string(), String::from_utf8_lossy(message).into_owned()));
        Ok(())
    }
}

/* ---------------- helpers ---------------- */

// 2024-03-14 UTC
const DAY_START: i64 = 1_710_374_400;

fn daily() -> TimeWindow {
    TimeWindow::new(DAY_START, DAY_START + 86_400, ReportPeriod::Daily)
}

fn context(dir: &tempfile::TempDir) -> RunContext {
    let mut ctx = RunContext::new(daily());
    ctx.csv_dir = dir.path().join("csv");
    ctx.work_dir = dir.path().to_path_buf();
    ctx.mail.to = vec!["ops@example.org".to_string()];
    ctx
}

fn history_hits() -> Vec<Value> {
    vec![
        json!({"_id": "a1", "_source": {"User": "alice", "RequestCpus": 2, "RemoteWallClockTime": 3600, "CommittedTime": 3600}}),
        json!({"_id": "b1", "_source": {"User": "bob", "RequestCpus": "1", "RemoteWallClockTime": 7200}}),
        json!({"_id": "zz", "_source": "not a job ad"}),
    ]
}

/* ---------------- report runs ---------------- */

#[test]
fn report_run_writes_mails_and_pushes() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let backend = FakeBackend { hits: history_hits(), ..Default::default() };
    let relay = RecordingRelay::default();
    let mut filter = FilterKind::Base.build(FilterSetup::default());

    let out = run_report(&ctx, &backend, filter.as_mut(), &relay).unwrap();

    assert_eq!(out.hits, 3);
    assert_eq!(out.bad_docs, 1);
    assert_eq!(backend.scans.borrow()[0].0, ctx.index);

    // one table, named after the filter and the window
    assert_eq!(out.csv_files, vec![ctx.csv_dir.join("job-history_Users_daily_2024-03-14.csv")]);
    let csv = fs::read_to_string(&out.csv_files[0]).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("User,All CPU Hours,"));
    assert!(lines.next().unwrap().starts_with("TOTAL,4.0000,"));

    let dump: Value = serde_json::from_str(&fs::read_to_string(dir.path().join(LAST_DATA_FILE)).unwrap()).unwrap();
    assert_eq!(dump, json!({"Users": {"alice": 1, "bob": 1}}));

    let html = fs::read_to_string(dir.path().join(LAST_HTML_FILE)).unwrap();
    assert_eq!(out.html_path, dir.path().join(LAST_HTML_FILE));
    assert!(html.contains("CHTC per User usage for jobs completed on <strong>2024-03-14</strong>"));
    assert!(html.contains("alice"));

    assert_eq!(out.subject, "CHTC Daily Usage Report 2024-03-14");
    let sent = relay.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "localhost");
    assert_eq!(sent[0].1, "ops@example.org");
    assert!(sent[0].2.contains("multipart/mixed"));
    assert_eq!(out.delivery.unwrap().delivered, vec!["ops@example.org".to_string()]);

    // totals index did not exist yet
    assert_eq!(*backend.created.borrow(), vec!["daily_totals".to_string()]);
    let indexed = backend.indexed.borrow();
    assert_eq!(indexed.len(), 1);
    let (index, id, doc) = &indexed[0];
    assert_eq!(index, "daily_totals");
    assert_eq!(id, "job-history_daily_2024-03-14");
    assert_eq!(out.totals_id.as_deref(), Some(id.as_str()));
    assert_json_include!(
        actual: doc,
        expected: json!({
            "all_cpu_hours": 4.0,
            "num_uniq_job_ids": 2,
            "num_users": 2,
            "query": "job-history",
            "report_period": "daily",
            "date": "2024-03-14"
        })
    );
}

#[test]
fn no_email_and_no_push_skip_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(&dir);
    ctx.no_email = true;
    ctx.no_push = true;
    let backend = FakeBackend { hits: history_hits(), ..Default::default() };
    let relay = RecordingRelay::default();
    let mut filter = FilterKind::Base.build(FilterSetup::default());

    let out = run_report(&ctx, &backend, filter.as_mut(), &relay).unwrap();

    assert!(out.delivery.is_none());
    assert!(out.totals_id.is_none());
    assert!(relay.sent.borrow().is_empty());
    assert!(backend.indexed.borrow().is_empty());
    assert!(out.csv_files[0].exists());
}

#[test]
fn existing_totals_index_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(&dir);
    ctx.no_email = true;
    let backend = FakeBackend {
        hits: history_hits(),
        existing_indices: vec!["daily_totals".to_string()],
        ..Default::default()
    };
    let mut filter = FilterKind::Base.build(FilterSetup::default());

    run_report(&ctx, &backend, filter.as_mut(), &RecordingRelay::default()).unwrap();

    assert!(backend.created.borrow().is_empty());
    assert_eq!(backend.indexed.borrow().len(), 1);
}

#[test]
fn mail_failure_does_not_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(&dir);
    ctx.mail.to.clear();
    let backend = FakeBackend { hits: history_hits(), ..Default::default() };
    let mut filter = FilterKind::Base.build(FilterSetup::default());

    let out = run_report(&ctx, &backend, filter.as_mut(), &RecordingRelay::default()).unwrap();

    assert!(out.delivery.is_none());
    assert!(out.totals_id.is_some());
}

#[test]
fn empty_scan_still_renders() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(&dir);
    ctx.no_email = true;
    let backend = FakeBackend::default();
    let mut filter = FilterKind::Base.build(FilterSetup::default());

    let out = run_report(&ctx, &backend, filter.as_mut(), &RecordingRelay::default()).unwrap();

    assert_eq!(out.hits, 0);
    assert!(out.html_path.exists());
    // no TOTAL row, nothing to push
    assert!(out.totals_id.is_none());
}

/* ---------------- aggregation ---------------- */

fn bucket(key: &str, jobs: f64) -> Value {
    json!({
        "key": key,
        "doc_count": jobs,
        "uniq_users": {"value": 1},
        "uniq_job_ids": {"value": jobs},
        "cpu_core_hours": {"value": jobs * 2.0},
        "goodput_percent": {"value": 50.0}
    })
}

#[test]
fn agg_report_tables_csv_and_html() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(&dir);
    ctx.window = TimeWindow::new(DAY_START - 7 * 86_400, DAY_START, ReportPeriod::Custom);
    let backend = FakeBackend {
        groups: json!({"aggregations": {"groups": {"buckets": [bucket("small", 2.0), bucket("big", 10.0)]}}}),
        totals: json!({"aggregations": {
            "uniq_users": {"value": 2},
            "uniq_job_ids": {"value": 12},
            "total_jobs": {"value": 12},
            "good_core_hours": {"value": 12.0},
            "cpu_core_hours": {"value": 24.0}
        }}),
        ..Default::default()
    };
    let relay = RecordingRelay::default();
    let spec = AggSpec {
        fields: vec!["ProjectName.keyword".into(), "User.keyword".into()],
        print_table: true,
        output: Some(dir.path().join("out.csv")),
        emit_html: true,
    };

    let out = run_agg_report(&ctx, &backend, &spec, &relay).unwrap();

    // one totals search plus one per field
    assert_eq!(backend.searches.borrow().len(), 3);
    assert_eq!(out.tables.len(), 2);
    let (heading, table) = &out.tables[0];
    assert_eq!(heading, "CHTC Jobs by ProjectName from 2024-03-07 00:00:00 TO 2024-03-14 00:00:00");
    assert_eq!(table.header[0], "ProjectName");
    assert_eq!(table.rows[0][0], Cell::text("Totals"));
    assert_eq!(table.cell(0, "% Goodput"), Some(&Cell::Int(50)));
    assert_eq!(table.rows[1][0], Cell::text("big"));
    assert_eq!(table.rows[2][0], Cell::text("small"));

    assert_eq!(out.grids.len(), 2);
    assert!(out.grids[0].starts_with("CHTC Jobs by ProjectName"));
    assert!(out.grids[0].contains("+==="));

    assert_eq!(
        out.csv_files,
        vec![dir.path().join("out_ProjectName.csv"), dir.path().join("out_User.csv")]
    );
    assert!(out.csv_files.iter().all(|p| p.exists()));

    let html = fs::read_to_string(dir.path().join(AGG_HTML_FILE)).unwrap();
    assert!(html.contains("<h3>CHTC Jobs by User from"));

    assert_eq!(out.subject, "7-day CHTC Usage Report 2024-03-07 to 2024-03-14");
    assert_eq!(relay.sent.borrow().len(), 1);
}

#[test]
fn agg_report_rejects_a_malformed_response() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(&dir);
    ctx.no_email = true;
    let backend = FakeBackend {
        groups: json!({"hits": {}}),
        totals: json!({"aggregations": {}}),
        ..Default::default()
    };
    let err = run_agg_report(&ctx, &backend, &AggSpec::default(), &RecordingRelay::default()).unwrap_err();
    assert!(matches!(err, PipelineError::Filter(_)));
}

/* ---------------- error email ---------------- */

fn log_file(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("report.log");
    let lines: Vec<String> = (1..=30).map(|i| format!("step {i}")).collect();
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[test]
fn error_email_carries_the_log_tail() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let relay = RecordingRelay::default();

    let report = run_error_report(&ctx, &log_file(&dir), 5, FilterKind::OsgCpu, &relay).unwrap();

    assert!(report.all_delivered());
    let sent = relay.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].2.contains("Error sending OSPool Daily Usage Report 2024-03-14"));
}

#[test]
fn undelivered_error_email_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(&dir);
    ctx.mail.cc = vec!["lead@example.org".to_string()];
    let relay = RecordingRelay { refuse: Some("lead@example.org"), ..Default::default() };

    let err = run_error_report(&ctx, &log_file(&dir), 5, FilterKind::Base, &relay).unwrap_err();

    match err {
        PipelineError::Undelivered(failed) => assert_eq!(failed, vec!["lead@example.org".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
}

/* ---------------- offline render ---------------- */

fn users_table() -> Table {
    let mut t = Table::new(vec!["User".into(), "All CPU Hours".into(), "Num Uniq Job Ids".into()]);
    t.rows.push(vec![Cell::text(TOTAL), Cell::Float(5.0), Cell::Int(3)]);
    t.rows.push(vec![Cell::text("carol"), Cell::Float(4.0), Cell::Int(2)]);
    t.rows.push(vec![Cell::text("dave"), Cell::Float(1.0), Cell::Int(1)]);
    t
}

#[test]
fn render_from_csv_orders_tables() {
    let dir = tempfile::tempdir().unwrap();
    let users = write_table(dir.path(), "job-history_Users_daily_2024-03-14.csv", &users_table()).unwrap();
    let mut projects = users_table();
    projects.rename_column("User", "Project");
    let projects = write_table(dir.path(), "job-history_Projects_daily_2024-03-14.csv", &projects).unwrap();

    let style = ReportStyle::for_kind(FilterKind::Base);
    let html = render_from_csv(&[users, projects], &style, &daily()).unwrap();

    let p = html.find("per Project usage").unwrap();
    let u = html.find("per User usage").unwrap();
    assert!(p < u);
    assert!(html.contains("carol"));
}

#[test]
fn render_from_csv_needs_table_file_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_table(dir.path(), "whatever.csv", &users_table()).unwrap();
    let err = render_from_csv(&[path], &ReportStyle::default(), &daily()).unwrap_err();
    assert!(matches!(err, PipelineError::Core(_)));
}

#[test]
fn render_from_no_files_is_an_error() {
    let err = render_from_csv(&[], &ReportStyle::default(), &daily()).unwrap_err();
    assert!(matches!(err, PipelineError::Report(_)));
}
