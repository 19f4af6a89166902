// crates/acct_pipeline/src/report.rs
//
// The report run. Stages are logged at info; a bad document or a failed mail
// delivery is logged and the run goes on.

use std::collections::BTreeMap;
use std::path::PathBuf;

use acct_core::{AggTable, JobAd, Table, TableFileName};
use acct_filters::ReportFilter;
use acct_io::cache::{write_bytes_atomic, write_json_atomic};
use acct_io::csv_io::write_table;
use acct_io::mail::{self, DeliveryReport, MailRelay, OutgoingMail};
use acct_io::SearchBackend;
use acct_report::{render_report, ReportStyle};
use serde_json::Value;

use crate::totals::push_totals;
use crate::{PipelineError, RunContext, LAST_DATA_FILE, LAST_HTML_FILE};

/// What a run produced.
#[derive(Debug, Default)]
pub struct ReportOutcome {
    pub hits: u64,
    /// Hits whose source could not be read as a job ad.
    pub bad_docs: u64,
    /// One CSV per merged table, in report order.
    pub csv_files: Vec<PathBuf>,
    pub html_path: PathBuf,
    pub subject: String,
    /// `None` when mail was skipped or could not be sent at all.
    pub delivery: Option<DeliveryReport>,
    /// Id of the pushed totals document.
    pub totals_id: Option<String>,
}

fn source(hit: &Value) -> &Value {
    hit.get("_source").unwrap_or(hit)
}

pub fn run_report(
    ctx: &RunContext,
    backend: &dyn SearchBackend,
    filter: &mut dyn ReportFilter,
    relay: &dyn MailRelay,
) -> Result<ReportOutcome, PipelineError> {
    let window = &ctx.window;
    let mut out = ReportOutcome::default();

    /* ---- scan ---- */
    let query = filter.query(window);
    tracing::info!(
        filter = filter.name(),
        index = %ctx.index,
        start = window.start_ts,
        end = window.end_ts,
        "scanning job history"
    );
    let mut bad_docs = 0u64;
    out.hits = backend.scan(&ctx.index, &query, &mut |hit| match JobAd::from_value(source(hit)) {
        Ok(ad) => filter.accept(&ad),
        Err(e) => {
            bad_docs += 1;
            let id = hit.get("_id").and_then(Value::as_str).unwrap_or("?");
            tracing::warn!(doc = id, error = %e, "skipping unreadable document");
        }
    })?;
    out.bad_docs = bad_docs;
    filter.finish()?;
    tracing::info!(hits = out.hits, bad_docs, "scan finished");

    /* ---- debug dump ---- */
    let counts: BTreeMap<&str, BTreeMap<String, usize>> =
        filter.group_counts().into_iter().map(|(t, groups)| (t.as_str(), groups)).collect();
    write_json_atomic(&ctx.work_dir.join(LAST_DATA_FILE), &counts)?;

    /* ---- merge + csv ---- */
    let mut tables: Vec<(AggTable, Table)> = Vec::new();
    for agg in filter.tables() {
        tables.push((agg, filter.merge(agg)?));
    }
    tables.sort_by_key(|(agg, _)| agg.report_rank());
    for (agg, table) in &tables {
        let name = TableFileName::new(filter.name(), *agg, window).to_string();
        let path = write_table(&ctx.csv_dir, &name, table)?;
        tracing::info!(path = %path.display(), rows = table.rows.len(), "wrote table");
        out.csv_files.push(path);
    }

    /* ---- html ---- */
    let style = ReportStyle::for_kind(filter.kind());
    let html = render_report(&tables, &style, window)?;
    out.html_path = ctx.work_dir.join(LAST_HTML_FILE);
    write_bytes_atomic(&out.html_path, html.as_bytes())?;
    out.subject = style.subject(window);

    /* ---- mail ---- */
    if ctx.no_email {
        tracing::info!("not sending email");
    } else {
        let message = OutgoingMail { subject: out.subject.clone(), html, attachments: out.csv_files.clone() };
        match mail::send(&ctx.mail, relay, &message) {
            Ok(report) => out.delivery = Some(report),
            Err(e) => tracing::error!(error = %e, "could not send report email"),
        }
    }

    /* ---- totals ---- */
    if ctx.no_push {
        tracing::info!("not pushing totals");
    } else {
        out.totals_id = push_totals(backend, &out.csv_files, &ctx.totals_index)?;
    }

    Ok(out)
}
