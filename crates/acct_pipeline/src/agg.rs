// crates/acct_pipeline/src/agg.rs
//
// Aggregation report: the backend groups and sums, we only lay out tables.
// One search per grouping field plus one for the totals row.

use std::path::{Path, PathBuf};

use acct_core::Table;
use acct_filters::agg_report;
use acct_io::cache::write_bytes_atomic;
use acct_io::csv_io::write_table;
use acct_io::mail::{self, DeliveryReport, MailRelay, OutgoingMail};
use acct_io::SearchBackend;
use acct_report::{agg_html, render_text};

use crate::{PipelineError, RunContext};

/// File written next to the other run outputs when HTML is requested.
pub const AGG_HTML_FILE: &str = "table.html";

#[derive(Clone, Debug)]
pub struct AggSpec {
    /// Grouping fields, e.g. `ProjectName.keyword`; one table each.
    pub fields: Vec<String>,
    /// Render each table as a text grid into [`AggOutcome::grids`].
    pub print_table: bool,
    /// CSV destination. With several fields, the label is added to the stem.
    pub output: Option<PathBuf>,
    pub emit_html: bool,
}

impl Default for AggSpec {
    fn default() -> Self {
        Self {
            fields: vec![agg_report::DEFAULT_AGG_FIELD.to_string()],
            print_table: false,
            output: None,
            emit_html: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct AggOutcome {
    /// `(heading, table)` per field, in the order asked for.
    pub tables: Vec<(String, Table)>,
    pub grids: Vec<String>,
    pub csv_files: Vec<PathBuf>,
    pub html_path: Option<PathBuf>,
    pub subject: String,
    pub delivery: Option<DeliveryReport>,
}

fn csv_path(output: &Path, field: &str, several: bool) -> PathBuf {
    if !several {
        return output.to_path_buf();
    }
    let stem = output.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = output.extension().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "csv".into());
    output.with_file_name(format!("{stem}_{}.{ext}", agg_report::field_label(field)))
}

pub fn run_agg_report(
    ctx: &RunContext,
    backend: &dyn SearchBackend,
    spec: &AggSpec,
    relay: &dyn MailRelay,
) -> Result<AggOutcome, PipelineError> {
    let window = &ctx.window;
    let mut out = AggOutcome::default();

    let totals = backend.search(&ctx.index, &agg_report::totals_query(window))?;
    for field in &spec.fields {
        tracing::info!(field = %field, index = %ctx.index, "running aggregation");
        let groups = backend.search(&ctx.index, &agg_report::build_query(window, field))?;
        let table = agg_report::build_table(field, &groups, &totals)?;
        out.tables.push((agg_report::table_heading(field, window), table));
    }

    if spec.print_table {
        for (heading, table) in &out.tables {
            out.grids.push(format!("{heading}\n{}", render_text::grid(table)));
        }
    }

    if let Some(output) = &spec.output {
        let several = spec.fields.len() > 1;
        for (field, (_, table)) in spec.fields.iter().zip(&out.tables) {
            let path = csv_path(output, field, several);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            out.csv_files.push(write_table(dir, &name, table)?);
        }
    }

    let html = agg_html::render(&out.tables);
    if spec.emit_html {
        let path = ctx.work_dir.join(AGG_HTML_FILE);
        write_bytes_atomic(&path, html.as_bytes())?;
        tracing::info!(path = %path.display(), "wrote html");
        out.html_path = Some(path);
    }

    out.subject = agg_report::subject(window);
    if ctx.no_email {
        tracing::info!("not sending email");
    } else {
        let message = OutgoingMail { subject: out.subject.clone(), html, attachments: Vec::new() };
        match mail::send(&ctx.mail, relay, &message) {
            Ok(report) => out.delivery = Some(report),
            Err(e) => tracing::error!(error = %e, "could not send aggregation email"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_names_per_field() {
        let out = Path::new("reports/2024-03-14-report.csv");
        assert_eq!(csv_path(out, "ProjectName.keyword", false), PathBuf::from("reports/2024-03-14-report.csv"));
        assert_eq!(
            csv_path(out, "User.keyword", true),
            PathBuf::from("reports/2024-03-14-report_User.csv")
        );
    }
}
