// crates/acct_cli/src/main.rs
//
// Entry point: logging setup, one function per subcommand, and the mapping
// from library errors to process exit codes. Logs go to stderr; stdout only
// carries requested output (grids, rendered HTML, topology counts).

mod args;

mod exitcodes {
    pub const OK: u8 = 0;
    pub const VALIDATION: u8 = 2;
    pub const IO: u8 = 3;
    pub const REPORT: u8 = 4;
    pub const MAIL: u8 = 5;
}

use std::fs;
use std::io::Write as _;
use std::process::ExitCode;

use acct_core::period::window_from_dates;
use acct_core::ReportPeriod;
use acct_filters::agg_report::DEFAULT_AGG_INDEX;
use acct_filters::{FilterError, FilterSetup, PoolMembership};
use acct_io::collectors::{CollectorHostMap, CollectorLookup, CondorStatusLookup};
use acct_io::config::DEFAULT_INDEX;
use acct_io::mail::SmtpRelay;
use acct_io::search::HttpSearchClient;
use acct_io::topology::{self, SiteMap, CACHE_MAX_AGE, RESOURCE_SUMMARY_URL};
use acct_io::IoError;
use acct_pipeline::{
    render_from_csv, run_agg_report, run_error_report, run_report, AggSpec, PipelineError, RunContext,
};
use acct_report::ReportStyle;
use chrono::{Datelike, Local, Weekday};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{AggArgs, Cli, CliError, Command, ErrorEmailArgs, RenderArgs, ReportArgs, TopologyArgs, AGG_FROM, REPORT_FROM};

/// Error buckets, one per exit code.
#[derive(Debug)]
enum MainError {
    /// Bad arguments, configuration or window
    Validation(String),
    /// Files, backend or network
    Io(String),
    /// Reduction, merge or rendering
    Report(String),
    /// Error email not delivered to every recipient
    Mail(String),
}

impl std::fmt::Display for MainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MainError::Validation(m) | MainError::Io(m) | MainError::Report(m) | MainError::Mail(m) => {
                f.write_str(m)
            }
        }
    }
}

impl From<CliError> for MainError {
    fn from(e: CliError) -> Self {
        MainError::Validation(e.to_string())
    }
}

impl From<IoError> for MainError {
    fn from(e: IoError) -> Self {
        map_io_err(e)
    }
}

impl From<PipelineError> for MainError {
    fn from(e: PipelineError) -> Self {
        map_pipeline_err(e)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_directive());

    let res = match &cli.command {
        Command::Report(a) => report(a),
        Command::AggReport(a) => agg_report(a),
        Command::ErrorEmail(a) => error_email(a),
        Command::Render(a) => render(a),
        Command::Topology(a) => refresh_topology(a),
    };

    match res {
        Ok(()) => ExitCode::from(exitcodes::OK),
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            eprintln!("acct: error: {e}");
            ExitCode::from(map_error(&e))
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn map_error(e: &MainError) -> u8 {
    use exitcodes::*;
    match e {
        MainError::Validation(_) => VALIDATION,
        MainError::Io(_) => IO,
        MainError::Report(_) => REPORT,
        MainError::Mail(_) => MAIL,
    }
}

fn map_io_err(e: IoError) -> MainError {
    use IoError::*;
    match e {
        Config(m) => MainError::Validation(format!("config: {m}")),
        NoRecipients => MainError::Mail(NoRecipients.to_string()),
        Mail(m) => MainError::Mail(format!("mail: {m}")),
        other => MainError::Io(other.to_string()),
    }
}

fn map_pipeline_err(e: PipelineError) -> MainError {
    match e {
        PipelineError::Io(e) | PipelineError::Filter(FilterError::Io(e)) => map_io_err(e),
        PipelineError::Filter(FilterError::UnknownFilter(m)) => MainError::Validation(format!("unknown filter: {m}")),
        PipelineError::Filter(e) => MainError::Report(e.to_string()),
        PipelineError::Report(e) => MainError::Report(e.to_string()),
        PipelineError::Core(e) => MainError::Validation(e.to_string()),
        e @ PipelineError::Undelivered(_) => MainError::Mail(e.to_string()),
    }
}

/* ---------------- subcommands ---------------- */

#[cfg(feature = "progress")]
fn spinner(msg: &str) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new_spinner();
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

fn filter_setup(a: &ReportArgs, period: ReportPeriod) -> FilterSetup {
    let mut setup = FilterSetup::default();

    if a.filter.uses_site_map() {
        setup.site_map = match topology::load_site_map(&a.topology_cache, CACHE_MAX_AGE, RESOURCE_SUMMARY_URL) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "no topology site map, using built-in mappings only");
                SiteMap::with_manual_mappings()
            }
        };
    }

    if a.filter.uses_pool() {
        let monday = Local::now().weekday() == Weekday::Mon;
        let refresh = a.refresh_collectors || (period == ReportPeriod::Daily && monday);
        let hosts = CollectorHostMap::load(&a.collector_cache, refresh);
        let lookup: Option<Box<dyn CollectorLookup>> =
            if a.query_collectors { Some(Box::new(CondorStatusLookup::default())) } else { None };
        setup.pool = PoolMembership::new(hosts, lookup);
    }
    setup
}

fn report(a: &ReportArgs) -> Result<(), MainError> {
    let window = a.period.window()?;
    let search = a.search.config(DEFAULT_INDEX)?;

    let mut ctx = RunContext::new(window);
    ctx.index = search.index.clone();
    ctx.csv_dir = a.csv_dir.clone();
    ctx.work_dir = a.work_dir.clone();
    ctx.mail = a.mail.config(REPORT_FROM);
    ctx.no_email = a.no_email;
    ctx.no_push = a.no_push;
    ctx.totals_index = a.totals_index.clone();

    let backend = HttpSearchClient::new(&search)?;
    let relay = SmtpRelay::from_config(&ctx.mail)?;
    let mut filter = a.filter.build(filter_setup(a, window.period));

    #[cfg(feature = "progress")]
    let pb = spinner("scanning job history");
    let out = run_report(&ctx, &backend, filter.as_mut(), &relay);
    #[cfg(feature = "progress")]
    pb.finish_and_clear();
    let out = out?;

    tracing::info!(
        filter = %a.filter,
        hits = out.hits,
        bad_docs = out.bad_docs,
        tables = out.csv_files.len(),
        subject = %out.subject,
        totals = out.totals_id.as_deref().unwrap_or("-"),
        "report finished"
    );
    Ok(())
}

fn agg_report(a: &AggArgs) -> Result<(), MainError> {
    let end = a.end.unwrap_or_else(|| Local::now().date_naive());
    let window = window_from_dates(a.start, end, &Local).map_err(CliError::from)?;
    let search = a.search.config(DEFAULT_AGG_INDEX)?;

    let mut ctx = RunContext::new(window);
    ctx.index = search.index.clone();
    ctx.work_dir = a.work_dir.clone();
    ctx.mail = a.mail.config(AGG_FROM);
    ctx.no_email = a.no_email;

    let spec = AggSpec {
        fields: a.agg_by.clone(),
        print_table: a.print_table,
        output: a.output.clone(),
        emit_html: a.emit_html,
    };
    let backend = HttpSearchClient::new(&search)?;
    let relay = SmtpRelay::from_config(&ctx.mail)?;
    let out = run_agg_report(&ctx, &backend, &spec, &relay)?;

    let mut stdout = std::io::stdout().lock();
    for grid in &out.grids {
        writeln!(stdout, "{grid}").map_err(|e| MainError::Io(format!("stdout: {e}")))?;
    }
    tracing::info!(tables = out.tables.len(), subject = %out.subject, "aggregation report finished");
    Ok(())
}

fn error_email(a: &ErrorEmailArgs) -> Result<(), MainError> {
    let window = a.period.window()?;
    if !a.log_file.is_file() {
        return Err(CliError::NotFound(format!("--log-file {}", a.log_file.display())).into());
    }
    let mut ctx = RunContext::new(window);
    ctx.mail = a.mail.config(REPORT_FROM);

    let relay = SmtpRelay::from_config(&ctx.mail)?;
    let report = run_error_report(&ctx, &a.log_file, a.lines, a.filter, &relay)?;
    tracing::info!(delivered = report.delivered.len(), "error email sent");
    Ok(())
}

fn render(a: &RenderArgs) -> Result<(), MainError> {
    a.check_inputs()?;
    let window = a.period.window()?;
    let style = ReportStyle::for_kind(a.filter);
    let html = render_from_csv(&a.csv, &style, &window)?;

    match &a.output {
        Some(path) => {
            fs::write(path, &html).map_err(|e| MainError::Io(format!("write {}: {e}", path.display())))?;
            tracing::info!(path = %path.display(), "wrote html");
        }
        None => std::io::stdout()
            .lock()
            .write_all(html.as_bytes())
            .map_err(|e| MainError::Io(format!("stdout: {e}")))?,
    }
    Ok(())
}

fn refresh_topology(a: &TopologyArgs) -> Result<(), MainError> {
    let map = topology::load_with(&a.cache, CACHE_MAX_AGE, true, || topology::fetch_site_map(&a.url))?;
    println!("{}", map.len());
    Ok(())
}
