// crates/acct_cli/src/args.rs
//
// Command line surface. Every option also reads an environment variable so
// cron jobs can be configured without long command lines.
//
// - Window: `--daily | --weekly | --monthly | --period`, `--start-ts`, `--end-ts`
// - Search: `--es-*` flags, optionally seeded from `--es-config-file`
// - Mail: comma lists or repeated flags for To/Cc/Bcc, ordered relay list

use std::path::PathBuf;

use acct_core::period::{effective_period, resolve_window_now};
use acct_core::{CoreError, ReportPeriod, TimeWindow};
use acct_filters::agg_report::DEFAULT_AGG_FIELD;
use acct_filters::FilterKind;
use acct_io::config::split_addrs;
use acct_io::{collectors, topology, MailConfig, SearchConfig};
use acct_pipeline::error_report::DEFAULT_TAIL_LINES;
use acct_pipeline::DEFAULT_TOTALS_INDEX;
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};

/// Sender used by the report runs.
pub const REPORT_FROM: &str = "accounting@chtc.wisc.edu";
/// Sender used by the aggregation report.
pub const AGG_FROM: &str = "no-reply@chtc.wisc.edu";

#[derive(Debug, Parser)]
#[command(name = "acct", version, about = "HTC pool accounting reports", disable_help_subcommand = true)]
pub struct Cli {
    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// More logging; -v for debug, -vv for trace.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Filter directive for the subscriber; `-v` overrides `--log-level`.
    pub fn log_directive(&self) -> &str {
        match self.verbose {
            0 => &self.log_level,
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan job history, reduce it per group and mail the report.
    Report(ReportArgs),
    /// Backend-side aggregation report over a date range.
    AggReport(AggArgs),
    /// Mail the tail of a failed run's log.
    ErrorEmail(ErrorEmailArgs),
    /// Render report HTML from existing table CSVs.
    Render(RenderArgs),
    /// Refresh the topology site map cache.
    Topology(TopologyArgs),
}

/* ---------------- shared option groups ---------------- */

#[derive(Debug, Args)]
pub struct PeriodArgs {
    /// Report on one day.
    #[arg(long, conflicts_with_all = ["weekly", "monthly", "period"])]
    pub daily: bool,
    /// Report on seven days.
    #[arg(long, conflicts_with_all = ["monthly", "period"])]
    pub weekly: bool,
    /// Report on one calendar month.
    #[arg(long, conflicts_with = "period")]
    pub monthly: bool,
    /// Period by name (daily, weekly, monthly, custom).
    #[arg(long, env = "REPORT_PERIOD", value_parser = parse_period)]
    pub period: Option<ReportPeriod>,
    /// Window start, Unix seconds.
    #[arg(long, env = "START_TS", allow_negative_numbers = true)]
    pub start_ts: Option<i64>,
    /// Window end, Unix seconds.
    #[arg(long, env = "END_TS", allow_negative_numbers = true)]
    pub end_ts: Option<i64>,
}

impl PeriodArgs {
    pub fn requested(&self) -> Option<ReportPeriod> {
        if self.daily {
            Some(ReportPeriod::Daily)
        } else if self.weekly {
            Some(ReportPeriod::Weekly)
        } else if self.monthly {
            Some(ReportPeriod::Monthly)
        } else {
            self.period
        }
    }

    /// Resolve against the local clock.
    pub fn window(&self) -> Result<TimeWindow, CliError> {
        let period = effective_period(self.requested(), self.start_ts, self.end_ts);
        Ok(resolve_window_now(period, self.start_ts, self.end_ts)?)
    }
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// JSON file with search options; flags override its values.
    #[arg(long, env = "ES_CONFIG_FILE")]
    pub es_config_file: Option<PathBuf>,
    /// `host` or `host:port`.
    #[arg(long, env = "ES_HOST")]
    pub es_host: Option<String>,
    #[arg(long, env = "ES_URL_PREFIX")]
    pub es_url_prefix: Option<String>,
    #[arg(long, env = "ES_INDEX")]
    pub es_index: Option<String>,
    #[arg(long, env = "ES_USER")]
    pub es_user: Option<String>,
    #[arg(long, env = "ES_PASS", hide_env_values = true)]
    pub es_pass: Option<String>,
    #[arg(long, env = "ES_PASSWORD_FILE")]
    pub es_password_file: Option<PathBuf>,
    #[arg(long, env = "ES_USE_HTTPS")]
    pub es_use_https: bool,
    /// PEM bundle used instead of the built-in roots.
    #[arg(long, env = "ES_CA_CERTS")]
    pub es_ca_certs: Option<PathBuf>,
}

impl SearchArgs {
    pub fn config(&self, default_index: &str) -> Result<SearchConfig, CliError> {
        let mut cfg = match &self.es_config_file {
            Some(path) => {
                if !path.is_file() {
                    return Err(CliError::NotFound(format!("--es-config-file {}", path.display())));
                }
                SearchConfig::from_json_file(path).map_err(|e| CliError::BadConfig(e.to_string()))?
            }
            None => SearchConfig { index: default_index.to_string(), ..SearchConfig::default() },
        };
        if let Some(v) = &self.es_host {
            cfg.host = v.clone();
        }
        if let Some(v) = &self.es_url_prefix {
            cfg.url_prefix = Some(v.clone());
        }
        if let Some(v) = &self.es_index {
            cfg.index = v.clone();
        }
        if let Some(v) = &self.es_user {
            cfg.user = Some(v.clone());
        }
        if let Some(v) = &self.es_pass {
            cfg.password = Some(v.clone());
        }
        if let Some(v) = &self.es_password_file {
            cfg.password_file = Some(v.clone());
        }
        if let Some(v) = &self.es_ca_certs {
            cfg.ca_certs = Some(v.clone());
        }
        cfg.use_https |= self.es_use_https;
        Ok(cfg)
    }
}

#[derive(Debug, Args)]
pub struct MailArgs {
    #[arg(long = "from", env = "FROM_ADDR")]
    pub from: Option<String>,
    #[arg(long, env = "REPLY_TO")]
    pub reply_to: Option<String>,
    /// Recipients; repeat the flag or give a comma list.
    #[arg(long = "to", env = "TO_ADDRS", value_delimiter = ',')]
    pub to: Vec<String>,
    #[arg(long = "cc", env = "CC_ADDRS", value_delimiter = ',')]
    pub cc: Vec<String>,
    #[arg(long = "bcc", env = "BCC_ADDRS", value_delimiter = ',')]
    pub bcc: Vec<String>,
    /// Relays tried in order for each recipient.
    #[arg(long = "smtp-server", env = "SMTP_SERVERS", value_delimiter = ',', default_value = "localhost")]
    pub smtp_servers: Vec<String>,
    #[arg(long, env = "SMTP_PORT", default_value_t = 25)]
    pub smtp_port: u16,
    #[arg(long, env = "SMTP_USERNAME")]
    pub smtp_username: Option<String>,
    #[arg(long, env = "SMTP_PASSWORD_FILE")]
    pub smtp_password_file: Option<PathBuf>,
}

fn addrs(raw: &[String]) -> Vec<String> {
    raw.iter().flat_map(|a| split_addrs(a)).collect()
}

impl MailArgs {
    pub fn config(&self, default_from: &str) -> MailConfig {
        MailConfig {
            from: self.from.clone().unwrap_or_else(|| default_from.to_string()),
            reply_to: self.reply_to.clone(),
            to: addrs(&self.to),
            cc: addrs(&self.cc),
            bcc: addrs(&self.bcc),
            smtp_servers: addrs(&self.smtp_servers),
            smtp_port: self.smtp_port,
            smtp_username: self.smtp_username.clone(),
            smtp_password_file: self.smtp_password_file.clone(),
            ..MailConfig::default()
        }
    }
}

/* ---------------- subcommands ---------------- */

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long, env = "FILTER", default_value = "base", value_parser = parse_filter)]
    pub filter: FilterKind,
    #[command(flatten)]
    pub period: PeriodArgs,
    #[command(flatten)]
    pub search: SearchArgs,
    #[command(flatten)]
    pub mail: MailArgs,
    #[arg(long, env = "CSV_DIR", default_value = "csv")]
    pub csv_dir: PathBuf,
    /// Where last_data.json and last_html.html are written.
    #[arg(long, env = "WORK_DIR", default_value = ".")]
    pub work_dir: PathBuf,
    #[arg(long)]
    pub no_email: bool,
    #[arg(long)]
    pub no_push: bool,
    #[arg(long, env = "TOTALS_INDEX", default_value = DEFAULT_TOTALS_INDEX)]
    pub totals_index: String,
    #[arg(long, env = "TOPOLOGY_CACHE", default_value = topology::DEFAULT_CACHE_FILE)]
    pub topology_cache: PathBuf,
    #[arg(long, env = "COLLECTOR_CACHE", default_value = collectors::DEFAULT_CACHE_FILE)]
    pub collector_cache: PathBuf,
    /// Ask central managers (condor_status) about schedds missing from the cache.
    #[arg(long)]
    pub query_collectors: bool,
    /// Look cached schedds up again; daily reports do this on Mondays.
    #[arg(long)]
    pub refresh_collectors: bool,
}

#[derive(Debug, Args)]
pub struct AggArgs {
    /// First day, YYYY-MM-DD.
    #[arg(long, value_parser = parse_date)]
    pub start: NaiveDate,
    /// Day after the last one, YYYY-MM-DD; today when omitted.
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,
    /// Keyword fields to group by, one table each.
    #[arg(long = "agg-by", num_args = 1.., default_value = DEFAULT_AGG_FIELD)]
    pub agg_by: Vec<String>,
    /// Print each table as a text grid on stdout.
    #[arg(long)]
    pub print_table: bool,
    /// CSV output path.
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Also write table.html into --work-dir.
    #[arg(long)]
    pub emit_html: bool,
    #[arg(long, env = "WORK_DIR", default_value = ".")]
    pub work_dir: PathBuf,
    #[arg(long)]
    pub no_email: bool,
    #[command(flatten)]
    pub search: SearchArgs,
    #[command(flatten)]
    pub mail: MailArgs,
}

#[derive(Debug, Args)]
pub struct ErrorEmailArgs {
    #[arg(long, env = "LOG_FILE")]
    pub log_file: PathBuf,
    #[arg(long, default_value_t = DEFAULT_TAIL_LINES)]
    pub lines: usize,
    #[arg(long, env = "FILTER", default_value = "base", value_parser = parse_filter)]
    pub filter: FilterKind,
    #[command(flatten)]
    pub period: PeriodArgs,
    #[command(flatten)]
    pub mail: MailArgs,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Table CSVs written by an earlier report run.
    #[arg(long, num_args = 1.., required = true)]
    pub csv: Vec<PathBuf>,
    #[arg(long, env = "FILTER", default_value = "base", value_parser = parse_filter)]
    pub filter: FilterKind,
    #[command(flatten)]
    pub period: PeriodArgs,
    /// HTML output path; stdout when omitted.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl RenderArgs {
    pub fn check_inputs(&self) -> Result<(), CliError> {
        match self.csv.iter().find(|p| !p.is_file()) {
            Some(p) => Err(CliError::NotFound(format!("--csv {}", p.display()))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Args)]
pub struct TopologyArgs {
    #[arg(long, env = "TOPOLOGY_CACHE", default_value = topology::DEFAULT_CACHE_FILE)]
    pub cache: PathBuf,
    #[arg(long, default_value = topology::RESOURCE_SUMMARY_URL)]
    pub url: String,
}

/* ---------------- errors + value parsers ---------------- */

/// Argument problems found after clap parsing. All map to exit code 2.
#[derive(Debug)]
pub enum CliError {
    BadWindow(CoreError),
    BadConfig(String),
    NotFound(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CliError::*;
        match self {
            BadWindow(e) => write!(f, "invalid report window: {e}"),
            BadConfig(s) => write!(f, "invalid configuration: {s}"),
            NotFound(p) => write!(f, "file not found: {p}"),
        }
    }
}
impl std::error::Error for CliError {}

impl From<CoreError> for CliError {
    fn from(e: CoreError) -> Self {
        CliError::BadWindow(e)
    }
}

pub fn parse_period(s: &str) -> Result<ReportPeriod, String> {
    s.parse::<ReportPeriod>().map_err(|e| e.to_string())
}

pub fn parse_filter(s: &str) -> Result<FilterKind, String> {
    s.parse::<FilterKind>().map_err(|e| e.to_string())
}

pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn period_flags() {
        let cli = Cli::try_parse_from(["acct", "render", "--csv", "a.csv", "--weekly"]).unwrap();
        let Command::Render(r) = cli.command else { panic!("expected render") };
        assert_eq!(r.period.requested(), Some(ReportPeriod::Weekly));
        assert!(Cli::try_parse_from(["acct", "render", "--csv", "a.csv", "--daily", "--weekly"]).is_err());
    }

    #[test]
    fn custom_window_needs_both_bounds() {
        let p = PeriodArgs {
            daily: false,
            weekly: false,
            monthly: false,
            period: Some(ReportPeriod::Custom),
            start_ts: Some(1_710_374_400),
            end_ts: None,
        };
        assert!(matches!(p.window(), Err(CliError::BadWindow(CoreError::MissingCustomBound))));

        let both = PeriodArgs { end_ts: Some(1_710_460_800), ..p };
        let w = both.window().unwrap();
        assert_eq!((w.start_ts, w.end_ts, w.period), (1_710_374_400, 1_710_460_800, ReportPeriod::Custom));
    }

    #[test]
    fn mail_lists_and_defaults() {
        let cli = Cli::try_parse_from([
            "acct", "error-email", "--log-file", "x.log", "--to", "a@x.org, b@x.org", "--to", "c@x.org",
            "--smtp-server", "relay1,relay2",
        ])
        .unwrap();
        let Command::ErrorEmail(e) = cli.command else { panic!("expected error-email") };
        let cfg = e.mail.config(REPORT_FROM);
        assert_eq!(cfg.to, vec!["a@x.org", "b@x.org", "c@x.org"]);
        assert_eq!(cfg.smtp_servers, vec!["relay1", "relay2"]);
        assert_eq!(cfg.from, REPORT_FROM);
        assert_eq!(e.lines, 10);
    }

    #[test]
    fn search_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "acct", "agg-report", "--start", "2024-03-01", "--es-host", "es.example.org:9201", "--agg-by",
            "User.keyword", "ProjectName.keyword",
        ])
        .unwrap();
        let Command::AggReport(a) = cli.command else { panic!("expected agg-report") };
        let cfg = a.search.config("chtc-schedd-*").unwrap();
        assert_eq!(cfg.host, "es.example.org:9201");
        assert_eq!(cfg.index, "chtc-schedd-*");
        assert_eq!(a.agg_by, vec!["User.keyword", "ProjectName.keyword"]);
        assert_eq!(a.start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn verbosity_wins_over_level() {
        let cli = Cli::try_parse_from(["acct", "-vv", "topology"]).unwrap();
        assert_eq!(cli.log_directive(), "trace");
    }
}
