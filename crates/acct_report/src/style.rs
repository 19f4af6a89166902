// crates/acct_report/src/style.rs
//
// Per-variant presentation: pool label, subject noun, column formats,
// hidden columns and legend. Data only; html.rs does the writing.

use std::fmt::Write as _;

use acct_core::{AggTable, TimeWindow};
use acct_filters::FilterKind;

use crate::format::ColumnFormat;

type Styles = &'static [(&'static str, &'static [&'static str])];
type Legend = &'static [(&'static str, &'static str)];

/* ---------------------------------- CSS ---------------------------------- */

pub const DEFAULT_STYLES: Styles = &[
    ("body", &["font-size: 11pt", "font-family: sans-serif"]),
    ("h1", &["font-size: 12pt", "text-align: center"]),
    ("table", &["font-size: 10pt", "border-collapse: collapse", "border-color: #ffffff"]),
    ("tr.odd", &["background-color: #fee"]),
    ("tr.even", &["background-color: #fff"]),
    (
        "th",
        &[
            "border: 1px solid black",
            "font-weight: bold",
            "text-align: center",
            "background-color: #ddd",
            "min-width: 1px",
        ],
    ),
    ("td", &["border: 1px solid black", "text-align: right", "min-width: 1px"]),
    ("td.text", &["text-align: left"]),
];

/// The histogram table has no row striping and shares borders between
/// header and data cells.
pub const HISTOGRAM_STYLES: Styles = &[
    ("body", &["font-size: 11pt", "font-family: sans-serif"]),
    ("h1", &["font-size: 12pt", "text-align: center"]),
    ("table", &["font-size: 10pt", "border-collapse: collapse", "border-color: #ffffff"]),
    ("th, td", &["border: 1px solid black", "text-align: right", "min-width: 1px"]),
    ("th", &["background-color: #ddd"]),
];

/// Render a style table as a CSS block.
pub fn css(styles: Styles) -> String {
    let mut out = String::from("\n");
    for (selector, attrs) in styles {
        let _ = writeln!(out, "{selector} {{");
        for attr in attrs.iter() {
            let _ = writeln!(out, "  {attr};");
        }
        out.push_str("}\n");
    }
    out
}

/* -------------------------------- legends -------------------------------- */

const DEFAULT_LEGEND: Legend = &[
    ("All CPU Hours", "Total CPU hours for all execution attempts, including preemption and removal"),
    ("% Good CPU Hours", "Good CPU Hours per All CPU Hours, as a percentage"),
    ("Good CPU Hours", "Total CPU hours for execution attempts that ran to completion"),
    ("Num Uniq Job Ids", "Number of unique job ids across all execution attempts"),
    ("Max Rqst Mem MB", "Maximum memory requested across all submitted jobs in MB"),
    ("Max Used Mem MB", "Maximum measured memory usage across all submitted jobs' last execution attempts in MB"),
    ("Max Rqst Cpus", "Maximum number of CPUs requested across all submitted jobs"),
    ("Max MB Sent", "Maximum MB sent to a job sandbox from a submit point"),
    ("Max MB Recv", "Maximum MB sent to a submit point from a job sandbox"),
];

const HRS_LEGEND: (&str, &str) = (
    "Min/25%/Median/75%/Max/Mean/Std Hrs",
    "Final execution wallclock hours that a non-short job (Min-Max) or jobs (Mean/Std) ran for \
     (excluding Short jobs, excluding Local and Scheduler Universe jobs)",
);

const OSPOOL_LEGEND: Legend = &[
    ("Num Shadw Starts", "Total times a condor_shadow was spawned across all submitted jobs (excluding Local and Scheduler Universe jobs)"),
    ("Num Exec Atts", "Total number of execution attempts (excluding Local and Scheduler Universe jobs)"),
    ("Num Rm'd Jobs", "Number of jobs that were removed from the queue instead of allowing to complete"),
    ("Num Short Jobs", "Number of execution attempts that completed in less than 60 seconds"),
    ("Num Jobs w/>1 Exec Att", "Number of unique jobs that were executed more than once"),
    ("% Rm'd Jobs", "Percent of Num Uniq Job Ids that were removed"),
    ("% Short Jobs", "Percent of Num Uniq Job Ids that were short jobs"),
    ("% Jobs w/>1 Exec Att", "Percent of Num Uniq Job Ids that had more than one execution attempt"),
    ("% Jobs w/1+ Holds", "Percent of Num Uniq Job Ids that had one or more jobs go on hold"),
    ("Shadw Starts / Job Id", "Num Shadw Starts per Num Uniq Job Ids"),
    ("Exec Atts / Shadw Start", "Num Exec Atts per Num Shadw Starts"),
    ("Holds / Job Id", "Num Job Holds per Num Uniq Job Ids"),
    HRS_LEGEND,
    ("Med Used Mem MB", "Median measured memory usage across all submitted jobs' last execution attempts in MB"),
    ("CPU Hours / Bad Exec Att", "Average CPU Hours used in a non-final execution attempt"),
    ("Num Local Univ Jobs", "Number of jobs that used local universe"),
    ("Num Sched Univ Jobs", "Number of jobs that used scheduler universe"),
];

const GPU_LEGEND: Legend = &[
    ("Num Uniq Job Ids", "Number of unique job ids across all execution attempts"),
    ("All CPU Hours", "Total CPU hours for all execution attempts, including preemption and removal"),
    ("All GPU Hours", "Total GPU hours for all execution attempts, including preemption and removal"),
    ("% Good GPU Hours", "Good GPU Hours per All GPU Hours, as a percentage"),
    ("Num Jobs Over Rqst Disk", "Number of unique jobs that went over their requested disk space"),
    ("Num Ckpt Able Jobs", "Number of unique jobs that may be using user-level checkpointing"),
    ("% Rm'd Jobs", "Percent of Num Uniq Job Ids that were removed"),
    ("Total Files Xferd", "Total files transferred (input and output) across all transfer protocols and execution attempts"),
    (
        "OSDF Files Xferd",
        "Total files transferred using the OSDF (f.k.a. Stash) transfer plugin. A dash (-) in this column means \
         that no APs associated with this data had the capability to transfer files with the OSDF, whereas a zero (0) \
         means that no OSDF file transfers occurred (though OSDF file transfers were possible).",
    ),
    ("% OSDF Files", "Percent of all transferred files that were transferred using the OSDF plugin"),
    ("% OSDF Bytes", "Percent of all transferred bytes that were transferred using the OSDF plugin"),
    ("Shadw Starts / Job Id", "Num Shadw Starts per Num Uniq Job Ids"),
    ("Exec Atts / Shadw Start", "Num Exec Atts per Num Shadw Starts"),
    ("Holds / Job Id", "Num Job Holds per Num Uniq Job Ids"),
    ("% Short Jobs", "Percent of Num Uniq Job Ids that were short jobs"),
    ("% Jobs w/>1 Exec Att", "Percent of Num Uniq Job Ids that had more than one execution attempt"),
    ("% Jobs w/1+ Holds", "Percent of Num Uniq Job Ids that had one or more jobs go on hold"),
    ("% Jobs Over Rqst Disk", "Percent of Num Uniq Job Ids that went over their requested disk space"),
    ("% Jobs using S'ty", "Percent of Num Uniq Job Ids that requested to run inside a Singularity image"),
    ("% Ckpt Able", "Percent of Num Uniq Job Ids that may be using user-level checkpointing"),
    ("Mean Actv Hrs", "Mean slot activation time (in hours)"),
    (
        "Mean Setup Secs",
        "Mean slot activation setup time (in seconds). The slot activation setup time is the duration from when a \
         shadow sends a claim activation to when the shadow is told that a job's executable is running.",
    ),
    HRS_LEGEND,
    ("Input Files / Exec Att", "Number of files (all protocols) sent as part of the input sandbox per job start"),
    ("Output Files / Job", "Number of files transferred back to the access point (and other output locations) per (completed) job"),
    ("CPU Hours / Bad Exec Att", "Average CPU Hours used in a non-final execution attempt"),
    ("GPU Hours / Bad Exec Att", "Average GPU Hours used in a non-final execution attempt"),
    ("Med Used Mem MB", "Median measured memory usage across all submitted jobs' last execution attempts in MB"),
    ("Max Rqst/Used Disk GB", "Maximum requested/used disk space across all submitted jobs' last execution attempts in GB"),
];

const RETRY_LEGEND: Legend = &[
    ("Shadow Starts / Job Id", "Shadow starts per job (that had at least one shadow start)"),
    ("Non Success Shadows (NSS)", "Shadow starts that did not result in job completion"),
    ("% Jobs w/ >1 Shadow Starts", "Percentage of jobs that had multiple shadow starts"),
    ("% Jobs w/ >0 Input Xfer Errs", "Percentage of jobs that had at least one transfer input error"),
    ("% NSS due to Input Xfer Errs", "Percentage of NSS's that were related to transfer input error"),
];

const LONG_JOB_LEGEND: Legend = &[
    ("Last Wall Hrs", "Wallclock hours for last execution attempt"),
    ("Total Wall Hrs", "Total wallclock hours across all execution attempts"),
    ("Potent CPU Hrs", "Potential CPU hours used during last execution attempt, based on RequestCpus"),
    ("Actual CPU Hrs", "Actual CPU hours used during last execution attempt, based on CPUsUsage"),
    ("% CPU Eff", "CPU efficiency, computed using CPUsUsage / RequestCpus"),
    (
        "Last Wrkr MIPS",
        "Benchmark value last obtained on the machine that ran the last execution attempt, \
         a value less than 11,800 is considered \"slow\"",
    ),
];

/* -------------------------------- formats -------------------------------- */

type Formats = &'static [(&'static str, ColumnFormat)];

const F1: ColumnFormat = ColumnFormat::Fixed(1);

const HRS_FORMATS: Formats = &[
    ("Min Hrs", ColumnFormat::HhMm),
    ("25% Hrs", ColumnFormat::HhMm),
    ("Med Hrs", ColumnFormat::HhMm),
    ("75% Hrs", ColumnFormat::HhMm),
    ("95% Hrs", ColumnFormat::HhMm),
    ("Max Hrs", ColumnFormat::HhMm),
    ("Mean Hrs", ColumnFormat::HhMm),
    ("Std Hrs", ColumnFormat::HhMm),
    ("Mean Actv Hrs", ColumnFormat::HhMm),
];

const USAGE_FORMATS: Formats = &[
    ("% Good CPU Hours", F1),
    ("% Good GPU Hours", F1),
    ("CPU Hours / Bad Exec Att", F1),
    ("GPU Hours / Bad Exec Att", F1),
    ("Shadw Starts / Job Id", ColumnFormat::Fixed(2)),
    ("Exec Atts / Shadw Start", ColumnFormat::Fixed(3)),
    ("Holds / Job Id", ColumnFormat::Fixed(2)),
    ("% OSDF Files", F1),
    ("% OSDF Bytes", F1),
    ("% Rm'd Jobs", F1),
    ("% Short Jobs", F1),
    ("% Jobs w/>1 Exec Att", F1),
    ("% Jobs w/1+ Holds", F1),
    ("% Jobs Over Rqst Disk", F1),
    ("% Ckpt Able", F1),
    ("% Jobs using S'ty", F1),
    ("Input Files / Exec Att", F1),
    ("Output Files / Job", F1),
    ("Max Rqst Disk GB", F1),
    ("Max Used Disk GB", F1),
];

const RETRY_FORMATS: Formats = &[
    ("Shadow Starts / Job Id", ColumnFormat::Fixed(2)),
    ("% Jobs w/ >1 Shadow Starts", F1),
    ("% Jobs w/ >0 Input Xfer Errs", F1),
    ("% NSS due to Input Xfer Errs", F1),
];

const LONG_JOB_FORMATS: Formats = &[
    ("Last Wall Hrs", ColumnFormat::HhMm),
    ("Total Wall Hrs", ColumnFormat::HhMm),
    ("Potent CPU Hrs", ColumnFormat::HhMm),
    ("Actual CPU Hrs", ColumnFormat::HhMm),
    ("% CPU Eff", F1),
    ("CPUs Used", ColumnFormat::Fixed(3)),
    ("Rqst Mem GB", F1),
    ("Mem Used GB", F1),
    ("Rqst Disk GB", F1),
    ("Disk Used GB", F1),
    ("Job Id", ColumnFormat::Text),
    ("Last Site", ColumnFormat::Text),
    ("Last Wrkr Node", ColumnFormat::Text),
];

const BASE_FORMATS: Formats = &[("% Good CPU Hours", F1)];

/* --------------------------------- hidden -------------------------------- */

const NO_COLUMNS: &[&str] = &[];

const CPU_HIDDEN: &[&str] = &[
    "Good CPU Hours",
    "Num Exec Atts",
    "Num Shadw Starts",
    "Num Job Holds",
    "Num Rm'd Jobs",
    "Num Jobs w/>1 Exec Att",
    "Num Jobs w/1+ Holds",
    "Num Short Jobs",
];

const GPU_HIDDEN: &[&str] = &[
    "Good CPU Hours",
    "Good GPU Hours",
    "Num Exec Atts",
    "Num Shadw Starts",
    "Num Job Holds",
    "Num Rm'd Jobs",
    "Num Jobs w/>1 Exec Att",
    "Num Jobs w/1+ Holds",
    "Num Short Jobs",
];

/* --------------------------------- style --------------------------------- */

/// How titles read for a variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TitleForm {
    /// `{label} per {Table-singular} usage for jobs completed ...`
    PerGroup,
    /// `{label} {Table}' longest job completed ...`
    Longest,
    /// `Resource requests histogram for jobs completed ...`, dates unemphasized
    Histogram,
}

#[derive(Clone, Debug)]
pub struct ReportStyle {
    pub kind: FilterKind,
    /// Pool label leading titles and subjects.
    pub label: &'static str,
    /// Subject noun, e.g. `Usage Report`.
    pub noun: &'static str,
    pub title_form: TitleForm,
    formats: Vec<Formats>,
    hidden: &'static [&'static str],
    legend: Vec<(&'static str, &'static str)>,
}

impl ReportStyle {
    pub fn for_kind(kind: FilterKind) -> Self {
        let (label, noun, title_form, formats, hidden, legend): (_, _, _, Vec<Formats>, _, _) = match kind {
            FilterKind::Base => ("CHTC", "Usage Report", TitleForm::PerGroup, vec![BASE_FORMATS], NO_COLUMNS, merged(&[])),
            FilterKind::OsgCpu => (
                "OSPool",
                "Usage Report",
                TitleForm::PerGroup,
                vec![HRS_FORMATS, USAGE_FORMATS],
                CPU_HIDDEN,
                merged(OSPOOL_LEGEND),
            ),
            FilterKind::ChtcGpu => (
                "CHTC GPUs",
                "Usage Report",
                TitleForm::PerGroup,
                vec![HRS_FORMATS, USAGE_FORMATS],
                GPU_HIDDEN,
                merged(GPU_LEGEND),
            ),
            FilterKind::OsgRetry => (
                "OSPool",
                "Shadow Retry Report",
                TitleForm::PerGroup,
                vec![RETRY_FORMATS],
                NO_COLUMNS,
                merged(RETRY_LEGEND),
            ),
            // the long job legend stands alone
            FilterKind::OsgLongJob => (
                "OSPool",
                "Longest Job Report",
                TitleForm::Longest,
                vec![LONG_JOB_FORMATS],
                NO_COLUMNS,
                LONG_JOB_LEGEND.to_vec(),
            ),
            FilterKind::OsgJobDistro => {
                ("OSG Connect", "Job Resource Histogram", TitleForm::Histogram, vec![], NO_COLUMNS, vec![])
            }
        };
        Self { kind, label, noun, title_form, formats, hidden, legend }
    }

    /// Format for `column`; unlisted columns are integers.
    pub fn format_of(&self, column: &str) -> ColumnFormat {
        self.formats
            .iter()
            .flat_map(|f| f.iter())
            .find(|(name, _)| *name == column)
            .map_or(ColumnFormat::Int, |(_, f)| *f)
    }

    /// Whether `column` is left out of the HTML (it stays in the CSV).
    pub fn is_hidden(&self, column: &str) -> bool {
        self.hidden.iter().any(|h| *h == column)
    }

    pub fn legend(&self) -> &[(&'static str, &'static str)] {
        &self.legend
    }

    pub fn css(&self) -> String {
        match self.title_form {
            TitleForm::Histogram => css(HISTOGRAM_STYLES),
            _ => css(DEFAULT_STYLES),
        }
    }

    /// `<h1>` text for one table; dates are wrapped in `<strong>`.
    pub fn title(&self, table: AggTable, window: &TimeWindow) -> String {
        let (prep, span) = window.title_span();
        match self.title_form {
            TitleForm::PerGroup => format!(
                "{} per {} usage for jobs completed {prep} <strong>{span}</strong>",
                self.label,
                table.singular()
            ),
            TitleForm::Longest => {
                format!("{} {}' longest job completed {prep} <strong>{span}</strong>", self.label, table)
            }
            TitleForm::Histogram => {
                format!("Resource requests histogram for jobs completed {prep} {span}")
            }
        }
    }

    pub fn subject(&self, window: &TimeWindow) -> String {
        if window.period.is_fixed() {
            format!("{} {} {} {}", self.label, window.period.capitalized(), self.noun, window.date_label())
        } else {
            format!("{} {} {}", self.label, self.noun, window.datetime_range())
        }
    }
}

/// Default legend with `extra` applied in order: a known key keeps its slot
/// and takes the new text, a new key is appended.
fn merged(extra: Legend) -> Vec<(&'static str, &'static str)> {
    let mut items = DEFAULT_LEGEND.to_vec();
    for (key, text) in extra {
        match items.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = text,
            None => items.push((key, text)),
        }
    }
    items
}

/// Pool word used by the error email subject.
pub fn error_label(kind: FilterKind) -> &'static str {
    match kind {
        FilterKind::OsgCpu | FilterKind::OsgRetry | FilterKind::OsgLongJob | FilterKind::OsgJobDistro => "OSPool",
        FilterKind::ChtcGpu => "CHTC GPU",
        FilterKind::Base => "CHTC",
    }
}

impl Default for ReportStyle {
    fn default() -> Self {
        Self::for_kind(FilterKind::Base)
    }
}
