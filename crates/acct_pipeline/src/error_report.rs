//! Mail the tail of a failed run's log.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use acct_filters::FilterKind;
use acct_io::mail::{self, DeliveryReport, MailRelay, OutgoingMail};
use acct_io::IoError;
use acct_report::error_email;

use crate::{PipelineError, RunContext};

pub const DEFAULT_TAIL_LINES: usize = 10;

/// Last `n` lines of `path`; lines that are not valid UTF-8 are converted lossily.
pub fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>, PipelineError> {
    let file = File::open(path).map_err(|e| IoError::Path(format!("{}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let mut tail: VecDeque<String> = VecDeque::with_capacity(n);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).map_err(IoError::from)? == 0 {
            break;
        }
        if n == 0 {
            continue;
        }
        if tail.len() == n {
            tail.pop_front();
        }
        tail.push_back(String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string());
    }
    Ok(tail.into())
}

/// Send the error email for a `kind` report. Every recipient must accept it.
pub fn run_error_report(
    ctx: &RunContext,
    log_file: &Path,
    lines: usize,
    kind: FilterKind,
    relay: &dyn MailRelay,
) -> Result<DeliveryReport, PipelineError> {
    let tail = tail_lines(log_file, lines)?;
    tracing::info!(log = %log_file.display(), lines = tail.len(), "sending error email");

    let message = OutgoingMail {
        subject: error_email::subject(kind, &ctx.window),
        html: error_email::body(&tail),
        attachments: Vec::new(),
    };
    let report = mail::send(&ctx.mail, relay, &message)?;
    if !report.all_delivered() {
        return Err(PipelineError::Undelivered(report.failed));
    }
    Ok(report)
}
