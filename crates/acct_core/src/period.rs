//! Report periods and the half-open time window `[start_ts, end_ts)` a report covers.
//!
//! Windows are resolved against an injectable "now" so callers (and tests) pick
//! the time zone. The UTC offset in effect at the window start is kept on the
//! window, which makes every later label deterministic.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, Months, NaiveDate, NaiveDateTime, Offset, TimeZone};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

const DAY_SECS: i64 = 24 * 3600;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl ReportPeriod {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReportPeriod::Daily => "daily",
            ReportPeriod::Weekly => "weekly",
            ReportPeriod::Monthly => "monthly",
            ReportPeriod::Custom => "custom",
        }
    }

    pub const fn capitalized(self) -> &'static str {
        match self {
            ReportPeriod::Daily => "Daily",
            ReportPeriod::Weekly => "Weekly",
            ReportPeriod::Monthly => "Monthly",
            ReportPeriod::Custom => "Custom",
        }
    }

    /// Daily, weekly and monthly periods have a fixed length anchored on one bound.
    pub const fn is_fixed(self) -> bool {
        !matches!(self, ReportPeriod::Custom)
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportPeriod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(ReportPeriod::Daily),
            "weekly" => Ok(ReportPeriod::Weekly),
            "monthly" => Ok(ReportPeriod::Monthly),
            "custom" => Ok(ReportPeriod::Custom),
            other => Err(CoreError::UnknownPeriod(other.to_string())),
        }
    }
}

/// Pick the period actually used for a run.
///
/// Two explicit bounds always mean `custom`; otherwise the requested period
/// applies, falling back to `daily`.
pub fn effective_period(
    requested: Option<ReportPeriod>,
    start_ts: Option<i64>,
    end_ts: Option<i64>,
) -> ReportPeriod {
    if start_ts.is_some() && end_ts.is_some() {
        ReportPeriod::Custom
    } else {
        requested.unwrap_or(ReportPeriod::Daily)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_ts: i64,
    pub end_ts: i64,
    pub period: ReportPeriod,
    /// Offset used when rendering dates (seconds east of UTC).
    #[serde(default)]
    pub utc_offset_secs: i32,
}

impl TimeWindow {
    /// Window rendered in UTC.
    pub fn new(start_ts: i64, end_ts: i64, period: ReportPeriod) -> Self {
        Self { start_ts, end_ts, period, utc_offset_secs: 0 }
    }

    /// Window rendered with the offset `tz` has at `start_ts`.
    pub fn in_zone<Tz: TimeZone>(
        start_ts: i64,
        end_ts: i64,
        period: ReportPeriod,
        tz: &Tz,
    ) -> Result<Self, CoreError> {
        let start = tz
            .timestamp_opt(start_ts, 0)
            .single()
            .ok_or(CoreError::InvalidTimestamp(start_ts))?;
        Ok(Self {
            start_ts,
            end_ts,
            period,
            utc_offset_secs: start.offset().fix().local_minus_utc(),
        })
    }

    fn local(&self, ts: i64) -> Option<DateTime<FixedOffset>> {
        FixedOffset::east_opt(self.utc_offset_secs)?.timestamp_opt(ts, 0).single()
    }

    fn fmt_ts(&self, ts: i64, pattern: &str) -> String {
        match self.local(ts) {
            Some(dt) => dt.format(pattern).to_string(),
            None => ts.to_string(),
        }
    }

    /// `YYYY-MM-DD` of the window start.
    pub fn date_label(&self) -> String {
        self.fmt_ts(self.start_ts, "%Y-%m-%d")
    }

    pub fn end_date_label(&self) -> String {
        self.fmt_ts(self.end_ts, "%Y-%m-%d")
    }

    /// Tag embedded in CSV file names.
    pub fn csv_tag(&self) -> String {
        if self.period.is_fixed() {
            format!("{}_{}", self.period, self.date_label())
        } else {
            format!(
                "{}_{}",
                self.fmt_ts(self.start_ts, "%Y%m%d%H%M%S"),
                self.fmt_ts(self.end_ts, "%Y%m%d%H%M%S")
            )
        }
    }

    /// Preposition and dates for report titles: `("on", "2024-03-14")` or
    /// `("from", "2024-03-07 to 2024-03-14")`.
    pub fn title_span(&self) -> (&'static str, String) {
        match self.period {
            ReportPeriod::Daily => ("on", self.date_label()),
            ReportPeriod::Weekly | ReportPeriod::Monthly => {
                ("from", format!("{} to {}", self.date_label(), self.end_date_label()))
            }
            ReportPeriod::Custom => ("from", self.datetime_range()),
        }
    }

    /// `start to end` with times, used for custom windows.
    pub fn datetime_range(&self) -> String {
        format!(
            "{} to {}",
            self.fmt_ts(self.start_ts, "%Y-%m-%d %H:%M:%S"),
            self.fmt_ts(self.end_ts, "%Y-%m-%d %H:%M:%S")
        )
    }

    /// Whole days covered, rounded.
    pub fn days(&self) -> i64 {
        ((self.end_ts - self.start_ts) as f64 / DAY_SECS as f64).round() as i64
    }
}

/// Resolve the report window.
///
/// - `custom` requires both bounds and returns them sorted.
/// - Fixed periods extend forward from `start_ts`, backward from `end_ts`,
///   or backward from local midnight of `now` when neither is given.
/// - Monthly windows move one calendar month, clamping the day of month.
pub fn resolve_window<Tz: TimeZone>(
    period: ReportPeriod,
    start_ts: Option<i64>,
    end_ts: Option<i64>,
    now: &DateTime<Tz>,
) -> Result<TimeWindow, CoreError> {
    let tz = now.timezone();

    match (period, start_ts, end_ts) {
        (ReportPeriod::Custom, Some(a), Some(b)) => {
            return TimeWindow::in_zone(a.min(b), a.max(b), period, &tz);
        }
        (ReportPeriod::Custom, _, _) => return Err(CoreError::MissingCustomBound),
        (_, Some(_), Some(_)) => return Err(CoreError::BoundsRequireCustom),
        _ => {}
    }

    let (ts0, forward) = match (start_ts, end_ts) {
        (Some(s), _) => (s, true),
        (None, Some(e)) => (e, false),
        (None, None) => (local_midnight(now)?, false),
    };
    let sign = if forward { 1 } else { -1 };

    let ts1 = match period {
        ReportPeriod::Daily => ts0 + sign * DAY_SECS,
        ReportPeriod::Weekly => ts0 + sign * 7 * DAY_SECS,
        ReportPeriod::Monthly => shift_month(ts0, forward, &tz)?,
        ReportPeriod::Custom => return Err(CoreError::MissingCustomBound),
    };

    TimeWindow::in_zone(ts0.min(ts1), ts0.max(ts1), period, &tz)
}

/// [`resolve_window`] against the local clock.
pub fn resolve_window_now(
    period: ReportPeriod,
    start_ts: Option<i64>,
    end_ts: Option<i64>,
) -> Result<TimeWindow, CoreError> {
    resolve_window(period, start_ts, end_ts, &Local::now())
}

/// Custom window from local midnight of `start` to local midnight of `end`.
pub fn window_from_dates<Tz: TimeZone>(
    start: NaiveDate,
    end: NaiveDate,
    tz: &Tz,
) -> Result<TimeWindow, CoreError> {
    let s = midnight_ts(start, tz)?;
    let e = midnight_ts(end, tz)?;
    TimeWindow::in_zone(s.min(e), s.max(e), ReportPeriod::Custom, tz)
}

fn local_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Result<i64, CoreError> {
    midnight_ts(now.date_naive(), &now.timezone())
}

fn midnight_ts<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Result<i64, CoreError> {
    let naive: NaiveDateTime = date
        .and_hms_opt(0, 0, 0)
        .ok_or(CoreError::InvalidTimestamp(0))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or(CoreError::InvalidTimestamp(0))
}

fn shift_month<Tz: TimeZone>(ts: i64, forward: bool, tz: &Tz) -> Result<i64, CoreError> {
    let local = tz
        .timestamp_opt(ts, 0)
        .single()
        .ok_or(CoreError::InvalidTimestamp(ts))?
        .naive_local();
    let shifted = if forward {
        local.checked_add_months(Months::new(1))
    } else {
        local.checked_sub_months(Months::new(1))
    }
    .ok_or(CoreError::InvalidTimestamp(ts))?;
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or(CoreError::InvalidTimestamp(ts))
}
