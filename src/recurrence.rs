//! Recurrence patterns and next-run computation.
//!
//! Day, week and month steps use calendar arithmetic on the wall clock of the
//! `from` time's zone, so a daily task at 09:00 stays at 09:00 across DST
//! changes. Hourly steps are absolute.

use crate::error::ScheduleError;
use chrono::{DateTime, Days, Duration, Months, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How often a scheduled task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    /// One-time task.
    #[default]
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::None => "",
            Recurrence::Hourly => "hourly",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        }
    }

    /// The next occurrence after `from`, or `None` for one-time tasks.
    pub fn next_after<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.nth_after(from, 1)
    }

    /// The `n`th occurrence counted from `anchor`.
    ///
    /// Stepping from a fixed anchor keeps the anchor's day of month: a task
    /// anchored on the 31st lands on Feb 28/29 and back on Mar 31.
    pub fn nth_after<Tz: TimeZone>(&self, anchor: &DateTime<Tz>, n: u32) -> Option<DateTime<Tz>> {
        match self {
            Recurrence::None => None,
            Recurrence::Hourly => anchor.clone().checked_add_signed(Duration::hours(i64::from(n))),
            Recurrence::Daily => shift_wall_clock(anchor, |t| t.checked_add_days(Days::new(u64::from(n)))),
            Recurrence::Weekly => {
                shift_wall_clock(anchor, |t| t.checked_add_days(Days::new(7 * u64::from(n))))
            }
            Recurrence::Monthly => shift_wall_clock(anchor, |t| t.checked_add_months(Months::new(n))),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::None => f.write_str("none"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl FromStr for Recurrence {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Recurrence::None),
            "hourly" => Ok(Recurrence::Hourly),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            other => Err(ScheduleError::InvalidRecurrence(other.to_string())),
        }
    }
}

/// Apply `shift` to the local wall-clock time of `from` and map it back.
///
/// An ambiguous result (DST fall-back) resolves to the earlier instant; a
/// wall-clock time skipped by a DST jump lands one hour later.
fn shift_wall_clock<Tz, F>(from: &DateTime<Tz>, shift: F) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    F: FnOnce(NaiveDateTime) -> Option<NaiveDateTime>,
{
    let local = shift(from.naive_local())?;
    let tz = from.timezone();
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
}

/// Next scheduled time for a recurrence pattern.
///
/// Returns `None` both for `""` (no recurrence) and for unrecognized
/// patterns; parse with [`Recurrence::from_str`] to tell them apart.
pub fn next_run_time<Tz: TimeZone>(recurrence: &str, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    recurrence.parse::<Recurrence>().ok()?.next_after(from)
}
