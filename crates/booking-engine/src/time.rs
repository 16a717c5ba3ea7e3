//! Minute-of-day arithmetic and the provider-local view of "now".
//!
//! Every time of day inside the engine is a minute offset from local
//! midnight (`0..=1440`). Dates are [`NaiveDate`]s in the provider's
//! calendar. Functions here never read the system clock: the caller passes
//! the "now" anchor explicitly.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};

pub const MINUTES_PER_HOUR: u32 = 60;
pub const MINUTES_PER_DAY: u32 = 24 * MINUTES_PER_HOUR;

// ── Week start ──────────────────────────────────────────────────────────────

/// Which day begins a calendar week when seeding the booking calendar view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStartDay {
    /// ISO 8601 standard.
    #[default]
    Monday,
    /// US/Canada convention.
    Sunday,
}

/// How many days `weekday` is from the week-start day.
fn days_from_week_start(weekday: Weekday, week_start: WeekStartDay) -> i64 {
    match week_start {
        WeekStartDay::Monday => weekday.num_days_from_monday() as i64,
        WeekStartDay::Sunday => weekday.num_days_from_sunday() as i64,
    }
}

/// First day of the week containing `date`.
pub fn week_start_of(date: NaiveDate, week_start: WeekStartDay) -> NaiveDate {
    date - Duration::days(days_from_week_start(date.weekday(), week_start))
}

// ── HH:MM ───────────────────────────────────────────────────────────────────

/// Render a minute offset as `HH:MM`. `1440` renders as `24:00`.
pub fn format_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Parse `HH:MM` (or `HH:MM:SS`, seconds must be zero) into a minute offset.
///
/// `24:00` is accepted as the end-of-day boundary.
///
/// # Errors
///
/// Returns [`BookingError::InvalidTime`] for anything else.
pub fn parse_minutes(s: &str) -> Result<u32> {
    let s = s.trim();
    if s == "24:00" || s == "24:00:00" {
        return Ok(MINUTES_PER_DAY);
    }

    let time = NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| BookingError::InvalidTime(format!("'{}': {}", s, e)))?;

    if time.second() != 0 {
        return Err(BookingError::InvalidTime(format!(
            "'{}': sub-minute precision is not supported",
            s
        )));
    }

    Ok(time.hour() * MINUTES_PER_HOUR + time.minute())
}

/// Serde adapter storing minute offsets as `HH:MM` strings.
pub mod hhmm {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(minutes: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_minutes(*minutes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_minutes(&s).map_err(de::Error::custom)
    }
}

// ── Provider-local now ──────────────────────────────────────────────────────

/// The provider-local calendar date and minute-of-day for a UTC instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNow {
    pub date: NaiveDate,
    pub minute: u32,
}

impl LocalNow {
    /// Whether a slot starting at `start` on `date` is already in the past.
    ///
    /// Starts at or before the current minute on today's date count as past.
    pub fn has_passed(&self, date: NaiveDate, start: u32) -> bool {
        date < self.date || (date == self.date && start <= self.minute)
    }
}

/// Parse an IANA timezone string into `Tz`.
pub fn parse_timezone(s: &str) -> Result<Tz> {
    s.parse::<Tz>()
        .map_err(|_| BookingError::InvalidTimezone(format!("'{}'", s)))
}

/// Resolve a UTC anchor to the provider-local date and minute-of-day.
pub fn local_now(anchor: DateTime<Utc>, tz: Tz) -> LocalNow {
    let local = anchor.with_timezone(&tz);
    LocalNow {
        date: local.date_naive(),
        minute: local.hour() * MINUTES_PER_HOUR + local.minute(),
    }
}
