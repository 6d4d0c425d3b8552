//! Calendar-day windows on the server's local wall clock.
//!
//! A day window runs from local midnight (`00:00:00.000`) through
//! `23:59:59.999`, inclusive on both ends. Timestamps are stored as UTC
//! instants and bucketed into days only through these helpers, so every
//! storage backend agrees on which day an entry belongs to.

use std::ops::RangeInclusive;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Inclusive instant range covering one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub day: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    #[must_use]
    pub fn of(day: NaiveDate) -> Self {
        Self {
            day,
            start: start_of_day(day).with_timezone(&Utc),
            end: end_of_day(day).with_timezone(&Utc),
        }
    }

    #[must_use]
    pub fn containing(instant: DateTime<Utc>) -> Self {
        Self::of(local_day(instant))
    }

    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Local midnight of `day`. Midnight swallowed by a DST gap resolves to the
/// first instant that exists on that day.
#[must_use]
pub fn start_of_day(day: NaiveDate) -> DateTime<Local> {
    resolve_local(day.and_time(NaiveTime::MIN))
}

/// The last millisecond of `day` on the local clock.
#[must_use]
pub fn end_of_day(day: NaiveDate) -> DateTime<Local> {
    match day.succ_opt() {
        Some(next) => start_of_day(next) - Duration::milliseconds(1),
        None => resolve_local(day.and_time(NaiveTime::MIN) + Duration::milliseconds(86_399_999)),
    }
}

/// Local calendar day an instant falls on.
#[must_use]
pub fn local_day(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&Local).date_naive()
}

/// Days whose local midnight lies within `[start, end]`.
///
/// Returns `None` when no midnight falls in the range.
#[must_use]
pub fn day_starts_within(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<RangeInclusive<NaiveDate>> {
    if start > end {
        return None;
    }
    let mut first = local_day(start);
    if start_of_day(first).with_timezone(&Utc) < start {
        first = first.succ_opt()?;
    }
    let last = local_day(end);
    (first <= last).then_some(first..=last)
}

fn resolve_local(naive: NaiveDateTime) -> DateTime<Local> {
    let mut candidate = naive;
    // DST transitions shift by at most a few hours; step past the gap.
    for _ in 0..16 {
        if let Some(dt) = Local.from_local_datetime(&candidate).earliest() {
            return dt;
        }
        candidate += Duration::minutes(15);
    }
    Local.from_utc_datetime(&naive)
}
