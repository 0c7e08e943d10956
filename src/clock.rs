//! Time source for the ledger
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings with millisecond
//! precision, so lexical order in SQLite matches chronological order.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Format used for every timestamp column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Render a UTC instant for a TEXT column
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Start of the UTC calendar day containing `at`
pub fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = at
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| at.naive_utc());
    DateTime::from_naive_utc_and_offset(midnight, Utc)
}

/// Source of "now" for ledger writes
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_is_fixed_width() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(at), "2026-03-04T05:06:07.000Z");
    }

    #[test]
    fn test_day_start_is_utc_midnight() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 23, 59, 59).unwrap();
        assert_eq!(format_timestamp(day_start(at)), "2026-03-04T00:00:00.000Z");
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap());
        clock.advance(Duration::hours(13));
        assert_eq!(format_timestamp(clock.now()), "2026-01-02T01:00:00.000Z");
    }
}
