//! Market Schedule
//!
//! Maps wall-clock time to a [`ScheduleState`] using the exchange's local
//! time zone, regular trading hours, a pre-open preparation window, and a
//! list of non-trading dates.
//!
//! ```text
//!   Idle ──(open - pre_open)──► PreparingSession ──(open)──► SessionActive ──(close)──► Idle
//! ```
//!
//! Weekends and configured holidays are `Idle` all day.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

/// How many days ahead `next_transition` searches.
const TRANSITION_SEARCH_DAYS: usize = 21;

/// Process-wide session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    /// Outside trading hours.
    #[default]
    Idle,
    /// Pre-open window: connected and subscribed, not persisting.
    PreparingSession,
    /// Regular trading hours: connected and persisting.
    SessionActive,
}

impl ScheduleState {
    /// State name for logs and status payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PreparingSession => "preparing_session",
            Self::SessionActive => "session_active",
        }
    }

    /// Whether connections should be live in this state.
    #[must_use]
    pub const fn expects_connections(self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Numeric encoding for gauges.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::PreparingSession => 1.0,
            Self::SessionActive => 2.0,
        }
    }
}

/// Trading calendar for one exchange.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    timezone: Tz,
    open: NaiveTime,
    close: NaiveTime,
    pre_open: TimeDelta,
    holidays: BTreeSet<NaiveDate>,
}

impl MarketCalendar {
    /// Create a calendar.
    #[must_use]
    pub const fn new(
        timezone: Tz,
        open: NaiveTime,
        close: NaiveTime,
        pre_open: TimeDelta,
        holidays: BTreeSet<NaiveDate>,
    ) -> Self {
        Self {
            timezone,
            open,
            close,
            pre_open,
            holidays,
        }
    }

    /// US equities: 09:30-16:00 New York time with a 30 minute pre-open window.
    #[must_use]
    pub fn us_equities() -> Self {
        Self::new(
            chrono_tz::America::New_York,
            NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            TimeDelta::minutes(30),
            BTreeSet::new(),
        )
    }

    /// Exchange time zone.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Local time the preparation window starts.
    #[must_use]
    pub fn prepare_at(&self) -> NaiveTime {
        self.open - self.pre_open
    }

    /// Whether the exchange trades on `date`.
    #[must_use]
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// State the schedule calls for at `now`.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> ScheduleState {
        let local = now.with_timezone(&self.timezone);
        if !self.is_trading_day(local.date_naive()) {
            return ScheduleState::Idle;
        }

        let time = local.time();
        if time >= self.open && time < self.close {
            ScheduleState::SessionActive
        } else if time >= self.prepare_at() && time < self.open {
            ScheduleState::PreparingSession
        } else {
            ScheduleState::Idle
        }
    }

    /// Next instant after `now` at which the computed state changes, and the
    /// state it changes to.
    #[must_use]
    pub fn next_transition(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, ScheduleState)> {
        let current = self.state_at(now);
        let start = now.with_timezone(&self.timezone).date_naive();
        let boundaries = [self.prepare_at(), self.open, self.close];

        start
            .iter_days()
            .take(TRANSITION_SEARCH_DAYS)
            .filter(|date| self.is_trading_day(*date))
            .flat_map(|date| boundaries.map(|time| date.and_time(time)))
            .filter_map(|naive| self.timezone.from_local_datetime(&naive).earliest())
            .map(|local| local.with_timezone(&Utc))
            .filter(|instant| *instant > now)
            .map(|instant| (instant, self.state_at(instant)))
            .find(|(_, state)| *state != current)
    }
}

impl Default for MarketCalendar {
    fn default() -> Self {
        Self::us_equities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    // January: New York is UTC-5.
    #[test_case("2024-01-16T13:59:00Z" => ScheduleState::Idle ; "before pre-open")]
    #[test_case("2024-01-16T14:00:00Z" => ScheduleState::PreparingSession ; "pre-open starts")]
    #[test_case("2024-01-16T14:29:59Z" => ScheduleState::PreparingSession ; "last pre-open second")]
    #[test_case("2024-01-16T14:30:00Z" => ScheduleState::SessionActive ; "market open")]
    #[test_case("2024-01-16T20:59:59Z" => ScheduleState::SessionActive ; "just before close")]
    #[test_case("2024-01-16T21:00:00Z" => ScheduleState::Idle ; "market close")]
    #[test_case("2024-01-20T15:00:00Z" => ScheduleState::Idle ; "saturday")]
    #[test_case("2024-01-21T15:00:00Z" => ScheduleState::Idle ; "sunday")]
    fn state_at_winter(now: &str) -> ScheduleState {
        MarketCalendar::us_equities().state_at(utc(now))
    }

    #[test]
    fn state_at_respects_daylight_saving() {
        // July: New York is UTC-4, so 13:30Z is the open.
        let calendar = MarketCalendar::us_equities();
        assert_eq!(
            calendar.state_at(utc("2024-07-16T13:30:00Z")),
            ScheduleState::SessionActive
        );
        assert_eq!(
            calendar.state_at(utc("2024-07-16T13:00:00Z")),
            ScheduleState::PreparingSession
        );
    }

    #[test]
    fn holidays_are_idle() {
        let holiday = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let calendar = MarketCalendar::new(
            chrono_tz::America::New_York,
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            TimeDelta::minutes(30),
            BTreeSet::from([holiday]),
        );
        assert!(!calendar.is_trading_day(holiday));
        assert_eq!(
            calendar.state_at(utc("2024-01-15T15:00:00Z")),
            ScheduleState::Idle
        );
    }

    #[test]
    fn next_transition_within_day() {
        let calendar = MarketCalendar::us_equities();
        let (at, state) = calendar
            .next_transition(utc("2024-01-16T14:10:00Z"))
            .unwrap();
        assert_eq!(at, utc("2024-01-16T14:30:00Z"));
        assert_eq!(state, ScheduleState::SessionActive);
    }

    #[test]
    fn next_transition_skips_weekend() {
        let calendar = MarketCalendar::us_equities();
        let (at, state) = calendar
            .next_transition(utc("2024-01-19T22:00:00Z"))
            .unwrap();
        assert_eq!(at, utc("2024-01-22T14:00:00Z"));
        assert_eq!(state, ScheduleState::PreparingSession);
    }

    #[test]
    fn next_transition_skips_holiday() {
        let calendar = MarketCalendar::new(
            chrono_tz::America::New_York,
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            TimeDelta::minutes(30),
            BTreeSet::from([NaiveDate::from_ymd_opt(2024, 1, 22).unwrap()]),
        );
        let (at, _) = calendar
            .next_transition(utc("2024-01-19T22:00:00Z"))
            .unwrap();
        assert_eq!(at, utc("2024-01-23T14:00:00Z"));
    }

    #[test]
    fn next_transition_at_boundary_moves_forward() {
        let calendar = MarketCalendar::us_equities();
        let (at, state) = calendar
            .next_transition(utc("2024-01-16T14:30:00Z"))
            .unwrap();
        assert_eq!(at, utc("2024-01-16T21:00:00Z"));
        assert_eq!(state, ScheduleState::Idle);
    }

    #[test]
    fn only_idle_expects_no_connections() {
        assert!(!ScheduleState::Idle.expects_connections());
        assert!(ScheduleState::PreparingSession.expects_connections());
        assert!(ScheduleState::SessionActive.expects_connections());
    }
}
