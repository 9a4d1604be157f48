//! Injected time source and exchange trading hours.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use std::sync::{Arc, RwLock};

/// Source of "now" for everything time-dependent.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.write() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.write() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.read().map(|guard| *guard).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Regular session hours for an exchange in its local timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Exchange offset from UTC in minutes (IST = 330).
    pub utc_offset_minutes: i32,
    pub holidays: Vec<NaiveDate>,
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
            utc_offset_minutes: 330,
            holidays: Vec::new(),
        }
    }
}

impl MarketHours {
    fn local(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.naive_utc() + chrono::Duration::minutes(self.utc_offset_minutes as i64)
    }

    /// Exchange-local calendar date for an instant.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date()
    }

    /// Whether `date` is a weekday that is not a configured holiday.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Whether the exchange is in its regular session at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        if !self.is_trading_day(local.date()) {
            return false;
        }
        let time = local.time();
        time >= self.open && time < self.close
    }

    /// Date of the most recent completed session at `now`.
    pub fn last_session_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let local = self.local(now);
        let today = local.date();
        if self.is_trading_day(today) && local.time() >= self.close {
            today
        } else {
            self.previous_trading_day(today)
        }
    }

    /// Most recent trading day strictly before `date`.
    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date;
        // Bounded so a misconfigured holiday list cannot spin forever.
        for _ in 0..31 {
            match day.pred_opt() {
                Some(prev) => day = prev,
                None => return date,
            }
            if self.is_trading_day(day) {
                return day;
            }
        }
        day
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // 2024-03-04 is a Monday.
    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_open_during_session() {
        let hours = MarketHours::default();
        // 10:00 IST = 04:30 UTC
        assert!(hours.is_open(utc(2024, 3, 4, 4, 30)));
    }

    #[test]
    fn test_closed_before_open_and_at_close() {
        let hours = MarketHours::default();
        // 09:14 IST
        assert!(!hours.is_open(utc(2024, 3, 4, 3, 44)));
        // 15:30 IST
        assert!(!hours.is_open(utc(2024, 3, 4, 10, 0)));
    }

    #[test]
    fn test_closed_on_weekend_and_holiday() {
        let mut hours = MarketHours::default();
        // Saturday 10:00 IST
        assert!(!hours.is_open(utc(2024, 3, 9, 4, 30)));

        hours.holidays.push(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert!(!hours.is_open(utc(2024, 3, 4, 4, 30)));
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        let hours = MarketHours::default();
        // 2024-03-04 20:00 UTC is 2024-03-05 01:30 IST
        assert_eq!(
            hours.local_date(utc(2024, 3, 4, 20, 0)),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[test]
    fn test_previous_trading_day_skips_weekend_and_holidays() {
        let mut hours = MarketHours::default();
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert_eq!(
            hours.previous_trading_day(monday),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );

        hours.holidays.push(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(
            hours.previous_trading_day(monday),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }

    #[test]
    fn test_last_session_date_before_and_after_close() {
        let hours = MarketHours::default();
        // Monday 10:00 IST: Friday's session is the last complete one.
        assert_eq!(
            hours.last_session_date(utc(2024, 3, 4, 4, 30)),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        // Monday 16:00 IST
        assert_eq!(
            hours.last_session_date(utc(2024, 3, 4, 10, 30)),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
        );
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = utc(2024, 3, 4, 0, 0);
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
