use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, Timelike};
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};

/// Eligibility rule applied to every candidate that passed the name filters.
/// Exactly one policy is active per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// A file is stable once `now - mtime >= min_age`.
    StableAge { min_age: Duration },
    /// Half-open window: `start <= mtime < end`.
    Window { start: SystemTime, end: SystemTime },
}

impl SelectionPolicy {
    pub fn is_eligible(&self, modified: SystemTime, now: SystemTime) -> bool {
        match self {
            SelectionPolicy::StableAge { min_age } => {
                // An mtime in the future has age zero.
                let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
                age >= *min_age
            }
            SelectionPolicy::Window { start, end } => *start <= modified && modified < *end,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SelectionPolicy::StableAge { min_age } => {
                format!("stable for at least {}s", min_age.as_secs())
            }
            SelectionPolicy::Window { start, end } => format!(
                "modified in [{}, {})",
                DateTime::<Local>::from(*start).format("%Y-%m-%d %H:%M:%S"),
                DateTime::<Local>::from(*end).format("%Y-%m-%d %H:%M:%S"),
            ),
        }
    }
}

/// How a time window is defined in configuration, resolved against the run clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSpec {
    /// Yesterday 00:00 up to today 00:00, local time.
    PreviousDay,
    /// The previous full clock hour.
    PreviousHour,
    /// Today 00:00 up to tomorrow 00:00.
    CurrentDay,
    Explicit {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

impl WindowSpec {
    pub fn resolve(&self, now: DateTime<Local>) -> Result<SelectionPolicy> {
        let (start, end) = match self {
            WindowSpec::PreviousDay => {
                let today = now.date_naive();
                let start = local_midnight(today - ChronoDuration::days(1))?;
                (start, local_midnight(today)?)
            }
            WindowSpec::CurrentDay => {
                let today = now.date_naive();
                (local_midnight(today)?, local_midnight(today + ChronoDuration::days(1))?)
            }
            WindowSpec::PreviousHour => {
                let hour_start = now
                    .with_minute(0)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .ok_or_else(|| Error::Config("cannot truncate clock to the hour".into()))?;
                (hour_start - ChronoDuration::hours(1), hour_start)
            }
            WindowSpec::Explicit { start, end } => (to_local(*start)?, to_local(*end)?),
        };

        if start >= end {
            return Err(Error::Config(format!(
                "selection window start {} is not before end {}",
                start, end
            )));
        }

        Ok(SelectionPolicy::Window {
            start: start.into(),
            end: end.into(),
        })
    }
}

fn local_midnight(date: NaiveDate) -> Result<DateTime<Local>> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::Config(format!("invalid date {}", date)))?;
    to_local(midnight)
}

fn to_local(naive: NaiveDateTime) -> Result<DateTime<Local>> {
    // DST gaps have no local representation; folds take the earlier instant.
    naive
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| Error::Config(format!("{} does not exist in the local time zone", naive)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_stable_age_is_inclusive() {
        let now = SystemTime::UNIX_EPOCH + secs(10_000);
        let policy = SelectionPolicy::StableAge { min_age: secs(120) };
        assert!(policy.is_eligible(now - secs(120), now));
        assert!(policy.is_eligible(now - secs(121), now));
        assert!(!policy.is_eligible(now - secs(119), now));
    }

    #[test]
    fn test_future_mtime_is_not_stable() {
        let now = SystemTime::UNIX_EPOCH + secs(10_000);
        let policy = SelectionPolicy::StableAge { min_age: secs(1) };
        assert!(!policy.is_eligible(now + secs(60), now));
    }

    #[test]
    fn test_window_is_half_open() {
        let start = SystemTime::UNIX_EPOCH + secs(1_000);
        let end = SystemTime::UNIX_EPOCH + secs(2_000);
        let policy = SelectionPolicy::Window { start, end };
        let now = SystemTime::UNIX_EPOCH + secs(50_000);
        assert!(policy.is_eligible(start, now));
        assert!(policy.is_eligible(end - secs(1), now));
        assert!(!policy.is_eligible(end, now));
        assert!(!policy.is_eligible(start - secs(1), now));
    }

    #[test]
    fn test_previous_day_window() {
        let now = Local.with_ymd_and_hms(2026, 5, 20, 14, 30, 0).unwrap();
        let policy = WindowSpec::PreviousDay.resolve(now).unwrap();
        let yesterday_ten = Local.with_ymd_and_hms(2026, 5, 19, 10, 0, 0).unwrap();
        let today_one = Local.with_ymd_and_hms(2026, 5, 20, 1, 0, 0).unwrap();
        let today_midnight = Local.with_ymd_and_hms(2026, 5, 20, 0, 0, 0).unwrap();
        assert!(policy.is_eligible(yesterday_ten.into(), now.into()));
        assert!(!policy.is_eligible(today_one.into(), now.into()));
        assert!(!policy.is_eligible(today_midnight.into(), now.into()));
    }

    #[test]
    fn test_previous_hour_window() {
        let now = Local.with_ymd_and_hms(2026, 5, 20, 14, 30, 12).unwrap();
        let policy = WindowSpec::PreviousHour.resolve(now).unwrap();
        let expected_start: SystemTime =
            Local.with_ymd_and_hms(2026, 5, 20, 13, 0, 0).unwrap().into();
        let expected_end: SystemTime =
            Local.with_ymd_and_hms(2026, 5, 20, 14, 0, 0).unwrap().into();
        assert_eq!(
            policy,
            SelectionPolicy::Window {
                start: expected_start,
                end: expected_end
            }
        );
    }

    #[test]
    fn test_explicit_window_rejects_inverted_bounds() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let now = Local::now();
        assert!(WindowSpec::Explicit { start, end }.resolve(now).is_err());
    }
}
