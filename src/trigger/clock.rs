// src/trigger/clock.rs

//! Cron-like schedule evaluation.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::warn;

use crate::errors::{EltflowError, Result};

/// Upper bound on the ticks a single catch-up computation returns.
pub const MAX_CATCHUP_TICKS: usize = 500;

/// A parsed schedule.
///
/// Accepts the `cron` crate syntax (seconds first, 6 or 7 fields), the
/// classic 5-field crontab form (seconds assumed `0`) and the `@hourly` style
/// aliases.
#[derive(Debug, Clone)]
pub struct Clock {
    expression: String,
    schedule: Schedule,
}

impl Clock {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| EltflowError::Schedule {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First tick strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }

    /// Most recent tick at or before `now`.
    pub fn latest_tick(&self, now: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let probe = *now + Duration::seconds(1);
        self.schedule
            .after(&probe)
            .next_back()
            .filter(|tick| tick <= now)
    }

    /// Ticks in `(after, until]`, oldest first, at most `limit` of them.
    pub fn ticks_between(
        &self,
        after: &DateTime<Utc>,
        until: &DateTime<Utc>,
        limit: usize,
    ) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(after)
            .take_while(|tick| tick <= until)
            .take(limit)
            .collect()
    }

    /// Ticks that should run now, oldest first.
    ///
    /// - `catchup = false`: only the latest tick at or before `now`, and only
    ///   if it is newer than `last_run`.
    /// - `catchup = true`: every tick after `last_run` (or from `start_date`
    ///   inclusive when nothing ran yet) up to `now`, capped at
    ///   [`MAX_CATCHUP_TICKS`]. Without either bound it behaves like
    ///   `catchup = false`.
    pub fn due_ticks(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        catchup: bool,
        start_date: Option<DateTime<Utc>>,
    ) -> Vec<DateTime<Utc>> {
        let lower = match (last_run, start_date) {
            (Some(last), _) => Some(last),
            (None, Some(start)) => Some(start - Duration::seconds(1)),
            (None, None) => None,
        };

        match (catchup, lower) {
            (true, Some(after)) => {
                let ticks = self.ticks_between(&after, &now, MAX_CATCHUP_TICKS);
                if ticks.len() == MAX_CATCHUP_TICKS {
                    warn!(
                        schedule = %self.expression,
                        limit = MAX_CATCHUP_TICKS,
                        "catch-up truncated; remaining ticks run on the next pass"
                    );
                }
                ticks
            }
            _ => self
                .latest_tick(&now)
                .filter(|tick| lower.is_none_or(|l| *tick > l))
                .into_iter()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    #[test]
    fn accepts_aliases_and_five_field_crontab() {
        assert!(Clock::parse("@hourly").is_ok());
        assert!(Clock::parse("*/15 * * * *").is_ok());
        assert!(Clock::parse("0 0 * * * *").is_ok());
        assert!(matches!(
            Clock::parse("every tuesday"),
            Err(EltflowError::Schedule { .. })
        ));
    }

    #[test]
    fn next_after_is_strict() {
        let clock = Clock::parse("@hourly").unwrap();
        assert_eq!(clock.next_after(&at(10, 0)), Some(at(11, 0)));
        assert_eq!(clock.next_after(&at(10, 30)), Some(at(11, 0)));
    }

    #[test]
    fn catchup_backfills_every_missed_tick() {
        let clock = Clock::parse("@hourly").unwrap();
        let ticks = clock.due_ticks(Some(at(7, 0)), at(10, 30), true, None);
        assert_eq!(ticks, vec![at(8, 0), at(9, 0), at(10, 0)]);
    }

    #[test]
    fn without_catchup_only_latest_tick_runs() {
        let clock = Clock::parse("@hourly").unwrap();
        let ticks = clock.due_ticks(Some(at(7, 0)), at(10, 30), false, None);
        assert_eq!(ticks, vec![at(10, 0)]);

        let nothing_new = clock.due_ticks(Some(at(10, 0)), at(10, 30), false, None);
        assert!(nothing_new.is_empty());
    }

    #[test]
    fn start_date_is_inclusive_for_first_backfill() {
        let clock = Clock::parse("@hourly").unwrap();
        let ticks = clock.due_ticks(None, at(10, 30), true, Some(at(9, 0)));
        assert_eq!(ticks, vec![at(9, 0), at(10, 0)]);
    }
}
