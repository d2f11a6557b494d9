// src/trigger/mod.rs

//! Where runs come from: manual invocations and the cron clock.
//!
//! A [`RunTrigger`] fixes the logical timestamp of a run and derives its
//! `run_id` from it, so triggering the same instant twice addresses the same
//! ledger entry.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::errors::{EltflowError, Result};

pub mod clock;
pub mod queue;

pub use clock::Clock;
pub use queue::{CatchupBehaviour, RunQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Manual,
    Scheduled,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTrigger {
    pub kind: TriggerKind,
    pub logical_ts: DateTime<Utc>,
}

impl RunTrigger {
    pub fn manual(logical_ts: DateTime<Utc>) -> Self {
        Self {
            kind: TriggerKind::Manual,
            logical_ts,
        }
    }

    pub fn scheduled(logical_ts: DateTime<Utc>) -> Self {
        Self {
            kind: TriggerKind::Scheduled,
            logical_ts,
        }
    }

    /// `manual__2024-05-01T10:00:00Z` style identifier.
    pub fn run_id(&self) -> String {
        format!(
            "{}__{}",
            self.kind.as_str(),
            self.logical_ts.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Parse a `--from` value: RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare
/// date (midnight UTC).
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let s = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(EltflowError::ConfigError(format!(
        "invalid timestamp '{input}': expected RFC 3339, 'YYYY-MM-DD HH:MM:SS' or 'YYYY-MM-DD'"
    )))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn run_id_is_stable_for_a_logical_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(RunTrigger::manual(ts).run_id(), "manual__2024-05-01T10:00:00Z");
        assert_eq!(RunTrigger::scheduled(ts).run_id(), "scheduled__2024-05-01T10:00:00Z");
    }

    #[test]
    fn parses_supported_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-01 00:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-01T02:00:00+02:00").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
