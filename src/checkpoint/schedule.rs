use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, TimeZone, Utc, Weekday};

use crate::config::CheckpointConfig;
use crate::error::{CouncilError, Result};

/// Fixed intraday checkpoint times on exchange trading days (Mon-Fri)
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSchedule {
    times: Vec<NaiveTime>,
    offset: FixedOffset,
}

impl CheckpointSchedule {
    pub fn from_config(config: &CheckpointConfig) -> Result<Self> {
        let mut times = config
            .times
            .iter()
            .map(|raw| {
                NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                    .map_err(|e| CouncilError::InvalidConfig(format!("checkpoint time '{}': {}", raw, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        if times.is_empty() {
            return Err(CouncilError::InvalidConfig("no checkpoint times configured".into()));
        }
        times.sort();
        times.dedup();

        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            CouncilError::InvalidConfig(format!("utc offset {} minutes out of range", config.utc_offset_minutes))
        })?;

        Ok(Self { times, offset })
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    fn is_trading_day(weekday: Weekday) -> bool {
        !matches!(weekday, Weekday::Sat | Weekday::Sun)
    }

    /// First checkpoint strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        let mut date = local.date_naive();

        // A week always contains a trading day
        for _ in 0..8 {
            if Self::is_trading_day(date.weekday()) {
                for time in &self.times {
                    if let Some(candidate) = self.offset.from_local_datetime(&date.and_time(*time)).single() {
                        let candidate = candidate.with_timezone(&Utc);
                        if candidate > now {
                            return candidate;
                        }
                    }
                }
            }
            date = date.succ_opt().unwrap_or(date);
        }
        now + Duration::days(1)
    }

    /// The checkpoint within `tolerance` of `now`, if any
    pub fn slot_at(&self, now: DateTime<Utc>, tolerance: Duration) -> Option<NaiveTime> {
        let local = now.with_timezone(&self.offset);
        if !Self::is_trading_day(local.weekday()) {
            return None;
        }
        let time = local.time();
        self.times
            .iter()
            .copied()
            .find(|t| (time - *t).abs() <= tolerance)
    }

    pub fn is_checkpoint_time(&self, now: DateTime<Utc>, tolerance: Duration) -> bool {
        self.slot_at(now, tolerance).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> CheckpointSchedule {
        CheckpointSchedule::from_config(&CheckpointConfig::default()).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_next_after_same_day() {
        // Monday 2026-01-05 09:00 ET = 14:00 UTC; next is 10:00 ET
        assert_eq!(
            schedule().next_after(utc("2026-01-05T14:00:00Z")),
            utc("2026-01-05T15:00:00Z")
        );
        // Exactly on a checkpoint moves to the following one (11:30 ET)
        assert_eq!(
            schedule().next_after(utc("2026-01-05T15:00:00Z")),
            utc("2026-01-05T16:30:00Z")
        );
    }

    #[test]
    fn test_next_after_skips_weekend() {
        // Friday 16:00 ET -> Monday 10:00 ET
        assert_eq!(
            schedule().next_after(utc("2026-01-09T21:00:00Z")),
            utc("2026-01-12T15:00:00Z")
        );
    }

    #[test]
    fn test_is_checkpoint_time() {
        let s = schedule();
        let tolerance = Duration::minutes(2);
        assert!(s.is_checkpoint_time(utc("2026-01-05T18:31:00Z"), tolerance));
        assert!(!s.is_checkpoint_time(utc("2026-01-05T18:40:00Z"), tolerance));
        // Saturday 10:00 ET
        assert!(!s.is_checkpoint_time(utc("2026-01-10T15:00:00Z"), tolerance));
    }

    #[test]
    fn test_bad_time_rejected() {
        let config = CheckpointConfig {
            times: vec!["25:00".into()],
            ..CheckpointConfig::default()
        };
        assert!(CheckpointSchedule::from_config(&config).is_err());
    }
}
