//! Frozen weekly market data
//!
//! The snapshot is produced upstream once per week and consumed read-only.
//! Checkpoints only ever see the indicators frozen from it at cycle start.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::{AccountId, Direction, Instrument};
use crate::error::{CouncilError, Result};

const WEEK_BARS: usize = 5;
const RANGE_BARS: usize = 20;

/// Daily OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// Upstream market snapshot for one weekly cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub as_of: DateTime<Utc>,
    /// Bars per instrument, oldest first
    pub history: BTreeMap<Instrument, Vec<Bar>>,
    #[serde(default)]
    pub buying_power: BTreeMap<AccountId, Decimal>,
}

impl MarketSnapshot {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn last_close(&self, instrument: Instrument) -> Option<Decimal> {
        self.history
            .get(&instrument)
            .and_then(|bars| bars.last())
            .map(|bar| bar.close)
    }

    /// Compact per-instrument summary for prompts
    pub fn describe(&self) -> String {
        let mut lines = Vec::with_capacity(self.history.len());
        for (instrument, bars) in &self.history {
            let Some(last) = bars.last() else { continue };
            let first = &bars[bars.len().saturating_sub(WEEK_BARS)];
            let change = if first.close.is_zero() {
                Decimal::ZERO
            } else {
                (last.close - first.close) / first.close * Decimal::ONE_HUNDRED
            };
            lines.push(format!(
                "{}: close {} ({:.2}% over {} sessions)",
                instrument,
                last.close,
                change,
                bars.len().min(WEEK_BARS)
            ));
        }
        lines.join("\n")
    }

    /// Derive the levels checkpoints may consult for the rest of the week.
    ///
    /// Refuses a snapshot newer than the freeze time.
    pub fn freeze(&self, frozen_at: DateTime<Utc>) -> Result<FrozenIndicators> {
        if self.as_of > frozen_at {
            return Err(CouncilError::StaleData(format!(
                "snapshot as of {} is newer than freeze time {}",
                self.as_of, frozen_at
            )));
        }

        let levels = self
            .history
            .iter()
            .filter_map(|(instrument, bars)| {
                InstrumentLevels::from_bars(bars).map(|levels| (*instrument, levels))
            })
            .collect();

        Ok(FrozenIndicators {
            snapshot_as_of: self.as_of,
            frozen_at,
            levels,
        })
    }
}

/// Reference levels for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentLevels {
    pub reference_close: Decimal,
    pub week_high: Decimal,
    pub week_low: Decimal,
    pub range_high: Decimal,
    pub range_low: Decimal,
}

impl InstrumentLevels {
    fn from_bars(bars: &[Bar]) -> Option<Self> {
        let last = bars.last()?;
        let week = &bars[bars.len().saturating_sub(WEEK_BARS)..];
        let range = &bars[bars.len().saturating_sub(RANGE_BARS)..];
        Some(Self {
            reference_close: last.close,
            week_high: week.iter().map(|b| b.high).max()?,
            week_low: week.iter().map(|b| b.low).min()?,
            range_high: range.iter().map(|b| b.high).max()?,
            range_low: range.iter().map(|b| b.low).min()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchSignal {
    Confirms,
    Invalidates,
}

/// A frozen level compared against the live price at each checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct WatchLevel {
    pub name: &'static str,
    pub level: Decimal,
    pub trigger: Trigger,
    pub signal: WatchSignal,
}

impl WatchLevel {
    pub fn is_triggered(&self, price: Decimal) -> bool {
        match self.trigger {
            Trigger::Above => price > self.level,
            Trigger::Below => price < self.level,
        }
    }
}

/// Indicator set frozen at the start of the week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenIndicators {
    pub snapshot_as_of: DateTime<Utc>,
    pub frozen_at: DateTime<Utc>,
    pub levels: BTreeMap<Instrument, InstrumentLevels>,
}

impl FrozenIndicators {
    /// Watch levels for a position held in `direction`
    pub fn watch_levels(&self, instrument: Instrument, direction: Direction) -> Vec<WatchLevel> {
        let Some(levels) = self.levels.get(&instrument) else {
            return Vec::new();
        };

        let (with, against) = match direction {
            Direction::Long => (Trigger::Above, Trigger::Below),
            Direction::Short => (Trigger::Below, Trigger::Above),
            Direction::Flat => return Vec::new(),
        };
        let (week_with, week_against, range_with, range_against) = match direction {
            Direction::Long => (levels.week_high, levels.week_low, levels.range_high, levels.range_low),
            _ => (levels.week_low, levels.week_high, levels.range_low, levels.range_high),
        };

        vec![
            WatchLevel {
                name: "week_breakout",
                level: week_with,
                trigger: with,
                signal: WatchSignal::Confirms,
            },
            WatchLevel {
                name: "range_breakout",
                level: range_with,
                trigger: with,
                signal: WatchSignal::Confirms,
            },
            WatchLevel {
                name: "week_breakdown",
                level: week_against,
                trigger: against,
                signal: WatchSignal::Invalidates,
            },
            WatchLevel {
                name: "range_breakdown",
                level: range_against,
                trigger: against,
                signal: WatchSignal::Invalidates,
            },
        ]
    }
}

/// Research context shared by every agent in a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPacket {
    pub as_of: DateTime<Utc>,
    pub body: String,
}

impl ResearchPacket {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        if let Ok(packet) = serde_json::from_str::<ResearchPacket>(&raw) {
            return Ok(packet);
        }
        Ok(Self {
            as_of: Utc::now(),
            body: raw,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    pub(crate) fn bars(closes: &[Decimal]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Bar {
                date: start + Duration::days(i as i64),
                open: *close,
                high: *close + dec!(1),
                low: *close - dec!(1),
                close: *close,
                volume: 1_000,
            })
            .collect()
    }

    pub(crate) fn snapshot(as_of: DateTime<Utc>) -> MarketSnapshot {
        let mut history = BTreeMap::new();
        history.insert(
            Instrument::Spy,
            bars(&[dec!(500), dec!(502), dec!(504), dec!(503), dec!(505), dec!(507)]),
        );
        history.insert(Instrument::Tlt, bars(&[dec!(90), dec!(91), dec!(89)]));
        MarketSnapshot {
            as_of,
            history,
            buying_power: BTreeMap::new(),
        }
    }

    #[test]
    fn test_freeze_rejects_newer_snapshot() {
        let now = Utc::now();
        let snap = snapshot(now);
        assert!(snap.freeze(now - Duration::hours(1)).is_err());
        assert!(snap.freeze(now).is_ok());
    }

    #[test]
    fn test_frozen_levels() {
        let now = Utc::now();
        let frozen = snapshot(now).freeze(now).unwrap();
        let spy = &frozen.levels[&Instrument::Spy];
        assert_eq!(spy.reference_close, dec!(507));
        // Last five bars: 502..507
        assert_eq!(spy.week_high, dec!(508));
        assert_eq!(spy.week_low, dec!(501));
        assert_eq!(spy.range_low, dec!(499));
    }

    #[test]
    fn test_watch_levels_mirror_for_short() {
        let now = Utc::now();
        let frozen = snapshot(now).freeze(now).unwrap();
        let long = frozen.watch_levels(Instrument::Spy, Direction::Long);
        let short = frozen.watch_levels(Instrument::Spy, Direction::Short);
        assert_eq!(long.len(), 4);
        assert!(long[0].is_triggered(dec!(509)));
        assert!(short[0].is_triggered(dec!(500)));
        assert!(frozen.watch_levels(Instrument::Spy, Direction::Flat).is_empty());
        assert!(frozen.watch_levels(Instrument::Gld, Direction::Long).is_empty());
    }
}
