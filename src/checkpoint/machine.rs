//! Intraday conviction state machine
//!
//! `evaluate` is a pure function of its input. Rules are checked in order
//! and the first match wins.

use serde::{Deserialize, Serialize};

use crate::domain::{CheckpointAction, Direction, ExitPolicy, Instrument, MAX_CONVICTION};
use crate::execution::PositionSnapshot;
use crate::market::{FrozenIndicators, WatchSignal};

/// Conviction a FLIP never drops below
const MIN_FLIP_CONVICTION: f64 = 0.5;
/// |conviction| needed before two invalidations flip instead of reduce
const FLIP_THRESHOLD: f64 = 1.0;
const FLIP_INVALIDATIONS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInput {
    pub prior_conviction: f64,
    pub has_position: bool,
    /// Unrealized P&L as a fraction of cost basis, signed for the position side
    pub pnl_pct: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub invalidated: usize,
    pub confirmed: usize,
    /// Conviction moved per REDUCE or INCREASE
    pub step: f64,
}

impl CheckpointInput {
    /// Compare the live position against the levels frozen for `instrument`
    pub fn observe(
        indicators: &FrozenIndicators,
        instrument: Instrument,
        prior_conviction: f64,
        position: Option<&PositionSnapshot>,
        exit: Option<&ExitPolicy>,
        step: f64,
    ) -> Self {
        let direction = Direction::from_conviction(prior_conviction);
        let (invalidated, confirmed) = match position {
            Some(p) => {
                let levels = indicators.watch_levels(instrument, direction);
                let triggered = levels.iter().filter(|l| l.is_triggered(p.current_price));
                triggered.fold((0, 0), |(inv, conf), level| match level.signal {
                    WatchSignal::Invalidates => (inv + 1, conf),
                    WatchSignal::Confirms => (inv, conf + 1),
                })
            }
            None => (0, 0),
        };

        Self {
            prior_conviction,
            has_position: position.map(|p| !p.qty.is_zero()).unwrap_or(false),
            pnl_pct: position.map(|p| p.unrealized_plpc).unwrap_or(0.0),
            stop_loss_pct: exit.map(|e| e.stop_loss_pct),
            take_profit_pct: exit.map(|e| e.take_profit_pct),
            invalidated,
            confirmed,
            step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointVerdict {
    pub action: CheckpointAction,
    pub new_conviction: f64,
    pub reasoning: String,
}

impl CheckpointVerdict {
    fn new(action: CheckpointAction, new_conviction: f64, reasoning: String) -> Self {
        Self {
            action,
            new_conviction,
            reasoning,
        }
    }
}

fn reduce(conviction: f64, step: f64, why: String) -> CheckpointVerdict {
    let magnitude = conviction.abs() - step;
    if magnitude <= f64::EPSILON {
        CheckpointVerdict::new(CheckpointAction::Exit, 0.0, format!("{}; reduced to zero", why))
    } else {
        CheckpointVerdict::new(CheckpointAction::Reduce, conviction.signum() * magnitude, why)
    }
}

pub fn evaluate(input: &CheckpointInput) -> CheckpointVerdict {
    let c = input.prior_conviction;

    if !input.has_position && c == 0.0 {
        return CheckpointVerdict::new(CheckpointAction::Stay, 0.0, "flat with no position".into());
    }

    if let Some(stop) = input.stop_loss_pct {
        if input.has_position && input.pnl_pct <= -stop {
            return CheckpointVerdict::new(
                CheckpointAction::Exit,
                0.0,
                format!("pnl {:+.4} breached stop -{:.4}", input.pnl_pct, stop),
            );
        }
    }

    if input.invalidated >= FLIP_INVALIDATIONS && c.abs() >= FLIP_THRESHOLD {
        let flipped = -c.signum() * (c.abs() / 2.0).max(MIN_FLIP_CONVICTION);
        return CheckpointVerdict::new(
            CheckpointAction::Flip,
            flipped,
            format!("{} watch levels invalidated at conviction {:+.2}", input.invalidated, c),
        );
    }

    if input.invalidated >= 1 && c != 0.0 {
        return reduce(c, input.step, format!("{} watch level invalidated", input.invalidated));
    }

    if let Some(take) = input.take_profit_pct {
        if input.has_position && input.pnl_pct >= take {
            return reduce(c, input.step, format!("pnl {:+.4} reached take {:.4}", input.pnl_pct, take));
        }
    }

    if input.confirmed >= 1 && input.pnl_pct > 0.0 && c != 0.0 && c.abs() < MAX_CONVICTION {
        let raised = c.signum() * (c.abs() + input.step).min(MAX_CONVICTION);
        return CheckpointVerdict::new(
            CheckpointAction::Increase,
            raised,
            format!("{} watch level confirmed with pnl {:+.4}", input.confirmed, input.pnl_pct),
        );
    }

    CheckpointVerdict::new(CheckpointAction::Stay, c, "no rule triggered".into())
}
