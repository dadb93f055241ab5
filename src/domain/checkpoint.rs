use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::AccountId;

/// Outcome of one checkpoint evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckpointAction {
    Stay,
    Exit,
    Flip,
    Reduce,
    Increase,
}

impl CheckpointAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointAction::Stay => "STAY",
            CheckpointAction::Exit => "EXIT",
            CheckpointAction::Flip => "FLIP",
            CheckpointAction::Reduce => "REDUCE",
            CheckpointAction::Increase => "INCREASE",
        }
    }

    /// Everything except STAY goes to the broker
    pub fn requires_order(&self) -> bool {
        !matches!(self, CheckpointAction::Stay)
    }
}

impl fmt::Display for CheckpointAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEvent {
    pub account_id: AccountId,
    pub timestamp: DateTime<Utc>,
    pub action: CheckpointAction,
    pub prior_conviction: f64,
    pub new_conviction: f64,
    pub reasoning: String,
}
