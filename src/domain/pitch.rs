use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AgentId, Direction, Instrument, MacroCategory, RiskProfile};

/// How the pitch should be entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryMode {
    /// Market on open
    #[serde(rename = "MOO")]
    MarketOnOpen,
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "NONE")]
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPolicy {
    pub mode: EntryMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
}

impl EntryPolicy {
    pub fn none() -> Self {
        Self {
            mode: EntryMode::None,
            limit_price: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitPolicy {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// Close after this many trading days regardless of P&L
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stop_days: Option<u32>,
}

impl ExitPolicy {
    pub fn canonical(profile: RiskProfile) -> Self {
        let (stop_loss_pct, take_profit_pct) = profile.canonical_pair();
        Self {
            stop_loss_pct,
            take_profit_pct,
            time_stop_days: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThesisBullet {
    pub category: MacroCategory,
    pub text: String,
}

impl std::fmt::Display for ThesisBullet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.text)
    }
}

/// Everything in a pitch except who wrote it.
///
/// Peer review sees exactly this struct, so it must never carry identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchContent {
    pub instrument: Instrument,
    pub direction: Direction,
    pub conviction: f64,
    pub risk_profile: Option<RiskProfile>,
    pub thesis_bullets: Vec<ThesisBullet>,
    pub entry_policy: EntryPolicy,
    pub exit_policy: Option<ExitPolicy>,
}

impl PitchContent {
    /// The canonical no-trade pitch
    pub fn flat() -> Self {
        Self {
            instrument: Instrument::Flat,
            direction: Direction::Flat,
            conviction: 0.0,
            risk_profile: None,
            thesis_bullets: Vec::new(),
            entry_policy: EntryPolicy::none(),
            exit_policy: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.direction == Direction::Flat
    }
}

/// How a pitch came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchOrigin {
    /// Passed validation on the first attempt
    FirstPass,
    /// Passed after the corrective retry
    Corrected,
    /// Synthesized FLAT after the corrective retry also failed
    ComplianceFallback,
}

/// One agent's weekly trade recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    pub cycle_id: Uuid,
    pub model_id: AgentId,
    pub origin: PitchOrigin,
    pub content: PitchContent,
    pub created_at: DateTime<Utc>,
}

impl Pitch {
    pub fn new(cycle_id: Uuid, model_id: AgentId, origin: PitchOrigin, content: PitchContent) -> Self {
        Self {
            cycle_id,
            model_id,
            origin,
            content,
            created_at: Utc::now(),
        }
    }

    /// Deterministic FLAT replacement for a pitch that failed compliance twice
    pub fn compliance_fallback(cycle_id: Uuid, model_id: AgentId) -> Self {
        Self::new(
            cycle_id,
            model_id,
            PitchOrigin::ComplianceFallback,
            PitchContent::flat(),
        )
    }

    pub fn summary(&self) -> String {
        let c = &self.content;
        match c.risk_profile {
            Some(profile) => format!(
                "{} {} {} conv={:+.2} risk={}",
                self.model_id, c.direction, c.instrument, c.conviction, profile
            ),
            None => format!("{} {} conv={:+.2}", self.model_id, c.direction, c.conviction),
        }
    }
}
