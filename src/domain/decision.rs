use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AgentId, Direction, EntryPolicy, ExitPolicy, Instrument, Pitch, RiskProfile};

/// The single trade the council commits to for the week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilDecision {
    pub cycle_id: Uuid,
    pub instrument: Instrument,
    pub direction: Direction,
    pub conviction: f64,
    pub rationale: String,
    /// Why each non-selected candidate was passed over
    pub dissent_summary: Vec<String>,
    pub risk_profile: Option<RiskProfile>,
    pub entry_policy: EntryPolicy,
    pub exit_policy: Option<ExitPolicy>,
    pub selected_model: Option<AgentId>,
    pub avg_peer_score: Option<f64>,
    pub used_fallback: bool,
    pub decided_at: DateTime<Utc>,
}

impl CouncilDecision {
    /// Adopt `pitch` with risk parameters copied verbatim
    pub fn from_pitch(
        pitch: &Pitch,
        conviction: f64,
        rationale: String,
        dissent_summary: Vec<String>,
        avg_peer_score: Option<f64>,
        used_fallback: bool,
    ) -> Self {
        let content = &pitch.content;
        Self {
            cycle_id: pitch.cycle_id,
            instrument: content.instrument,
            direction: content.direction,
            conviction,
            rationale,
            dissent_summary,
            risk_profile: content.risk_profile,
            entry_policy: content.entry_policy.clone(),
            exit_policy: content.exit_policy.clone(),
            selected_model: Some(pitch.model_id.clone()),
            avg_peer_score,
            used_fallback,
            decided_at: Utc::now(),
        }
    }

    /// No trade this week
    pub fn flat(cycle_id: Uuid, rationale: String, dissent_summary: Vec<String>, used_fallback: bool) -> Self {
        Self {
            cycle_id,
            instrument: Instrument::Flat,
            direction: Direction::Flat,
            conviction: 0.0,
            rationale,
            dissent_summary,
            risk_profile: None,
            entry_policy: EntryPolicy::none(),
            exit_policy: None,
            selected_model: None,
            avg_peer_score: None,
            used_fallback,
            decided_at: Utc::now(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.direction == Direction::Flat
    }
}
