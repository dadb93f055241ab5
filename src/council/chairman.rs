//! Chairman synthesis
//!
//! One sequential call picks the week's trade. Risk parameters always come
//! from the selected pitch. Any transport or schema failure falls back to a
//! deterministic rule: maximize `|conviction| * avg_peer_score`, then damp.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::prompts::chairman_system_prompt;
use crate::agent::protocol::parse_reply;
use crate::agent::{AgentProfile, ModelClient};
use crate::domain::{
    AgentId, CouncilDecision, Direction, Instrument, Pitch, PitchContent, MAX_CONVICTION,
    MIN_CONVICTION,
};
use crate::error::AgentError;

use super::review::{AttributedReview, ReviewRound};

pub const FALLBACK_MARKER: &str = "Fallback logic used";

#[derive(Debug, Clone, Deserialize)]
struct ChairmanReply {
    #[serde(default)]
    selected_model: Option<String>,
    instrument: String,
    direction: String,
    conviction: f64,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    dissent_summary: Vec<String>,
}

/// Why a chairman reply was refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChairmanError {
    #[error("chairman call failed: {0}")]
    Transport(AgentError),

    #[error("unparsable chairman reply: {0}")]
    Unparsable(String),

    #[error("selected model {0} has no pitch this cycle")]
    UnknownModel(String),

    #[error("{0}")]
    Mismatch(String),

    #[error("conviction {0} is invalid for the selection")]
    Conviction(f64),

    #[error("dissent summary does not address {0}")]
    MissingDissent(String),

    #[error("empty rationale")]
    EmptyRationale,
}

/// Fallback and neutral-score settings
#[derive(Debug, Clone, Copy)]
pub struct FallbackPolicy {
    pub damping: f64,
    pub neutral_peer_score: f64,
}

impl FallbackPolicy {
    fn peer_score(&self, model: &AgentId, round: Option<&ReviewRound>) -> f64 {
        round
            .and_then(|r| r.avg_score_for(model))
            .unwrap_or(self.neutral_peer_score)
    }
}

#[derive(Debug, Serialize)]
struct CandidateView<'a> {
    model_id: &'a AgentId,
    avg_peer_score: Option<f64>,
    pitch: &'a PitchContent,
}

pub struct ChairmanEngine {
    client: Arc<dyn ModelClient>,
    chairman: AgentProfile,
    timeout: std::time::Duration,
    policy: FallbackPolicy,
}

impl ChairmanEngine {
    pub fn new(
        client: Arc<dyn ModelClient>,
        chairman: AgentProfile,
        timeout: std::time::Duration,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            client,
            chairman,
            timeout,
            policy,
        }
    }

    /// Always returns a decision
    pub async fn decide(&self, cycle_id: Uuid, pitches: &[Pitch], round: Option<&ReviewRound>) -> CouncilDecision {
        if pitches.is_empty() {
            warn!(cycle_id = %cycle_id, "no pitches survived validation, council stays FLAT");
            return CouncilDecision::flat(
                cycle_id,
                "No valid pitches this cycle.".to_string(),
                vec![format!("{}: no pitches to select from", FALLBACK_MARKER)],
                true,
            );
        }

        match self.synthesize(cycle_id, pitches, round).await {
            Ok(decision) => {
                info!(
                    cycle_id = %cycle_id,
                    instrument = %decision.instrument,
                    direction = %decision.direction,
                    conviction = decision.conviction,
                    "chairman decision accepted"
                );
                decision
            }
            Err(e) => {
                warn!(cycle_id = %cycle_id, error = %e, "chairman failed, using fallback selection");
                fallback_decision(cycle_id, pitches, round, self.policy, &e.to_string())
            }
        }
    }

    async fn synthesize(
        &self,
        cycle_id: Uuid,
        pitches: &[Pitch],
        round: Option<&ReviewRound>,
    ) -> Result<CouncilDecision, ChairmanError> {
        let started = Instant::now();
        let prompt = self.user_prompt(pitches, round);
        let query = self.chairman.query(chairman_system_prompt(), prompt, self.timeout);

        let reply = match tokio::time::timeout(self.timeout, self.client.query(&query)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(ChairmanError::Transport(e)),
            Err(_) => {
                return Err(ChairmanError::Transport(AgentError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }))
            }
        };

        let parsed: ChairmanReply = parse_reply(&reply).map_err(|e| ChairmanError::Unparsable(e.0))?;
        validate_reply(cycle_id, parsed, pitches, round)
    }

    fn user_prompt(&self, pitches: &[Pitch], round: Option<&ReviewRound>) -> String {
        let candidates: Vec<CandidateView> = pitches
            .iter()
            .map(|p| CandidateView {
                model_id: &p.model_id,
                avg_peer_score: round.and_then(|r| r.avg_score_for(&p.model_id)),
                pitch: &p.content,
            })
            .collect();
        let reviews: Vec<AttributedReview> = round.map(|r| r.attributed()).unwrap_or_default();

        format!(
            "Pitches:\n{}\n\nPeer reviews:\n{}",
            serde_json::to_string_pretty(&candidates).unwrap_or_default(),
            serde_json::to_string_pretty(&reviews).unwrap_or_default()
        )
    }
}

fn validate_reply(
    cycle_id: Uuid,
    reply: ChairmanReply,
    pitches: &[Pitch],
    round: Option<&ReviewRound>,
) -> Result<CouncilDecision, ChairmanError> {
    if reply.rationale.trim().is_empty() {
        return Err(ChairmanError::EmptyRationale);
    }

    let instrument = Instrument::from_str(&reply.instrument).map_err(ChairmanError::Mismatch)?;
    let direction = Direction::from_str(&reply.direction).map_err(ChairmanError::Mismatch)?;
    let selected_id = reply
        .selected_model
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"));

    let selected = match selected_id {
        Some(id) => Some(
            pitches
                .iter()
                .find(|p| p.model_id.as_str().eq_ignore_ascii_case(id))
                .ok_or_else(|| ChairmanError::UnknownModel(id.to_string()))?,
        ),
        None => None,
    };

    let goes_flat = selected.map_or(true, |p| p.content.is_flat());
    let dissent_targets: Vec<&Pitch> = pitches
        .iter()
        .filter(|p| selected.map_or(true, |s| s.model_id != p.model_id))
        .collect();
    for pitch in &dissent_targets {
        let name = pitch.model_id.as_str().to_ascii_lowercase();
        if !reply
            .dissent_summary
            .iter()
            .any(|line| line.to_ascii_lowercase().contains(&name))
        {
            return Err(ChairmanError::MissingDissent(pitch.model_id.to_string()));
        }
    }

    if goes_flat {
        if !instrument.is_flat() || direction != Direction::Flat {
            return Err(ChairmanError::Mismatch(format!(
                "FLAT selection but reply names {} {}",
                direction, instrument
            )));
        }
        if reply.conviction != 0.0 {
            return Err(ChairmanError::Conviction(reply.conviction));
        }
        let mut decision = CouncilDecision::flat(cycle_id, reply.rationale, reply.dissent_summary, false);
        if let Some(pitch) = selected {
            decision.selected_model = Some(pitch.model_id.clone());
        }
        return Ok(decision);
    }

    let Some(pitch) = selected else {
        return Err(ChairmanError::Mismatch("no pitch selected".into()));
    };
    let content = &pitch.content;
    if instrument != content.instrument || direction != content.direction {
        return Err(ChairmanError::Mismatch(format!(
            "reply names {} {} but {} pitched {} {}",
            direction, instrument, pitch.model_id, content.direction, content.instrument
        )));
    }
    if !direction.agrees_with(reply.conviction)
        || !(MIN_CONVICTION..=MAX_CONVICTION).contains(&reply.conviction)
        || reply.conviction.abs() > content.conviction.abs()
    {
        return Err(ChairmanError::Conviction(reply.conviction));
    }

    let avg = round.and_then(|r| r.avg_score_for(&pitch.model_id));
    Ok(CouncilDecision::from_pitch(
        pitch,
        reply.conviction,
        reply.rationale,
        reply.dissent_summary,
        avg,
        false,
    ))
}

/// Deterministic selection used when the chairman cannot be trusted.
///
/// Pitches are scanned in the order given; on a tie the earlier pitch wins.
pub fn fallback_decision(
    cycle_id: Uuid,
    pitches: &[Pitch],
    round: Option<&ReviewRound>,
    policy: FallbackPolicy,
    reason: &str,
) -> CouncilDecision {
    let scored: Vec<(&Pitch, f64, f64)> = pitches
        .iter()
        .map(|p| {
            let peer = policy.peer_score(&p.model_id, round);
            (p, peer, p.content.conviction.abs() * peer)
        })
        .collect();

    let mut best: Option<&(&Pitch, f64, f64)> = None;
    for candidate in &scored {
        if best.map_or(true, |b| candidate.2 > b.2) {
            best = Some(candidate);
        }
    }

    let Some(&(selected, peer, score)) = best else {
        return CouncilDecision::flat(
            cycle_id,
            "No valid pitches this cycle.".to_string(),
            vec![format!("{}: no pitches to select from", FALLBACK_MARKER)],
            true,
        );
    };

    let mut dissent = vec![format!("{} ({})", FALLBACK_MARKER, reason)];
    dissent.extend(
        scored
            .iter()
            .filter(|(p, _, _)| p.model_id != selected.model_id)
            .map(|(p, _, s)| {
                format!(
                    "{}: fallback score {:.3} below selected {:.3}",
                    p.model_id, s, score
                )
            }),
    );

    let rationale = format!(
        "Fallback selection of {}: |conviction| {:.2} x peer score {:.2} = {:.3}, conviction damped by {}",
        selected.model_id,
        selected.content.conviction.abs(),
        peer,
        score,
        policy.damping
    );

    if selected.content.is_flat() {
        let mut decision = CouncilDecision::flat(cycle_id, rationale, dissent, true);
        decision.selected_model = Some(selected.model_id.clone());
        return decision;
    }

    CouncilDecision::from_pitch(
        selected,
        selected.content.conviction * policy.damping,
        rationale,
        dissent,
        Some(peer),
        true,
    )
}
