//! Pitch generation
//!
//! Every agent runs the same bounded state machine:
//!
//! ```text
//! Attempt1 ── pass ──────────────────────────────> Accepted
//!    │ ── invalid / transport / timeout ─────────> Dropped
//!    └─ compliance ─> Corrective ── pass ────────> Corrected
//!                            └─ fail ────────────> FlatFallback (no further calls)
//! ```

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::prompts::pitch_system_prompt;
use crate::agent::{AgentProfile, AgentRoster, ModelClient};
use crate::config::MAX_CORRECTIVE_RETRIES;
use crate::domain::{AgentId, Pitch, PitchContent, PitchOrigin};
use crate::error::{AgentError, CouncilError, Result};
use crate::market::{MarketSnapshot, ResearchPacket};

use super::validation::{validate_reply, PitchViolation};

/// Shared inputs for one round of pitch generation
#[derive(Debug, Clone, Copy)]
pub struct PitchRequest<'a> {
    pub cycle_id: Uuid,
    pub research: &'a ResearchPacket,
    pub snapshot: Option<&'a MarketSnapshot>,
}

impl PitchRequest<'_> {
    fn user_prompt(&self) -> String {
        let market = self
            .snapshot
            .map(|s| format!("Market snapshot as of {}:\n{}", s.as_of, s.describe()))
            .unwrap_or_else(|| "No market snapshot this week.".to_string());
        format!(
            "Research packet ({}):\n{}\n\n{}\n\nPitch one trade for the coming week.",
            self.research.as_of, self.research.body, market
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PitchOutcome {
    Accepted(Pitch),
    Corrected(Pitch),
    FlatFallback(Pitch),
    Dropped(PitchViolation),
}

impl PitchOutcome {
    pub fn pitch(&self) -> Option<&Pitch> {
        match self {
            PitchOutcome::Accepted(p) | PitchOutcome::Corrected(p) | PitchOutcome::FlatFallback(p) => Some(p),
            PitchOutcome::Dropped(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PitchOutcome::Accepted(_) => "accepted",
            PitchOutcome::Corrected(_) => "corrected",
            PitchOutcome::FlatFallback(_) => "flat_fallback",
            PitchOutcome::Dropped(_) => "dropped",
        }
    }
}

/// What happened to one agent's pitch
#[derive(Debug, Clone, PartialEq)]
pub struct PitchReport {
    pub model_id: AgentId,
    pub outcome: PitchOutcome,
    /// Agent calls made, first attempt included
    pub attempts: u8,
    /// Every violation seen, in order
    pub violations: Vec<PitchViolation>,
    pub elapsed_ms: u64,
}

/// Summary row for logs and persistence
#[derive(Debug, Clone, Serialize)]
pub struct PitchReportSummary {
    pub model_id: AgentId,
    pub outcome: &'static str,
    pub attempts: u8,
    pub violations: Vec<String>,
}

impl From<&PitchReport> for PitchReportSummary {
    fn from(report: &PitchReport) -> Self {
        Self {
            model_id: report.model_id.clone(),
            outcome: report.outcome.label(),
            attempts: report.attempts,
            violations: report.violations.iter().map(|v| v.to_string()).collect(),
        }
    }
}

pub struct PitchEngine {
    client: Arc<dyn ModelClient>,
    roster: AgentRoster,
    corrective_retries: u8,
}

impl PitchEngine {
    pub fn new(client: Arc<dyn ModelClient>, roster: AgentRoster, corrective_retries: u8) -> Self {
        Self {
            client,
            roster,
            corrective_retries: corrective_retries.min(MAX_CORRECTIVE_RETRIES),
        }
    }

    /// Run every agent concurrently; one report per agent, in roster order
    pub async fn generate_all(&self, request: PitchRequest<'_>) -> Vec<PitchReport> {
        let tasks = self.roster.agents.iter().map(|agent| self.run_agent(agent, request));
        let reports = join_all(tasks).await;

        let accepted = reports.iter().filter(|r| r.outcome.pitch().is_some()).count();
        info!(
            cycle_id = %request.cycle_id,
            agents = reports.len(),
            accepted,
            "pitch generation finished"
        );
        reports
    }

    /// Regenerate a single agent's pitch through the same state machine
    pub async fn generate_one(&self, agent_id: &AgentId, request: PitchRequest<'_>) -> Result<PitchReport> {
        let agent = self
            .roster
            .get(agent_id)
            .ok_or_else(|| CouncilError::NotFound(format!("agent {}", agent_id)))?;
        Ok(self.run_agent(agent, request).await)
    }

    async fn run_agent(&self, agent: &AgentProfile, request: PitchRequest<'_>) -> PitchReport {
        let started = Instant::now();
        let user_prompt = request.user_prompt();
        let mut violations = Vec::new();
        let mut attempts = 0u8;

        attempts += 1;
        let first = self.attempt(agent, user_prompt.clone()).await;
        let outcome = match first {
            Ok(content) => PitchOutcome::Accepted(Pitch::new(
                request.cycle_id,
                agent.id.clone(),
                PitchOrigin::FirstPass,
                content,
            )),
            Err((violation, _)) if !violation.is_compliance() => {
                warn!(agent = %agent.id, violation = %violation, "pitch dropped");
                violations.push(violation.clone());
                PitchOutcome::Dropped(violation)
            }
            Err((violation, reply)) => {
                violations.push(violation.clone());
                let mut last = (violation, reply);
                let mut corrected = None;

                for _ in 0..self.corrective_retries {
                    warn!(agent = %agent.id, violation = %last.0, "compliance violation, sending corrective retry");
                    attempts += 1;
                    let prompt = corrective_prompt(&user_prompt, &last.1, &last.0);
                    match self.attempt(agent, prompt).await {
                        Ok(content) => {
                            corrected = Some(content);
                            break;
                        }
                        Err((violation, reply)) => {
                            violations.push(violation.clone());
                            let retryable = violation.is_compliance();
                            last = (violation, reply);
                            if !retryable {
                                break;
                            }
                        }
                    }
                }

                match corrected {
                    Some(content) => PitchOutcome::Corrected(Pitch::new(
                        request.cycle_id,
                        agent.id.clone(),
                        PitchOrigin::Corrected,
                        content,
                    )),
                    None => {
                        warn!(agent = %agent.id, "corrective retry failed, substituting FLAT");
                        PitchOutcome::FlatFallback(Pitch::compliance_fallback(request.cycle_id, agent.id.clone()))
                    }
                }
            }
        };

        let report = PitchReport {
            model_id: agent.id.clone(),
            outcome,
            attempts,
            violations,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            agent = %report.model_id,
            outcome = report.outcome.label(),
            attempts = report.attempts,
            elapsed_ms = report.elapsed_ms,
            "pitch resolved"
        );
        report
    }

    /// One agent call plus validation. On failure, returns the reply text (if any)
    /// so a corrective prompt can quote it back.
    async fn attempt(
        &self,
        agent: &AgentProfile,
        user_prompt: String,
    ) -> std::result::Result<PitchContent, (PitchViolation, String)> {
        let started = Instant::now();
        let timeout = self.roster.pitch_timeout;
        let query = agent.query(pitch_system_prompt(), user_prompt, timeout);

        let reply = match tokio::time::timeout(timeout, self.client.query(&query)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err((PitchViolation::Transport(e), String::new())),
            Err(_) => {
                return Err((
                    PitchViolation::Transport(AgentError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }),
                    String::new(),
                ))
            }
        };

        validate_reply(&reply).map_err(|violation| (violation, reply))
    }
}

fn corrective_prompt(original: &str, previous_reply: &str, violation: &PitchViolation) -> String {
    format!(
        "{original}\n\nYour previous reply was rejected: {violation}.\n\
         Previous reply:\n{previous_reply}\n\n\
         Rewrite the pitch so it satisfies every rule. Quote a risk profile's stop and take \
         exactly as listed and use no technical-indicator vocabulary anywhere. \
         Reply with the JSON object only."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always answers with indicator vocabulary, so every attempt is a compliance failure
    struct StubbornClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for StubbornClient {
        async fn query(&self, _query: &crate::agent::AgentQuery) -> std::result::Result<String, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({
                "instrument": "SPY",
                "direction": "LONG",
                "conviction": 1.0,
                "thesis_bullets": ["GROWTH: RSI keeps rising"],
                "risk_profile": "BASE",
                "entry_policy": {"mode": "MOO"},
                "exit_policy": {"stop_loss_pct": 0.015, "take_profit_pct": 0.025}
            })
            .to_string())
        }
    }

    #[tokio::test]
    async fn test_agent_called_at_most_twice_whatever_the_retry_setting() {
        let client = Arc::new(StubbornClient {
            calls: AtomicUsize::new(0),
        });
        let roster = AgentRoster::from_config(&crate::config::tests::sample());
        let engine = PitchEngine::new(client.clone(), roster, 10);

        let research = ResearchPacket {
            as_of: chrono::Utc::now(),
            body: "quiet week".to_string(),
        };
        let request = PitchRequest {
            cycle_id: Uuid::new_v4(),
            research: &research,
            snapshot: None,
        };
        let report = engine.generate_one(&AgentId::from("gpt"), request).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.attempts, 2);
        assert!(matches!(report.outcome, PitchOutcome::FlatFallback(_)));
    }

    #[test]
    fn test_corrective_prompt_quotes_violation() {
        let violation = PitchViolation::BannedTerm {
            term: "RSI".into(),
            path: "$.thesis_bullets[0]".into(),
        };
        let prompt = corrective_prompt("base prompt", "{\"x\":1}", &violation);
        assert!(prompt.starts_with("base prompt"));
        assert!(prompt.contains("banned term 'RSI'"));
        assert!(prompt.contains("{\"x\":1}"));
    }

    #[test]
    fn test_outcome_pitch_access() {
        let flat = Pitch::compliance_fallback(Uuid::new_v4(), AgentId::from("gpt"));
        assert!(PitchOutcome::FlatFallback(flat).pitch().is_some());
        assert!(PitchOutcome::Dropped(PitchViolation::Unparsable("x".into()))
            .pitch()
            .is_none());
    }
}
