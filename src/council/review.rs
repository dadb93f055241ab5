//! Anonymized peer review
//!
//! Reviewers only ever see `AnonymizedPitch` values. The label map stays with
//! the engine and is used to filter out a reviewer's own pitch and, later, to
//! attribute reviews for the chairman.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::prompts::review_system_prompt;
use crate::agent::protocol::parse_reply;
use crate::agent::{AgentProfile, AgentRoster, ModelClient};
use crate::domain::{AgentId, AnonymizedPitch, PeerReview, PitchLabel, RubricScores};
use crate::error::AgentError;

use super::anonymize::LabelMap;

/// Output of one review step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRound {
    pub anonymized: Vec<AnonymizedPitch>,
    pub reviews: Vec<PeerReview>,
    pub label_map: LabelMap,
}

/// A review joined back to the pitch's author
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributedReview {
    pub pitch_model: AgentId,
    pub review: PeerReview,
}

impl ReviewRound {
    /// De-anonymized view, for the chairman only
    pub fn attributed(&self) -> Vec<AttributedReview> {
        self.reviews
            .iter()
            .filter_map(|review| {
                self.label_map
                    .resolve(&review.pitch_label)
                    .map(|model| AttributedReview {
                        pitch_model: model.clone(),
                        review: review.clone(),
                    })
            })
            .collect()
    }

    /// Mean review average received by `model`'s pitch
    pub fn avg_score_for(&self, model: &AgentId) -> Option<f64> {
        let label = self.label_map.label_of(model)?;
        let scores: Vec<f64> = self
            .reviews
            .iter()
            .filter(|r| &r.pitch_label == label)
            .map(|r| r.average)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReviewReply {
    reviews: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    pitch_label: String,
    scores: RubricScores,
    #[serde(default)]
    counter_argument: String,
    #[serde(default)]
    flip_condition: String,
    #[serde(default)]
    fix_suggestion: String,
}

/// Accepts "A", "Pitch A" or "pitch a"
fn normalize_label(raw: &str) -> PitchLabel {
    let trimmed = raw.trim();
    let bare = trimmed
        .get(..6)
        .filter(|p| p.eq_ignore_ascii_case("pitch "))
        .map(|_| &trimmed[6..])
        .unwrap_or(trimmed);
    PitchLabel::new(bare.trim().to_ascii_uppercase())
}

pub struct ReviewEngine {
    client: Arc<dyn ModelClient>,
    roster: AgentRoster,
}

impl ReviewEngine {
    pub fn new(client: Arc<dyn ModelClient>, roster: AgentRoster) -> Self {
        Self { client, roster }
    }

    /// Collect reviews from every agent concurrently.
    ///
    /// Never fails: reviewers that time out or reply with garbage simply
    /// contribute nothing, and the result may be empty.
    pub async fn collect(&self, anonymized: &[AnonymizedPitch], label_map: &LabelMap) -> Vec<PeerReview> {
        if anonymized.is_empty() {
            return Vec::new();
        }

        let tasks = self.roster.agents.iter().filter_map(|reviewer| {
            let own = label_map.label_of(&reviewer.id);
            let visible: Vec<&AnonymizedPitch> = anonymized
                .iter()
                .filter(|p| Some(&p.label) != own)
                .collect();
            if visible.is_empty() {
                return None;
            }
            Some(self.review_one(reviewer, visible))
        });

        let reviews: Vec<PeerReview> = join_all(tasks).await.into_iter().flatten().collect();

        info!(
            pitches = anonymized.len(),
            reviews = reviews.len(),
            "peer review collected"
        );
        reviews
    }

    async fn review_one(&self, reviewer: &AgentProfile, visible: Vec<&AnonymizedPitch>) -> Vec<PeerReview> {
        let started = Instant::now();
        let payload = match serde_json::to_string_pretty(&visible) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(reviewer = %reviewer.id, error = %e, "could not render pitches for review");
                return Vec::new();
            }
        };
        let user_prompt = format!(
            "Review each of these pitches. Use the pitch_label exactly as given.\n\n{}",
            payload
        );
        let query = reviewer.query(review_system_prompt(), user_prompt, self.roster.review_timeout);

        let reply = match tokio::time::timeout(self.roster.review_timeout, self.client.query(&query)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(reviewer = %reviewer.id, error = %e, "reviewer skipped");
                return Vec::new();
            }
            Err(_) => {
                let e = AgentError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                warn!(reviewer = %reviewer.id, error = %e, "reviewer skipped");
                return Vec::new();
            }
        };

        let parsed: ReviewReply = match parse_reply(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(reviewer = %reviewer.id, error = %e, "unparsable review reply, reviewer skipped");
                return Vec::new();
            }
        };

        let mut reviews: Vec<PeerReview> = Vec::with_capacity(visible.len());
        for item in parsed.reviews {
            let raw: RawReview = match serde_json::from_value(item) {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(reviewer = %reviewer.id, error = %e, "dropping malformed review item");
                    continue;
                }
            };
            let label = normalize_label(&raw.pitch_label);
            if !visible.iter().any(|p| p.label == label) {
                debug!(reviewer = %reviewer.id, label = %label, "dropping review of unknown or own pitch");
                continue;
            }
            if reviews.iter().any(|r| r.pitch_label == label) {
                continue;
            }
            match PeerReview::new(
                label,
                reviewer.id.clone(),
                raw.scores,
                raw.counter_argument,
                raw.flip_condition,
                raw.fix_suggestion,
            ) {
                Ok(review) => reviews.push(review),
                Err(e) => debug!(reviewer = %reviewer.id, error = %e, "dropping out-of-range review"),
            }
        }

        debug!(
            reviewer = %reviewer.id,
            reviews = reviews.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reviewer finished"
        );
        reviews
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentQuery;
    use crate::council::Anonymizer;
    use crate::domain::Pitch;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    const AGENTS: [&str; 5] = ["gpt", "claude", "gemini", "grok", "deepseek"];

    /// Canned review replies per reviewer; a reviewer without one is offline
    #[derive(Default)]
    struct ReviewerClient {
        replies: HashMap<String, String>,
        slow: Option<String>,
        prompts: Mutex<HashMap<String, String>>,
    }

    impl ReviewerClient {
        fn reply(mut self, agent: &str, text: String) -> Self {
            self.replies.insert(agent.to_string(), text);
            self
        }
    }

    #[async_trait]
    impl ModelClient for ReviewerClient {
        async fn query(&self, query: &AgentQuery) -> Result<String, AgentError> {
            let agent = query.agent_id.to_string();
            self.prompts
                .lock()
                .unwrap()
                .insert(agent.clone(), query.user_prompt.clone());
            if self.slow.as_deref() == Some(agent.as_str()) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.replies
                .get(&agent)
                .cloned()
                .ok_or_else(|| AgentError::Transport("offline".into()))
        }
    }

    fn review_items(labels: &[&str], score: u8) -> Vec<Value> {
        labels
            .iter()
            .map(|label| {
                json!({
                    "pitch_label": label,
                    "scores": {
                        "thesis_clarity": score,
                        "evidence_quality": score,
                        "catalyst_timing": score,
                        "risk_definition": score,
                        "invalidation_clarity": score,
                        "sizing_discipline": score,
                        "macro_coherence": score
                    },
                    "counter_argument": "Growth could roll over",
                    "flip_condition": "A hawkish surprise",
                    "fix_suggestion": "Name the catalyst date"
                })
            })
            .collect()
    }

    /// Scores every label, own included, then repeats each one with a different score
    fn greedy_reply() -> String {
        let labels = ["A", "B", "C", "D", "E"];
        let mut items = review_items(&labels, 7);
        items.extend(review_items(&labels, 2));
        json!({ "reviews": items }).to_string()
    }

    fn setup() -> (Vec<AnonymizedPitch>, LabelMap, AgentRoster) {
        let cycle = Uuid::new_v4();
        let pitches: Vec<Pitch> = AGENTS
            .iter()
            .map(|id| Pitch::compliance_fallback(cycle, AgentId::from(*id)))
            .collect();
        let (anonymized, label_map) = Anonymizer::with_seed("ABCDEFGH", 7).anonymize(&pitches).unwrap();
        let mut roster = AgentRoster::from_config(&crate::config::tests::sample());
        roster.review_timeout = Duration::from_millis(50);
        (anonymized, label_map, roster)
    }

    #[tokio::test]
    async fn test_reviewers_never_see_or_score_their_own_pitch() {
        let (anonymized, label_map, roster) = setup();
        let client = AGENTS
            .iter()
            .fold(ReviewerClient::default(), |c, id| c.reply(id, greedy_reply()));
        let client = Arc::new(client);
        let engine = ReviewEngine::new(client.clone(), roster);

        let reviews = engine.collect(&anonymized, &label_map).await;

        // Own label and duplicates dropped: four reviews per reviewer
        assert_eq!(reviews.len(), AGENTS.len() * (AGENTS.len() - 1));
        for review in &reviews {
            assert_ne!(label_map.resolve(&review.pitch_label), Some(&review.reviewer_model));
            // First review of a label wins
            assert_eq!(review.average, 7.0);
        }
        for pitch in &anonymized {
            let received = reviews.iter().filter(|r| r.pitch_label == pitch.label).count();
            assert_eq!(received, AGENTS.len() - 1, "{} under-reviewed", pitch.label);
        }

        let prompts = client.prompts.lock().unwrap();
        for id in AGENTS {
            let own = label_map.label_of(&AgentId::from(id)).unwrap();
            let prompt = &prompts[id];
            assert!(!prompt.contains(&format!("\"label\": \"{}\"", own.as_str())));
            assert_eq!(prompt.matches("\"label\"").count(), AGENTS.len() - 1);
        }
    }

    #[tokio::test]
    async fn test_out_of_range_and_unknown_labels_are_dropped() {
        let (anonymized, label_map, roster) = setup();
        let mut bad_items = review_items(&["A", "B", "C", "D", "E"], 11);
        bad_items.extend(review_items(&["Z", "Pitch Q"], 5));
        let client = AGENTS
            .iter()
            .fold(ReviewerClient::default(), |c, id| c.reply(id, greedy_reply()))
            .reply("gpt", json!({ "reviews": bad_items }).to_string());
        let engine = ReviewEngine::new(Arc::new(client), roster);

        let reviews = engine.collect(&anonymized, &label_map).await;

        assert!(reviews.iter().all(|r| r.reviewer_model != AgentId::from("gpt")));
        assert_eq!(reviews.len(), (AGENTS.len() - 1) * (AGENTS.len() - 1));
        // gpt's pitch is still reviewed by everyone else
        let gpt_label = label_map.label_of(&AgentId::from("gpt")).unwrap();
        assert_eq!(
            reviews.iter().filter(|r| &r.pitch_label == gpt_label).count(),
            AGENTS.len() - 1
        );
    }

    #[tokio::test]
    async fn test_failed_and_slow_reviewers_leave_an_empty_round() {
        let (anonymized, label_map, roster) = setup();
        let client = ReviewerClient {
            slow: Some("gpt".to_string()),
            ..ReviewerClient::default()
        }
        .reply("gpt", greedy_reply());
        let engine = ReviewEngine::new(Arc::new(client), roster);

        let reviews = engine.collect(&anonymized, &label_map).await;
        assert!(reviews.is_empty());
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("A"), PitchLabel::new("A"));
        assert_eq!(normalize_label(" Pitch b "), PitchLabel::new("B"));
        assert_eq!(normalize_label("pitch C"), PitchLabel::new("C"));
    }
}
