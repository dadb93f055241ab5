use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AgentId, PitchContent};

/// Cycle-scoped anonymous handle for a pitch ("A", "B", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PitchLabel(String);

impl PitchLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PitchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pitch {}", self.0)
    }
}

/// A pitch with its author stripped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizedPitch {
    pub label: PitchLabel,
    pub content: PitchContent,
}

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

/// Seven-dimension review rubric, each scored 1-10
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricScores {
    pub thesis_clarity: u8,
    pub evidence_quality: u8,
    pub catalyst_timing: u8,
    pub risk_definition: u8,
    pub invalidation_clarity: u8,
    pub sizing_discipline: u8,
    pub macro_coherence: u8,
}

impl RubricScores {
    pub const DIMENSIONS: [&'static str; 7] = [
        "thesis_clarity",
        "evidence_quality",
        "catalyst_timing",
        "risk_definition",
        "invalidation_clarity",
        "sizing_discipline",
        "macro_coherence",
    ];

    pub fn as_array(&self) -> [u8; 7] {
        [
            self.thesis_clarity,
            self.evidence_quality,
            self.catalyst_timing,
            self.risk_definition,
            self.invalidation_clarity,
            self.sizing_discipline,
            self.macro_coherence,
        ]
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, score) in Self::DIMENSIONS.iter().zip(self.as_array()) {
            if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
                return Err(format!(
                    "{} score {} outside [{}, {}]",
                    name, score, MIN_SCORE, MAX_SCORE
                ));
            }
        }
        Ok(())
    }

    /// Arithmetic mean of the seven scores
    pub fn average(&self) -> f64 {
        let sum: u32 = self.as_array().iter().map(|s| u32::from(*s)).sum();
        f64::from(sum) / 7.0
    }
}

/// One reviewer's evaluation of one anonymized pitch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerReview {
    pub pitch_label: PitchLabel,
    pub reviewer_model: AgentId,
    pub scores: RubricScores,
    pub average: f64,
    pub counter_argument: String,
    pub flip_condition: String,
    pub fix_suggestion: String,
}

impl PeerReview {
    /// Build a review; fails when any score is out of range
    pub fn new(
        pitch_label: PitchLabel,
        reviewer_model: AgentId,
        scores: RubricScores,
        counter_argument: String,
        flip_condition: String,
        fix_suggestion: String,
    ) -> Result<Self, String> {
        scores.validate()?;
        Ok(Self {
            pitch_label,
            reviewer_model,
            average: scores.average(),
            scores,
            counter_argument,
            flip_condition,
            fix_suggestion,
        })
    }
}
