use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{AgentId, AnonymizedPitch, Pitch, PitchLabel};
use crate::error::{CouncilError, Result};

/// Private label -> author mapping for one cycle.
///
/// Fields are private so the mapping cannot leak into a reviewer prompt by
/// accident; callers resolve one label at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMap {
    cycle_id: uuid::Uuid,
    entries: BTreeMap<PitchLabel, AgentId>,
}

impl LabelMap {
    pub fn cycle_id(&self) -> uuid::Uuid {
        self.cycle_id
    }

    pub fn resolve(&self, label: &PitchLabel) -> Option<&AgentId> {
        self.entries.get(label)
    }

    pub fn label_of(&self, model: &AgentId) -> Option<&PitchLabel> {
        self.entries
            .iter()
            .find(|(_, author)| *author == model)
            .map(|(label, _)| label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &PitchLabel> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hands out shuffled single-character labels
pub struct Anonymizer {
    alphabet: Vec<char>,
    rng: StdRng,
}

impl Anonymizer {
    pub fn new(alphabet: &str) -> Self {
        Self {
            alphabet: alphabet.chars().collect(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(alphabet: &str, seed: u64) -> Self {
        Self {
            alphabet: alphabet.chars().collect(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Strip authorship. Output order follows the shuffled labels, not roster order.
    pub fn anonymize(&mut self, pitches: &[Pitch]) -> Result<(Vec<AnonymizedPitch>, LabelMap)> {
        if pitches.len() > self.alphabet.len() {
            return Err(CouncilError::Validation(format!(
                "{} pitches but only {} labels",
                pitches.len(),
                self.alphabet.len()
            )));
        }

        let mut labels: Vec<char> = self.alphabet[..pitches.len()].to_vec();
        labels.shuffle(&mut self.rng);

        let cycle_id = pitches.first().map(|p| p.cycle_id).unwrap_or_default();
        let mut entries = BTreeMap::new();
        let mut anonymized: Vec<AnonymizedPitch> = pitches
            .iter()
            .zip(labels)
            .map(|(pitch, c)| {
                let label = PitchLabel::new(c.to_string());
                entries.insert(label.clone(), pitch.model_id.clone());
                AnonymizedPitch {
                    label,
                    content: pitch.content.clone(),
                }
            })
            .collect();
        anonymized.sort_by(|a, b| a.label.cmp(&b.label));

        Ok((anonymized, LabelMap { cycle_id, entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PitchContent, PitchOrigin};
    use uuid::Uuid;

    fn pitches(ids: &[&str]) -> Vec<Pitch> {
        let cycle = Uuid::new_v4();
        ids.iter()
            .map(|id| Pitch::new(cycle, AgentId::from(*id), PitchOrigin::FirstPass, PitchContent::flat()))
            .collect()
    }

    #[test]
    fn test_round_trip_recovers_identity() {
        let source = pitches(&["gpt", "claude", "gemini", "grok", "deepseek"]);
        let (anon, map) = Anonymizer::with_seed("ABCDEFGH", 7).anonymize(&source).unwrap();

        assert_eq!(anon.len(), 5);
        assert_eq!(map.len(), 5);
        for pitch in &anon {
            let author = map.resolve(&pitch.label).unwrap();
            let original = source.iter().find(|p| &p.model_id == author).unwrap();
            assert_eq!(
                serde_json::to_vec(&pitch.content).unwrap(),
                serde_json::to_vec(&original.content).unwrap()
            );
            assert_eq!(map.label_of(author), Some(&pitch.label));
        }
    }

    #[test]
    fn test_labels_unique_and_seeded() {
        let source = pitches(&["gpt", "claude", "gemini"]);
        let (a, map_a) = Anonymizer::with_seed("ABCDEFGH", 42).anonymize(&source).unwrap();
        let (_, map_b) = Anonymizer::with_seed("ABCDEFGH", 42).anonymize(&source).unwrap();
        assert_eq!(map_a, map_b);

        let mut labels: Vec<_> = a.iter().map(|p| p.label.as_str().to_string()).collect();
        labels.dedup();
        assert_eq!(labels, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_anonymized_json_has_no_identity() {
        let source = pitches(&["claude"]);
        let (anon, _) = Anonymizer::with_seed("AB", 1).anonymize(&source).unwrap();
        let json = serde_json::to_string(&anon).unwrap();
        assert!(!json.contains("claude"));
        assert!(!json.contains("model_id"));
    }

    #[test]
    fn test_too_few_labels() {
        let source = pitches(&["a", "b", "c"]);
        assert!(Anonymizer::with_seed("AB", 1).anonymize(&source).is_err());
    }
}
