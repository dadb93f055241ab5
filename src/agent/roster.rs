use std::time::Duration;

use crate::config::{AgentConfig, AppConfig};
use crate::domain::AgentId;

use super::client::AgentQuery;

/// One configured model agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub id: AgentId,
    pub model: String,
    pub temperature: f32,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            id: AgentId::new(id),
            model: model.into(),
            temperature,
        }
    }

    /// Build a query addressed to this agent
    pub fn query(&self, system_prompt: String, user_prompt: String, timeout: Duration) -> AgentQuery {
        AgentQuery {
            agent_id: self.id.clone(),
            model: self.model.clone(),
            system_prompt,
            user_prompt,
            temperature: self.temperature,
            timeout,
        }
    }
}

impl From<&AgentConfig> for AgentProfile {
    fn from(config: &AgentConfig) -> Self {
        Self::new(config.id.clone(), config.model.clone(), config.temperature)
    }
}

/// Pitch writers (in roster order), the chairman, and per-step timeouts
#[derive(Debug, Clone)]
pub struct AgentRoster {
    pub agents: Vec<AgentProfile>,
    pub chairman: AgentProfile,
    pub pitch_timeout: Duration,
    pub review_timeout: Duration,
    pub chairman_timeout: Duration,
}

impl AgentRoster {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            agents: config.agents.iter().map(AgentProfile::from).collect(),
            chairman: AgentProfile::from(&config.chairman),
            pitch_timeout: Duration::from_secs(config.llm.pitch_timeout_secs),
            review_timeout: Duration::from_secs(config.llm.review_timeout_secs),
            chairman_timeout: Duration::from_secs(config.llm.chairman_timeout_secs),
        }
    }

    pub fn get(&self, id: &AgentId) -> Option<&AgentProfile> {
        self.agents.iter().find(|a| &a.id == id)
    }

    /// Position in roster order, used to break ties deterministically
    pub fn position(&self, id: &AgentId) -> Option<usize> {
        self.agents.iter().position(|a| &a.id == id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
