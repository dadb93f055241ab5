//! Model agent transport
//!
//! Every agent (pitch writers, reviewers, chairman) is reached through the
//! `ModelClient` trait. The HTTP implementation speaks the OpenAI-compatible
//! chat completions protocol, so one client can front any routed model.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::domain::AgentId;
use crate::error::{AgentError, CouncilError, Result};

/// One request to one agent
#[derive(Debug, Clone)]
pub struct AgentQuery {
    pub agent_id: AgentId,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Transport to a model agent.
///
/// Returns raw reply text; parsing and validation belong to the caller so that
/// transport failures stay distinguishable from malformed content.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn query(&self, query: &AgentQuery) -> std::result::Result<String, AgentError>;
}

/// Chat completions client configuration
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    /// API key for the completions endpoint
    pub api_key: String,
    /// API base URL
    pub base_url: String,
    /// Upper bound on any single request; per-query timeouts are usually tighter
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            timeout_secs: 180,
            max_tokens: 2_000,
        }
    }
}

impl ChatClientConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// HTTP chat completions client
pub struct ChatCompletionsClient {
    config: ChatClientConfig,
    http: Client,
}

impl ChatCompletionsClient {
    pub fn new(config: ChatClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CouncilError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn query(&self, query: &AgentQuery) -> std::result::Result<String, AgentError> {
        if !self.config.is_configured() {
            return Err(AgentError::NotConfigured(query.agent_id.to_string()));
        }

        let request = ChatRequest {
            model: &query.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: query.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: query.user_prompt.clone(),
                },
            ],
            temperature: query.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        let started = Instant::now();
        debug!(agent = %query.agent_id, model = %query.model, "sending completion request");

        let send = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send();

        let response = match tokio::time::timeout(query.timeout, send).await {
            Err(_) => {
                return Err(AgentError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(AgentError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => return Err(AgentError::Transport(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(agent = %query.agent_id, status = %status, "completion request failed");
            return Err(AgentError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Transport(format!("unreadable completion envelope: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(AgentError::EmptyResponse);
        }

        debug!(
            agent = %query.agent_id,
            chars = content.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion received"
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatClientConfig::default();
        assert_eq!(config.base_url, "https://openrouter.ai/api/v1");
        assert!(!config.is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_client_refuses() {
        let client = ChatCompletionsClient::new(ChatClientConfig::default()).unwrap();
        let query = AgentQuery {
            agent_id: AgentId::from("gpt"),
            model: "openai/gpt-4o".into(),
            system_prompt: String::new(),
            user_prompt: String::new(),
            temperature: 0.7,
            timeout: Duration::from_secs(1),
        };
        let err = client.query(&query).await.unwrap_err();
        assert!(matches!(err, AgentError::NotConfigured(_)));
    }
}
