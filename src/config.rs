use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    /// Pitch writers and reviewers, in roster order
    pub agents: Vec<AgentConfig>,
    pub chairman: AgentConfig,
    #[serde(default)]
    pub council: CouncilConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible completions endpoint
    pub base_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_pitch_timeout")]
    pub pitch_timeout_secs: u64,
    #[serde(default = "default_review_timeout")]
    pub review_timeout_secs: u64,
    #[serde(default = "default_chairman_timeout")]
    pub chairman_timeout_secs: u64,
}

fn default_llm_key_env() -> String {
    "COUNCIL_LLM_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    2_000
}

fn default_pitch_timeout() -> u64 {
    120
}

fn default_review_timeout() -> u64 {
    90
}

fn default_chairman_timeout() -> u64 {
    180
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    /// Model name passed to the completions endpoint
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Deserialize)]
pub struct CouncilConfig {
    /// Corrective retries before a compliance failure becomes FLAT (0 or 1)
    #[serde(default = "default_corrective_retries")]
    pub corrective_retries: u8,
    /// Multiplier applied to the carried conviction when the chairman falls back
    #[serde(default = "default_fallback_damping")]
    pub fallback_damping: f64,
    /// Peer score assumed for a pitch nobody reviewed
    #[serde(default = "default_neutral_peer_score")]
    pub neutral_peer_score: f64,
    /// Labels handed out to anonymized pitches
    #[serde(default = "default_label_alphabet")]
    pub label_alphabet: String,
}

/// Each agent is queried at most twice per cycle
pub const MAX_CORRECTIVE_RETRIES: u8 = 1;

fn default_corrective_retries() -> u8 {
    1
}

fn default_fallback_damping() -> f64 {
    0.8
}

fn default_neutral_peer_score() -> f64 {
    5.0
}

fn default_label_alphabet() -> String {
    "ABCDEFGH".to_string()
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            corrective_retries: default_corrective_retries(),
            fallback_damping: default_fallback_damping(),
            neutral_peer_score: default_neutral_peer_score(),
            label_alphabet: default_label_alphabet(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    /// Local exchange times, "HH:MM"
    #[serde(default = "default_checkpoint_times")]
    pub times: Vec<String>,
    /// Exchange offset from UTC in minutes (e.g. -300 for US Eastern standard time)
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
    /// Conviction moved per REDUCE/INCREASE step
    #[serde(default = "default_conviction_step")]
    pub conviction_step: f64,
}

fn default_checkpoint_times() -> Vec<String> {
    vec![
        "10:00".to_string(),
        "11:30".to_string(),
        "13:30".to_string(),
        "15:30".to_string(),
    ]
}

fn default_utc_offset() -> i32 {
    -300
}

fn default_conviction_step() -> f64 {
    0.5
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            times: default_checkpoint_times(),
            utc_offset_minutes: default_utc_offset(),
            conviction_step: default_conviction_step(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizingPoint {
    pub conviction: f64,
    pub fraction: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Per-order timeout in milliseconds
    #[serde(default = "default_order_timeout")]
    pub order_timeout_ms: u64,
    /// Per-account lookup timeout (equity, positions) in milliseconds
    #[serde(default = "default_account_timeout")]
    pub account_timeout_ms: u64,
    /// Overrides the built-in conviction to size table
    #[serde(default)]
    pub sizing_table: Option<Vec<SizingPoint>>,
}

fn default_order_timeout() -> u64 {
    10_000
}

fn default_account_timeout() -> u64 {
    5_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_timeout_ms: default_order_timeout(),
            account_timeout_ms: default_account_timeout(),
            sizing_table: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    /// "council" or "agent:<agent id>"
    pub role: String,
    /// "alpaca" or "paper"
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub key_env: Option<String>,
    #[serde(default)]
    pub secret_env: Option<String>,
    /// Starting equity for paper accounts
    #[serde(default)]
    pub paper_equity: Option<Decimal>,
}

fn default_broker() -> String {
    "alpaca".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; empty keeps records in memory
    #[serde(default)]
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a queued storage operation waits for a connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Trade every account on the in-process paper broker
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .set_default("dry_run.enabled", true)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("COUNCIL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (COUNCIL_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("COUNCIL")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load from one explicit file, still honoring environment overrides
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("COUNCIL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.agents.is_empty() {
            errors.push("at least one agent must be configured".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                errors.push("agent id cannot be empty".to_string());
            }
            if !seen.insert(agent.id.as_str()) {
                errors.push(format!("duplicate agent id: {}", agent.id));
            }
            if !(0.0..=2.0).contains(&agent.temperature) {
                errors.push(format!(
                    "agent {} temperature {} must be within [0, 2]",
                    agent.id, agent.temperature
                ));
            }
        }

        let alphabet_len = self.council.label_alphabet.chars().count();
        if alphabet_len < self.agents.len() {
            errors.push(format!(
                "label alphabet has {} labels but {} agents are configured",
                alphabet_len,
                self.agents.len()
            ));
        }

        if self.council.corrective_retries > MAX_CORRECTIVE_RETRIES {
            errors.push(format!(
                "corrective_retries must be at most {}, got {}",
                MAX_CORRECTIVE_RETRIES, self.council.corrective_retries
            ));
        }

        if !(0.0..=1.0).contains(&self.council.fallback_damping) {
            errors.push("fallback_damping must be between 0 and 1".to_string());
        }

        if !(1.0..=10.0).contains(&self.council.neutral_peer_score) {
            errors.push("neutral_peer_score must be between 1 and 10".to_string());
        }

        if self.checkpoint.times.len() != 4 {
            errors.push(format!(
                "exactly 4 checkpoint times are required, got {}",
                self.checkpoint.times.len()
            ));
        }
        for time in &self.checkpoint.times {
            if chrono::NaiveTime::parse_from_str(time, "%H:%M").is_err() {
                errors.push(format!("invalid checkpoint time '{}', expected HH:MM", time));
            }
        }

        if self.checkpoint.conviction_step <= 0.0 || self.checkpoint.conviction_step > 2.0 {
            errors.push("conviction_step must be within (0, 2]".to_string());
        }

        if !self.dry_run.enabled && self.database.url.trim().is_empty() {
            errors.push("database.url is required outside dry run".to_string());
        }

        if self.execution.order_timeout_ms == 0 {
            errors.push("order_timeout_ms must be positive".to_string());
        }

        if let Some(table) = &self.execution.sizing_table {
            if table.len() < 2 {
                errors.push("sizing_table needs at least two breakpoints".to_string());
            }
            if table.windows(2).any(|w| w[0].conviction >= w[1].conviction) {
                errors.push("sizing_table convictions must be strictly increasing".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
