use thiserror::Error;

/// Main error type for the council
#[derive(Error, Debug)]
pub enum CouncilError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Account registry error: {0}")]
    Registry(#[from] RegistryError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Pipeline errors
    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    // Snapshot errors
    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for CouncilError
pub type Result<T> = std::result::Result<T, CouncilError>;

/// Failures talking to a model agent.
///
/// These are transport-level failures only. A reply that arrives but does not
/// parse or validate is a content problem and is reported by the caller's parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("empty response")]
    EmptyResponse,

    #[error("agent not configured: {0}")]
    NotConfigured(String),
}

impl AgentError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::Transport(_) | AgentError::Timeout { .. } | AgentError::RateLimited(_)
        )
    }
}

/// Brokerage failures, captured per order and never propagated across accounts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("insufficient capital: {0}")]
    InsufficientCapital(String),

    #[error("market closed")]
    MarketClosed,

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("no position in {0}")]
    NoPosition(String),
}

/// Pipeline stage failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("stage {stage} is missing required input {key}")]
    MissingInput { stage: String, key: String },

    #[error("stage {stage} did not produce {key}")]
    MissingOutput { stage: String, key: String },

    #[error("stage {stage} failed: {reason}")]
    Fatal { stage: String, reason: String },
}

/// Account registry validation failures (startup only)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate account id: {0}")]
    DuplicateAccount(String),

    #[error("too many accounts: {count} > {max}")]
    TooManyAccounts { count: usize, max: usize },

    #[error("account {account} references unknown agent {agent}")]
    UnknownAgent { account: String, agent: String },

    #[error("account {account} is missing credential {env_var}")]
    MissingCredential { account: String, env_var: String },

    #[error("account {account} has invalid base url: {reason}")]
    InvalidUrl { account: String, reason: String },

    #[error("account {account} has an invalid role: {reason}")]
    InvalidRole { account: String, reason: String },

    #[error("account {account}: {reason}")]
    UnknownBroker { account: String, reason: String },

    #[error("account id cannot be empty")]
    EmptyId,

    #[error("more than one council account: {0}")]
    DuplicateCouncil(String),
}

