pub mod agent;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod council;
pub mod domain;
pub mod error;
pub mod execution;
pub mod market;
pub mod persistence;
pub mod pipeline;
pub mod service;

pub use agent::{AgentRoster, ChatCompletionsClient, ModelClient};
pub use checkpoint::{CheckpointRun, CheckpointRunner, CheckpointSchedule};
pub use config::AppConfig;
pub use council::{ChairmanEngine, PitchEngine, ReviewEngine};
pub use domain::{
    AccountId, AgentId, CheckpointAction, CheckpointEvent, CouncilDecision, Direction, ExecutionReport,
    Instrument, Pitch, PitchContent,
};
pub use error::{CouncilError, Result};
pub use execution::{AccountRegistry, Brokerage, ExecutionEngine, PaperBroker};
pub use market::{MarketSnapshot, ResearchPacket};
pub use persistence::{MemoryStore, PgStore, Store};
pub use service::{CouncilService, WeeklyCycle};
