//! Model agent access
//!
//! Transport (`client`), reply parsing (`protocol`), the configured roster,
//! and the system prompts used by each council step.

pub mod client;
pub mod prompts;
pub mod protocol;
pub mod roster;

pub use client::{AgentQuery, ChatClientConfig, ChatCompletionsClient, ModelClient};
pub use protocol::{extract_json, parse_reply, repair_json, ParseFailure};
pub use roster::{AgentProfile, AgentRoster};
