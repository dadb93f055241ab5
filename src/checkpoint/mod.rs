//! Intraday checkpoints
//!
//! Four fixed times per trading day each account is re-evaluated against the
//! indicators frozen at the start of the week, never against fresh research.

pub mod machine;
pub mod runner;
pub mod schedule;

pub use machine::{evaluate, CheckpointInput, CheckpointVerdict};
pub use runner::{CheckpointRun, CheckpointRunner};
pub use schedule::CheckpointSchedule;
