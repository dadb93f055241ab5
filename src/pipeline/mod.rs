//! Stage sequencing over an explicit, immutable context

pub mod context;
pub mod stage;
pub mod stages;

pub use context::{ContextKey, PipelineContext};
pub use stage::{Pipeline, PipelineRun, Stage, StageReport, StageStatus};
pub use stages::{ChairmanStage, ExecutionStage, FreezeStage, PeerReviewStage, PitchStage};
