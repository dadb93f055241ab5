use async_trait::async_trait;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::StageError;

use super::context::{ContextKey, PipelineContext};

/// A unit of pipeline work.
///
/// `execute` must not rely on anything outside the context it is given.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn requires(&self) -> &'static [ContextKey];

    fn produces(&self) -> &'static [ContextKey];

    async fn execute(&self, ctx: &PipelineContext) -> Result<PipelineContext, StageError>;

    /// Run in place of `execute` when `missing` is absent from the context.
    ///
    /// Stages with a defined degraded mode override this; the default is fatal.
    async fn degrade(
        &self,
        _ctx: &PipelineContext,
        missing: ContextKey,
    ) -> Result<PipelineContext, StageError> {
        Err(StageError::MissingInput {
            stage: self.name().to_string(),
            key: missing.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// Ran its fallback because an input was missing
    Degraded { missing: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    #[serde(flatten)]
    pub status: StageStatus,
    pub elapsed_ms: u64,
}

impl StageReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, StageStatus::Failed { .. })
    }
}

/// Final context plus one report per stage
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub context: PipelineContext,
    pub reports: Vec<StageReport>,
}

impl PipelineRun {
    pub fn failed_stages(&self) -> Vec<&'static str> {
        self.reports
            .iter()
            .filter(|r| r.is_failed())
            .map(|r| r.stage)
            .collect()
    }
}

/// Ordered list of stages
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order.
    ///
    /// A failing stage leaves the context as it was and the next stage runs
    /// against it, so the caller always gets the best available result.
    pub async fn run(&self, initial: PipelineContext) -> PipelineRun {
        let mut ctx = initial;
        let mut reports = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let started = Instant::now();
            let missing = stage.requires().iter().copied().find(|k| !ctx.has(*k));

            let result = match missing {
                None => stage.execute(&ctx).await,
                Some(key) => {
                    warn!(stage = stage.name(), missing = %key, "required input absent, degrading");
                    stage.degrade(&ctx, key).await
                }
            };

            let result = result.and_then(|next| {
                match stage.produces().iter().find(|k| !next.has(**k)) {
                    Some(key) => Err(StageError::MissingOutput {
                        stage: stage.name().to_string(),
                        key: key.to_string(),
                    }),
                    None => Ok(next),
                }
            });

            let elapsed_ms = started.elapsed().as_millis() as u64;
            let status = match result {
                Ok(next) => {
                    ctx = next;
                    match missing {
                        None => StageStatus::Completed,
                        Some(key) => StageStatus::Degraded {
                            missing: key.to_string(),
                        },
                    }
                }
                Err(e) => {
                    warn!(stage = stage.name(), error = %e, "stage failed, continuing with prior context");
                    StageStatus::Failed { error: e.to_string() }
                }
            };

            info!(stage = stage.name(), elapsed_ms, status = ?status, "stage finished");
            reports.push(StageReport {
                stage: stage.name(),
                status,
                elapsed_ms,
            });
        }

        PipelineRun { context: ctx, reports }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CouncilDecision, Pitch};
    use uuid::Uuid;

    struct Pitches;

    #[async_trait]
    impl Stage for Pitches {
        fn name(&self) -> &'static str {
            "pitches"
        }
        fn requires(&self) -> &'static [ContextKey] {
            &[]
        }
        fn produces(&self) -> &'static [ContextKey] {
            &[ContextKey::Pitches]
        }
        async fn execute(&self, ctx: &PipelineContext) -> Result<PipelineContext, StageError> {
            Ok(ctx.with_pitches(Vec::<Pitch>::new()))
        }
    }

    struct Broken;

    #[async_trait]
    impl Stage for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn requires(&self) -> &'static [ContextKey] {
            &[ContextKey::Pitches]
        }
        fn produces(&self) -> &'static [ContextKey] {
            &[ContextKey::Reviews]
        }
        async fn execute(&self, _ctx: &PipelineContext) -> Result<PipelineContext, StageError> {
            Err(StageError::Fatal {
                stage: "broken".into(),
                reason: "boom".into(),
            })
        }
    }

    struct Lazy;

    #[async_trait]
    impl Stage for Lazy {
        fn name(&self) -> &'static str {
            "lazy"
        }
        fn requires(&self) -> &'static [ContextKey] {
            &[]
        }
        fn produces(&self) -> &'static [ContextKey] {
            &[ContextKey::Decision]
        }
        async fn execute(&self, ctx: &PipelineContext) -> Result<PipelineContext, StageError> {
            Ok(ctx.clone())
        }
    }

    struct Decide;

    #[async_trait]
    impl Stage for Decide {
        fn name(&self) -> &'static str {
            "decide"
        }
        fn requires(&self) -> &'static [ContextKey] {
            &[ContextKey::Reviews]
        }
        fn produces(&self) -> &'static [ContextKey] {
            &[ContextKey::Decision]
        }
        async fn execute(&self, _ctx: &PipelineContext) -> Result<PipelineContext, StageError> {
            unreachable!("reviews are never present in these tests")
        }
        async fn degrade(
            &self,
            ctx: &PipelineContext,
            _missing: ContextKey,
        ) -> Result<PipelineContext, StageError> {
            Ok(ctx.with_decision(CouncilDecision::flat(
                ctx.cycle_id(),
                "no reviews".into(),
                Vec::new(),
                true,
            )))
        }
    }

    #[tokio::test]
    async fn test_fatal_stage_does_not_abort_pipeline() {
        let pipeline = Pipeline::new().stage(Pitches).stage(Broken).stage(Decide);
        let run = pipeline.run(PipelineContext::new(Uuid::new_v4())).await;

        assert_eq!(run.reports.len(), 3);
        assert_eq!(run.reports[0].status, StageStatus::Completed);
        assert!(run.reports[1].is_failed());
        assert_eq!(
            run.reports[2].status,
            StageStatus::Degraded {
                missing: "reviews".into()
            }
        );
        assert!(run.context.has(ContextKey::Pitches));
        assert!(run.context.decision().unwrap().is_flat());
        assert_eq!(run.failed_stages(), vec!["broken"]);
    }

    #[tokio::test]
    async fn test_missing_output_is_fatal() {
        let run = Pipeline::new()
            .stage(Lazy)
            .run(PipelineContext::new(Uuid::new_v4()))
            .await;
        assert!(run.reports[0].is_failed());
        assert!(!run.context.has(ContextKey::Decision));
    }

    #[tokio::test]
    async fn test_missing_input_without_fallback_is_fatal() {
        let run = Pipeline::new()
            .stage(Broken)
            .run(PipelineContext::new(Uuid::new_v4()))
            .await;
        match &run.reports[0].status {
            StageStatus::Failed { error } => assert!(error.contains("missing required input pitches")),
            other => panic!("unexpected status {:?}", other),
        }
    }
}
