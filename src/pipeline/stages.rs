//! The weekly cycle's stages
//!
//! Each stage reads its inputs from the context, writes what it produced to
//! the store, and returns a new context. A failed write is logged and does not
//! fail the stage.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::council::{
    Anonymizer, ChairmanEngine, PitchEngine, PitchReportSummary, PitchRequest, ReviewEngine, ReviewRound,
};
use crate::domain::{ExecutionReport, ExecutionTrigger, Pitch, SkippedAccount};
use crate::error::StageError;
use crate::execution::{AccountRegistry, ExecutionEngine, WeeklyPlanner};
use crate::persistence::{save_or_log, RecordType, Store};

use super::context::{ContextKey, PipelineContext};
use super::stage::Stage;

/// Freeze the weekly snapshot's levels for the checkpoints that follow
pub struct FreezeStage {
    store: Arc<dyn Store>,
}

impl FreezeStage {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for FreezeStage {
    fn name(&self) -> &'static str {
        "freeze"
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Snapshot]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Indicators]
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<PipelineContext, StageError> {
        let snapshot = ctx.snapshot().ok_or_else(|| StageError::MissingInput {
            stage: self.name().into(),
            key: ContextKey::Snapshot.to_string(),
        })?;
        let indicators = snapshot.freeze(ctx.started_at()).map_err(|e| StageError::Fatal {
            stage: self.name().into(),
            reason: e.to_string(),
        })?;

        save_or_log(self.store.as_ref(), RecordType::Indicators, ctx.cycle_id(), None, &indicators).await;
        Ok(ctx.with_indicators(indicators))
    }
}

pub struct PitchStage {
    engine: Arc<PitchEngine>,
    store: Arc<dyn Store>,
}

impl PitchStage {
    pub fn new(engine: Arc<PitchEngine>, store: Arc<dyn Store>) -> Self {
        Self { engine, store }
    }
}

#[async_trait]
impl Stage for PitchStage {
    fn name(&self) -> &'static str {
        "pitch"
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Research]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Pitches]
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<PipelineContext, StageError> {
        let research = ctx.research().ok_or_else(|| StageError::MissingInput {
            stage: self.name().into(),
            key: ContextKey::Research.to_string(),
        })?;
        let request = PitchRequest {
            cycle_id: ctx.cycle_id(),
            research,
            snapshot: ctx.snapshot(),
        };

        let reports = self.engine.generate_all(request).await;
        let mut pitches: Vec<Pitch> = Vec::with_capacity(reports.len());
        for report in &reports {
            let key = report.model_id.as_str();
            save_or_log(
                self.store.as_ref(),
                RecordType::PitchReport,
                ctx.cycle_id(),
                Some(key),
                &PitchReportSummary::from(report),
            )
            .await;
            if let Some(pitch) = report.outcome.pitch() {
                save_or_log(self.store.as_ref(), RecordType::Pitch, ctx.cycle_id(), Some(key), pitch).await;
                pitches.push(pitch.clone());
            }
        }

        Ok(ctx.with_pitches(pitches))
    }
}

pub struct PeerReviewStage {
    engine: Arc<ReviewEngine>,
    store: Arc<dyn Store>,
    label_alphabet: String,
    seed: Option<u64>,
}

impl PeerReviewStage {
    pub fn new(engine: Arc<ReviewEngine>, store: Arc<dyn Store>, label_alphabet: impl Into<String>) -> Self {
        Self {
            engine,
            store,
            label_alphabet: label_alphabet.into(),
            seed: None,
        }
    }

    /// Fixed label shuffle, for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[async_trait]
impl Stage for PeerReviewStage {
    fn name(&self) -> &'static str {
        "peer_review"
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Pitches]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Reviews]
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<PipelineContext, StageError> {
        let pitches = ctx.pitches().unwrap_or_default();
        let mut anonymizer = match self.seed {
            Some(seed) => Anonymizer::with_seed(&self.label_alphabet, seed),
            None => Anonymizer::new(&self.label_alphabet),
        };
        let (anonymized, label_map) = anonymizer.anonymize(pitches).map_err(|e| StageError::Fatal {
            stage: self.name().into(),
            reason: e.to_string(),
        })?;

        let reviews = self.engine.collect(&anonymized, &label_map).await;

        let cycle_id = ctx.cycle_id();
        save_or_log(self.store.as_ref(), RecordType::LabelMap, cycle_id, None, &label_map).await;
        for review in &reviews {
            save_or_log(
                self.store.as_ref(),
                RecordType::Review,
                cycle_id,
                Some(review.pitch_label.as_str()),
                review,
            )
            .await;
        }

        Ok(ctx.with_reviews(ReviewRound {
            anonymized,
            reviews,
            label_map,
        }))
    }
}

/// Chairman synthesis. Degrades to the fallback rule without reviews and to
/// FLAT without pitches, so a decision always comes out.
pub struct ChairmanStage {
    engine: Arc<ChairmanEngine>,
    store: Arc<dyn Store>,
}

impl ChairmanStage {
    pub fn new(engine: Arc<ChairmanEngine>, store: Arc<dyn Store>) -> Self {
        Self { engine, store }
    }

    async fn decide(&self, ctx: &PipelineContext) -> PipelineContext {
        let pitches = ctx.pitches().unwrap_or_default();
        let decision = self.engine.decide(ctx.cycle_id(), pitches, ctx.reviews()).await;
        save_or_log(self.store.as_ref(), RecordType::Decision, ctx.cycle_id(), None, &decision).await;
        ctx.with_decision(decision)
    }
}

#[async_trait]
impl Stage for ChairmanStage {
    fn name(&self) -> &'static str {
        "chairman"
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Pitches, ContextKey::Reviews]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Decision]
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<PipelineContext, StageError> {
        Ok(self.decide(ctx).await)
    }

    async fn degrade(&self, ctx: &PipelineContext, _missing: ContextKey) -> Result<PipelineContext, StageError> {
        Ok(self.decide(ctx).await)
    }
}

/// Rebalance every account to its weekly target
pub struct ExecutionStage {
    planner: WeeklyPlanner,
    engine: ExecutionEngine,
    registry: Arc<AccountRegistry>,
    store: Arc<dyn Store>,
}

impl ExecutionStage {
    pub fn new(
        planner: WeeklyPlanner,
        engine: ExecutionEngine,
        registry: Arc<AccountRegistry>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            planner,
            engine,
            registry,
            store,
        }
    }

    async fn finish(&self, ctx: &PipelineContext, report: ExecutionReport) -> PipelineContext {
        info!(
            cycle_id = %ctx.cycle_id(),
            accepted = report.accepted_count(),
            rejected = report.rejected_count(),
            skipped = report.skipped.len(),
            "weekly execution finished"
        );
        save_or_log(
            self.store.as_ref(),
            RecordType::ExecutionReport,
            ctx.cycle_id(),
            Some("weekly"),
            &report,
        )
        .await;
        ctx.with_execution_report(report)
    }
}

#[async_trait]
impl Stage for ExecutionStage {
    fn name(&self) -> &'static str {
        "execution"
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Decision]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::ExecutionReport]
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<PipelineContext, StageError> {
        let decision = ctx.decision().ok_or_else(|| StageError::MissingInput {
            stage: self.name().into(),
            key: ContextKey::Decision.to_string(),
        })?;
        let pitches = ctx.pitches().unwrap_or_default();

        let plan = self
            .planner
            .plan(&self.registry, decision, pitches, ctx.snapshot())
            .await;

        let mut report = ExecutionReport::new(ctx.cycle_id(), ExecutionTrigger::Weekly);
        report.orders = plan.failures;
        report.orders.extend(self.engine.execute_batch(plan.tickets).await);
        report.skipped = plan.skipped;

        Ok(self.finish(ctx, report).await)
    }

    /// Every account is reported, even with nothing to trade against
    async fn degrade(&self, ctx: &PipelineContext, missing: ContextKey) -> Result<PipelineContext, StageError> {
        let mut report = ExecutionReport::new(ctx.cycle_id(), ExecutionTrigger::Weekly);
        report.skipped = self
            .registry
            .iter()
            .map(|spec| SkippedAccount {
                account_id: spec.id.clone(),
                reason: format!("no {} this cycle", missing),
            })
            .collect();
        Ok(self.finish(ctx, report).await)
    }
}
