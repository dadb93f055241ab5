//! Council service
//!
//! Owns every collaborator for the process and exposes the operations the
//! CLI drives: the weekly cycle, single-agent regeneration, checkpoint runs
//! and read-back of persisted results.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentRoster, ChatClientConfig, ChatCompletionsClient, ModelClient};
use crate::checkpoint::{CheckpointRun, CheckpointRunner, CheckpointSchedule};
use crate::config::AppConfig;
use crate::council::{
    ChairmanEngine, FallbackPolicy, PitchEngine, PitchReport, PitchReportSummary, PitchRequest, ReviewEngine,
};
use crate::domain::{AgentId, CouncilDecision, ExecutionReport, ExecutionTrigger, Pitch};
use crate::error::{CouncilError, Result};
use crate::execution::{
    AccountRegistry, AlpacaBroker, BrokerKind, BrokerRouter, Brokerage, ExecutionEngine, PaperBroker, SizingTable,
    WeeklyPlanner,
};
use crate::market::{MarketSnapshot, ResearchPacket};
use crate::persistence::{
    load_latest, save_value, MemoryStore, PgStore, RecordFilter, RecordType, Store, StoredRecord,
};
use crate::pipeline::{
    ChairmanStage, ExecutionStage, FreezeStage, PeerReviewStage, Pipeline, PipelineContext, PitchStage,
    StageReport,
};

/// How close to a scheduled checkpoint an unforced run may fire
const CHECKPOINT_TOLERANCE_MINUTES: i64 = 5;

/// Everything one weekly cycle produced
#[derive(Debug, Clone, Serialize)]
pub struct WeeklyCycle {
    pub cycle_id: Uuid,
    pub pitches: Vec<Pitch>,
    pub decision: CouncilDecision,
    pub report: ExecutionReport,
    pub stages: Vec<StageReport>,
}

pub struct CouncilService {
    config: AppConfig,
    roster: AgentRoster,
    store: Arc<dyn Store>,
    registry: Arc<AccountRegistry>,
    broker: Arc<dyn Brokerage>,
    paper: Option<Arc<PaperBroker>>,
    pitch_engine: Arc<PitchEngine>,
    review_engine: Arc<ReviewEngine>,
    chairman: Arc<ChairmanEngine>,
    sizing: SizingTable,
    schedule: CheckpointSchedule,
    label_seed: Option<u64>,
}

impl CouncilService {
    /// Build every collaborator from configuration and the process environment
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        validate(&config)?;

        let registry = AccountRegistry::from_config(&config.accounts, &config.agents, config.dry_run.enabled, |var| {
            std::env::var(var).ok()
        })?;

        let api_key = std::env::var(&config.llm.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            warn!(env_var = %config.llm.api_key_env, "no model API key set; every agent call will fail");
        }
        let client = ChatCompletionsClient::new(ChatClientConfig {
            api_key,
            base_url: config.llm.base_url.clone(),
            timeout_secs: config
                .llm
                .pitch_timeout_secs
                .max(config.llm.review_timeout_secs)
                .max(config.llm.chairman_timeout_secs),
            max_tokens: config.llm.max_tokens,
        })?;

        let store: Arc<dyn Store> = if config.database.url.trim().is_empty() {
            info!("no database configured, keeping records in memory");
            Arc::new(MemoryStore::new(
                config.database.max_connections as usize,
                Duration::from_secs(config.database.acquire_timeout_secs),
            ))
        } else {
            let pg = PgStore::connect(&config.database).await?;
            pg.migrate().await?;
            Arc::new(pg)
        };

        let (broker, paper) = build_brokers(&registry, Duration::from_millis(config.execution.order_timeout_ms)).await?;

        Self::new(config, Arc::new(client), store, broker, paper, registry)
    }

    /// Assemble from explicit collaborators
    pub fn new(
        config: AppConfig,
        client: Arc<dyn ModelClient>,
        store: Arc<dyn Store>,
        broker: Arc<dyn Brokerage>,
        paper: Option<Arc<PaperBroker>>,
        registry: AccountRegistry,
    ) -> Result<Self> {
        validate(&config)?;

        let roster = AgentRoster::from_config(&config);
        let sizing = match &config.execution.sizing_table {
            Some(points) => SizingTable::from_points(points)?,
            None => SizingTable::default(),
        };
        let schedule = CheckpointSchedule::from_config(&config.checkpoint)?;

        let pitch_engine = Arc::new(PitchEngine::new(
            client.clone(),
            roster.clone(),
            config.council.corrective_retries,
        ));
        let review_engine = Arc::new(ReviewEngine::new(client.clone(), roster.clone()));
        let chairman = Arc::new(ChairmanEngine::new(
            client,
            roster.chairman.clone(),
            roster.chairman_timeout,
            FallbackPolicy {
                damping: config.council.fallback_damping,
                neutral_peer_score: config.council.neutral_peer_score,
            },
        ));

        Ok(Self {
            config,
            roster,
            store,
            registry: Arc::new(registry),
            broker,
            paper,
            pitch_engine,
            review_engine,
            chairman,
            sizing,
            schedule,
            label_seed: None,
        })
    }

    /// Fix the anonymization shuffle
    pub fn with_label_seed(mut self, seed: u64) -> Self {
        self.label_seed = Some(seed);
        self
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn schedule(&self) -> &CheckpointSchedule {
        &self.schedule
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run.enabled
    }

    fn engine(&self) -> ExecutionEngine {
        ExecutionEngine::new(
            self.broker.clone(),
            Duration::from_millis(self.config.execution.order_timeout_ms),
        )
    }

    fn account_timeout(&self) -> Duration {
        Duration::from_millis(self.config.execution.account_timeout_ms)
    }

    /// Pitch, review, decide and execute.
    ///
    /// Always ends with a decision and an execution report covering every
    /// account, whatever individual stages did.
    pub async fn run_weekly_cycle(
        &self,
        research: ResearchPacket,
        snapshot: Option<MarketSnapshot>,
    ) -> Result<WeeklyCycle> {
        let cycle_id = Uuid::new_v4();
        info!(%cycle_id, agents = self.roster.len(), accounts = self.registry.len(), "starting weekly cycle");

        let mut ctx = PipelineContext::new(cycle_id).with_research(research);
        if let Some(snapshot) = snapshot {
            if let Some(paper) = &self.paper {
                paper.mark_to_snapshot(&snapshot).await;
            }
            ctx = ctx.with_snapshot(snapshot);
        }

        let mut review_stage = PeerReviewStage::new(
            self.review_engine.clone(),
            self.store.clone(),
            self.config.council.label_alphabet.clone(),
        );
        if let Some(seed) = self.label_seed {
            review_stage = review_stage.with_seed(seed);
        }

        let pipeline = Pipeline::new()
            .stage(FreezeStage::new(self.store.clone()))
            .stage(PitchStage::new(self.pitch_engine.clone(), self.store.clone()))
            .stage(review_stage)
            .stage(ChairmanStage::new(self.chairman.clone(), self.store.clone()))
            .stage(ExecutionStage::new(
                WeeklyPlanner::new(self.broker.clone(), self.sizing.clone(), self.account_timeout()),
                self.engine(),
                self.registry.clone(),
                self.store.clone(),
            ));

        let run = pipeline.run(ctx).await;
        for report in &run.reports {
            if let Err(e) = save_value(
                self.store.as_ref(),
                RecordType::StageReport,
                cycle_id,
                Some(report.stage),
                report,
            )
            .await
            {
                warn!(%cycle_id, stage = report.stage, error = %e, "failed to persist stage report");
            }
        }

        let failed = run.failed_stages();
        if !failed.is_empty() {
            warn!(%cycle_id, ?failed, "weekly cycle finished with failed stages");
        }

        let decision = run
            .context
            .decision()
            .cloned()
            .ok_or_else(|| CouncilError::Internal(format!("cycle {} produced no decision", cycle_id)))?;
        let report = run
            .context
            .execution_report()
            .cloned()
            .unwrap_or_else(|| ExecutionReport::new(cycle_id, ExecutionTrigger::Weekly));

        info!(
            %cycle_id,
            instrument = %decision.instrument,
            direction = %decision.direction,
            conviction = decision.conviction,
            used_fallback = decision.used_fallback,
            accepted = report.accepted_count(),
            rejected = report.rejected_count(),
            "weekly cycle complete"
        );

        Ok(WeeklyCycle {
            cycle_id,
            pitches: run.context.pitches().map(<[Pitch]>::to_vec).unwrap_or_default(),
            decision,
            report,
            stages: run.reports,
        })
    }

    /// Rerun one agent's pitch for the current cycle (or a new one when none exists)
    pub async fn regenerate_pitch(
        &self,
        agent_id: &AgentId,
        research: &ResearchPacket,
        snapshot: Option<&MarketSnapshot>,
    ) -> Result<PitchReport> {
        let cycle_id = self.current_cycle().await?.unwrap_or_else(Uuid::new_v4);
        let request = PitchRequest {
            cycle_id,
            research,
            snapshot,
        };

        let report = self.pitch_engine.generate_one(agent_id, request).await?;
        save_value(
            self.store.as_ref(),
            RecordType::PitchReport,
            cycle_id,
            Some(agent_id.as_str()),
            &PitchReportSummary::from(&report),
        )
        .await?;
        if let Some(pitch) = report.outcome.pitch() {
            save_value(
                self.store.as_ref(),
                RecordType::RegeneratedPitch,
                cycle_id,
                Some(agent_id.as_str()),
                pitch,
            )
            .await?;
        }

        info!(%cycle_id, agent = %agent_id, outcome = report.outcome.label(), "pitch regenerated");
        Ok(report)
    }

    /// Run a checkpoint now.
    ///
    /// Unless `force` is set, returns `None` outside the scheduled times.
    pub async fn run_checkpoint(&self, now: DateTime<Utc>, force: bool) -> Result<Option<CheckpointRun>> {
        let tolerance = ChronoDuration::minutes(CHECKPOINT_TOLERANCE_MINUTES);
        if !force && !self.schedule.is_checkpoint_time(now, tolerance) {
            info!(next = %self.schedule.next_after(now), "not a checkpoint time, skipping");
            return Ok(None);
        }

        let runner = CheckpointRunner::new(
            self.store.clone(),
            self.engine(),
            self.sizing.clone(),
            self.config.checkpoint.conviction_step,
            self.account_timeout(),
        );
        runner.run(&self.registry, None, now).await.map(Some)
    }

    async fn current_cycle(&self) -> Result<Option<Uuid>> {
        let newest = |records: Vec<StoredRecord>| records.into_iter().next();
        let decision = newest(
            self.store
                .load(RecordType::Decision, &RecordFilter::latest())
                .await?,
        );
        let mut pitches = self.store.load(RecordType::Pitch, &RecordFilter::latest()).await?;
        pitches.extend(
            self.store
                .load(RecordType::RegeneratedPitch, &RecordFilter::latest())
                .await?,
        );
        pitches.sort_by(|a, b| b.id.cmp(&a.id));
        let pitch = newest(pitches);

        Ok(match (decision, pitch) {
            (Some(d), Some(p)) => Some(if p.id > d.id { p.cycle_id } else { d.cycle_id }),
            (Some(d), None) => Some(d.cycle_id),
            (None, Some(p)) => Some(p.cycle_id),
            (None, None) => None,
        })
    }

    /// Latest pitch per agent for the current cycle, regenerations included, in roster order
    pub async fn current_pitches(&self) -> Result<Vec<Pitch>> {
        let Some(cycle_id) = self.current_cycle().await? else {
            return Ok(Vec::new());
        };
        let filter = RecordFilter::cycle(cycle_id);
        let mut records = self.store.load(RecordType::Pitch, &filter).await?;
        records.extend(self.store.load(RecordType::RegeneratedPitch, &filter).await?);
        records.sort_by(|a, b| b.id.cmp(&a.id));

        let mut seen = HashSet::new();
        let mut pitches = Vec::new();
        for record in &records {
            let pitch: Pitch = record.decode()?;
            if seen.insert(pitch.model_id.clone()) {
                pitches.push(pitch);
            }
        }
        pitches.sort_by_key(|p| self.roster.position(&p.model_id).unwrap_or(usize::MAX));
        Ok(pitches)
    }

    pub async fn current_decision(&self) -> Result<Option<CouncilDecision>> {
        load_latest(self.store.as_ref(), RecordType::Decision, RecordFilter::all()).await
    }

    pub async fn latest_execution_report(&self) -> Result<Option<ExecutionReport>> {
        load_latest(self.store.as_ref(), RecordType::ExecutionReport, RecordFilter::all()).await
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    config
        .validate()
        .map_err(|errors| CouncilError::InvalidConfig(errors.join("; ")))
}

/// One paper broker for every paper account, one Alpaca client per live account
async fn build_brokers(
    registry: &AccountRegistry,
    timeout: Duration,
) -> Result<(Arc<dyn Brokerage>, Option<Arc<PaperBroker>>)> {
    let paper = Arc::new(PaperBroker::new());
    let mut router = BrokerRouter::new();
    let mut any_paper = false;

    for spec in registry.iter() {
        match spec.broker {
            BrokerKind::Paper => {
                paper.open_account(spec.id.clone(), spec.paper_equity).await;
                router = router.route(spec.id.clone(), paper.clone());
                any_paper = true;
            }
            BrokerKind::Alpaca => {
                let credentials = spec.credentials.clone().ok_or_else(|| {
                    CouncilError::InvalidConfig(format!("account {} has no credentials", spec.id))
                })?;
                let alpaca = AlpacaBroker::new(credentials, spec.base_url.as_ref().map(|u| u.as_str()), timeout)?;
                router = router.route(spec.id.clone(), Arc::new(alpaca));
            }
        }
    }

    Ok((Arc::new(router), any_paper.then_some(paper)))
}
