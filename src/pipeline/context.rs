use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::council::ReviewRound;
use crate::domain::{CouncilDecision, ExecutionReport, Pitch};
use crate::market::{FrozenIndicators, MarketSnapshot, ResearchPacket};

/// Named slots a stage can require or produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    Research,
    Snapshot,
    Indicators,
    Pitches,
    Reviews,
    Decision,
    ExecutionReport,
}

impl ContextKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKey::Research => "research",
            ContextKey::Snapshot => "snapshot",
            ContextKey::Indicators => "indicators",
            ContextKey::Pitches => "pitches",
            ContextKey::Reviews => "reviews",
            ContextKey::Decision => "decision",
            ContextKey::ExecutionReport => "execution_report",
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable state threaded through one weekly cycle.
///
/// Every `with_*` returns a new context; the receiver is never modified.
/// Payloads sit behind `Arc` so cloning between stages stays cheap.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    cycle_id: Uuid,
    started_at: DateTime<Utc>,
    research: Option<Arc<ResearchPacket>>,
    snapshot: Option<Arc<MarketSnapshot>>,
    indicators: Option<Arc<FrozenIndicators>>,
    pitches: Option<Arc<Vec<Pitch>>>,
    reviews: Option<Arc<ReviewRound>>,
    decision: Option<Arc<CouncilDecision>>,
    execution_report: Option<Arc<ExecutionReport>>,
}

impl PipelineContext {
    pub fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            started_at: Utc::now(),
            research: None,
            snapshot: None,
            indicators: None,
            pitches: None,
            reviews: None,
            decision: None,
            execution_report: None,
        }
    }

    pub fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn has(&self, key: ContextKey) -> bool {
        match key {
            ContextKey::Research => self.research.is_some(),
            ContextKey::Snapshot => self.snapshot.is_some(),
            ContextKey::Indicators => self.indicators.is_some(),
            ContextKey::Pitches => self.pitches.is_some(),
            ContextKey::Reviews => self.reviews.is_some(),
            ContextKey::Decision => self.decision.is_some(),
            ContextKey::ExecutionReport => self.execution_report.is_some(),
        }
    }

    pub fn research(&self) -> Option<&ResearchPacket> {
        self.research.as_deref()
    }

    pub fn snapshot(&self) -> Option<&MarketSnapshot> {
        self.snapshot.as_deref()
    }

    pub fn indicators(&self) -> Option<&FrozenIndicators> {
        self.indicators.as_deref()
    }

    pub fn pitches(&self) -> Option<&[Pitch]> {
        self.pitches.as_deref().map(Vec::as_slice)
    }

    pub fn reviews(&self) -> Option<&ReviewRound> {
        self.reviews.as_deref()
    }

    pub fn decision(&self) -> Option<&CouncilDecision> {
        self.decision.as_deref()
    }

    pub fn execution_report(&self) -> Option<&ExecutionReport> {
        self.execution_report.as_deref()
    }

    pub fn with_research(&self, research: ResearchPacket) -> Self {
        Self {
            research: Some(Arc::new(research)),
            ..self.clone()
        }
    }

    pub fn with_snapshot(&self, snapshot: MarketSnapshot) -> Self {
        Self {
            snapshot: Some(Arc::new(snapshot)),
            ..self.clone()
        }
    }

    pub fn with_indicators(&self, indicators: FrozenIndicators) -> Self {
        Self {
            indicators: Some(Arc::new(indicators)),
            ..self.clone()
        }
    }

    pub fn with_pitches(&self, pitches: Vec<Pitch>) -> Self {
        Self {
            pitches: Some(Arc::new(pitches)),
            ..self.clone()
        }
    }

    pub fn with_reviews(&self, reviews: ReviewRound) -> Self {
        Self {
            reviews: Some(Arc::new(reviews)),
            ..self.clone()
        }
    }

    pub fn with_decision(&self, decision: CouncilDecision) -> Self {
        Self {
            decision: Some(Arc::new(decision)),
            ..self.clone()
        }
    }

    pub fn with_execution_report(&self, report: ExecutionReport) -> Self {
        Self {
            execution_report: Some(Arc::new(report)),
            ..self.clone()
        }
    }
}
