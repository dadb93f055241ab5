//! Checkpoint run across every account
//!
//! Reads only what the weekly cycle persisted: the decision, the pitches and
//! the frozen indicators. Accounts are evaluated concurrently and in isolation.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    AccountId, CheckpointAction, CheckpointEvent, CouncilDecision, Direction, ExecutionOrder, ExecutionReport,
    ExecutionTrigger, OrderTicket, Pitch, SkippedAccount,
};
use crate::error::{CouncilError, Result};
use crate::execution::{
    fetch_state, protective_stop, side_for, AccountRegistry, AccountState, AccountTarget, ExecutionEngine,
    SizingTable, WeeklyPlanner,
};
use crate::market::FrozenIndicators;
use crate::persistence::{load_all, load_latest, save_or_log, RecordFilter, RecordType, Store};

use super::machine::{evaluate, CheckpointInput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRun {
    pub cycle_id: Uuid,
    pub ran_at: DateTime<Utc>,
    pub events: Vec<CheckpointEvent>,
    pub report: ExecutionReport,
}

enum AccountOutcome {
    Evaluated {
        event: CheckpointEvent,
        ticket: Option<OrderTicket>,
        note: Option<String>,
    },
    Failed(ExecutionOrder),
}

pub struct CheckpointRunner {
    store: Arc<dyn Store>,
    engine: ExecutionEngine,
    sizing: SizingTable,
    step: f64,
    account_timeout: Duration,
}

impl CheckpointRunner {
    pub fn new(
        store: Arc<dyn Store>,
        engine: ExecutionEngine,
        sizing: SizingTable,
        step: f64,
        account_timeout: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            sizing,
            step,
            account_timeout,
        }
    }

    /// Evaluate every account against the latest (or given) weekly cycle
    pub async fn run(
        &self,
        registry: &AccountRegistry,
        cycle_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<CheckpointRun> {
        let filter = cycle_id.map(RecordFilter::cycle).unwrap_or_default();
        let decision: CouncilDecision = load_latest(self.store.as_ref(), RecordType::Decision, filter)
            .await?
            .ok_or_else(|| CouncilError::NotFound("no council decision to check against".into()))?;
        let cycle_id = decision.cycle_id;

        let indicators: FrozenIndicators =
            load_latest(self.store.as_ref(), RecordType::Indicators, RecordFilter::cycle(cycle_id))
                .await?
                .ok_or_else(|| CouncilError::NotFound(format!("no frozen indicators for cycle {}", cycle_id)))?;
        let pitches: Vec<Pitch> =
            load_all(self.store.as_ref(), RecordType::Pitch, &RecordFilter::cycle(cycle_id)).await?;
        let priors = self.prior_convictions(cycle_id).await?;

        let (targets, mut skipped) = WeeklyPlanner::targets(registry, &decision, &pitches);
        info!(%cycle_id, accounts = targets.len(), "running checkpoint");

        let futures: Vec<_> = targets
            .iter()
            .map(|target| {
                let prior = priors.get(&target.account_id).copied().unwrap_or(target.conviction);
                let indicators = &indicators;
                async move { self.evaluate_account(target, prior, indicators, now).await }
            })
            .collect();

        let mut report = ExecutionReport::new(cycle_id, ExecutionTrigger::Checkpoint);
        let mut events = Vec::new();
        let mut tickets = Vec::new();
        for outcome in join_all(futures).await {
            match outcome {
                AccountOutcome::Evaluated { event, ticket, note } => {
                    if let Some(ticket) = ticket {
                        tickets.push(ticket);
                    } else {
                        skipped.push(SkippedAccount {
                            account_id: event.account_id.clone(),
                            reason: note.unwrap_or_else(|| format!("{}: {}", event.action, event.reasoning)),
                        });
                    }
                    events.push(event);
                }
                AccountOutcome::Failed(order) => report.orders.push(order),
            }
        }

        report.orders.extend(self.engine.execute_batch(tickets).await);
        report.skipped = skipped;

        // Orders are already out; a failed write must not hide the run from the caller
        for event in &events {
            save_or_log(
                self.store.as_ref(),
                RecordType::CheckpointEvent,
                cycle_id,
                Some(event.account_id.as_str()),
                event,
            )
            .await;
        }
        save_or_log(
            self.store.as_ref(),
            RecordType::ExecutionReport,
            cycle_id,
            Some("checkpoint"),
            &report,
        )
        .await;

        info!(
            %cycle_id,
            events = events.len(),
            accepted = report.accepted_count(),
            rejected = report.rejected_count(),
            "checkpoint complete"
        );

        Ok(CheckpointRun {
            cycle_id,
            ran_at: now,
            events,
            report,
        })
    }

    /// Conviction each account ended the last checkpoint with
    async fn prior_convictions(&self, cycle_id: Uuid) -> Result<HashMap<AccountId, f64>> {
        let events: Vec<CheckpointEvent> = load_all(
            self.store.as_ref(),
            RecordType::CheckpointEvent,
            &RecordFilter::cycle(cycle_id),
        )
        .await?;

        // Newest first, so the first event seen per account wins
        let mut priors = HashMap::new();
        for event in events {
            priors.entry(event.account_id).or_insert(event.new_conviction);
        }
        Ok(priors)
    }

    async fn evaluate_account(
        &self,
        target: &AccountTarget,
        prior: f64,
        indicators: &FrozenIndicators,
        now: DateTime<Utc>,
    ) -> AccountOutcome {
        let symbol = target.instrument.as_str();
        let state = match fetch_state(self.engine.broker().as_ref(), &target.account_id, self.account_timeout).await
        {
            Ok(state) => state,
            Err(e) => {
                warn!(account = %target.account_id, error = %e, "checkpoint account lookup failed");
                return AccountOutcome::Failed(ExecutionOrder::lookup_failed(
                    target.account_id.clone(),
                    symbol,
                    format!("account lookup failed: {}", e),
                ));
            }
        };

        let position = state.position(symbol);
        let input = CheckpointInput::observe(
            indicators,
            target.instrument,
            prior,
            position,
            target.exit_policy.as_ref(),
            self.step,
        );
        let verdict = evaluate(&input);
        info!(
            account = %target.account_id,
            symbol,
            action = %verdict.action,
            prior,
            new = verdict.new_conviction,
            reasoning = %verdict.reasoning,
            "checkpoint verdict"
        );

        let event = CheckpointEvent {
            account_id: target.account_id.clone(),
            timestamp: now,
            action: verdict.action,
            prior_conviction: prior,
            new_conviction: verdict.new_conviction,
            reasoning: verdict.reasoning,
        };

        if !event.action.requires_order() {
            return AccountOutcome::Evaluated {
                event,
                ticket: None,
                note: None,
            };
        }

        let (ticket, note) = match self.ticket_for(target, &event, &state, indicators) {
            Ok(ticket) => (Some(ticket), None),
            Err(note) => (None, Some(note)),
        };
        AccountOutcome::Evaluated { event, ticket, note }
    }

    /// The single order that moves the account to the verdict's conviction
    fn ticket_for(
        &self,
        target: &AccountTarget,
        event: &CheckpointEvent,
        state: &AccountState,
        indicators: &FrozenIndicators,
    ) -> std::result::Result<OrderTicket, String> {
        let symbol = target.instrument.as_str();
        let position = state.position(symbol);
        let current = position.map(|p| p.qty).unwrap_or(Decimal::ZERO);

        if event.action == CheckpointAction::Exit {
            if current.is_zero() {
                return Err(format!("{}: no open position in {}", event.action, symbol));
            }
            let (side, qty) = side_for(-current);
            return Ok(OrderTicket::close(target.account_id.clone(), symbol, side, qty));
        }

        let price = position
            .map(|p| p.current_price)
            .filter(|p| *p > Decimal::ZERO)
            .or_else(|| indicators.levels.get(&target.instrument).map(|l| l.reference_close))
            .ok_or_else(|| format!("{}: no price for {}", event.action, symbol))?;

        let desired = self
            .sizing
            .target_qty(event.new_conviction, state.account.equity, price);
        let delta = desired - current;
        if delta.is_zero() {
            return Err(format!("{}: {} already sized at {}", event.action, symbol, current));
        }

        let (side, qty) = side_for(delta);
        let mut ticket = OrderTicket::market(target.account_id.clone(), symbol, side, qty);
        if matches!(event.action, CheckpointAction::Flip | CheckpointAction::Increase) {
            let direction = Direction::from_conviction(event.new_conviction);
            if let Some(stop) = target
                .exit_policy
                .as_ref()
                .and_then(|exit| protective_stop(direction, price, exit.stop_loss_pct))
            {
                ticket = ticket.with_stop(stop);
            }
        }
        Ok(ticket)
    }
}
