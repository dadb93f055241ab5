//! Weekly rebalance planning
//!
//! Turns the council decision and the individual pitches into one set of
//! order tickets per account. Accounts are read concurrently; an account
//! that cannot be read becomes a rejected order instead of failing the batch.

use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::{
    AccountId, CouncilDecision, Direction, EntryMode, EntryPolicy, ExecutionOrder, ExitPolicy, Instrument,
    OrderSide, OrderTicket, Pitch, SkippedAccount,
};
use crate::error::BrokerError;
use crate::market::MarketSnapshot;

use super::accounts::{AccountRegistry, AccountRole};
use super::broker::{AccountSnapshot, BrokerResult, Brokerage, PositionSnapshot};
use super::sizing::SizingTable;

/// What one account should hold after the rebalance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTarget {
    pub account_id: AccountId,
    pub instrument: Instrument,
    pub conviction: f64,
    pub entry_policy: EntryPolicy,
    pub exit_policy: Option<ExitPolicy>,
    /// "council" or the agent id whose pitch this follows
    pub source: String,
}

impl AccountTarget {
    fn from_decision(account_id: AccountId, decision: &CouncilDecision) -> Self {
        Self {
            account_id,
            instrument: decision.instrument,
            conviction: decision.conviction,
            entry_policy: decision.entry_policy.clone(),
            exit_policy: decision.exit_policy.clone(),
            source: "council".to_string(),
        }
    }

    fn from_pitch(account_id: AccountId, pitch: &Pitch) -> Self {
        Self {
            account_id,
            instrument: pitch.content.instrument,
            conviction: pitch.content.conviction,
            entry_policy: pitch.content.entry_policy.clone(),
            exit_policy: pitch.content.exit_policy.clone(),
            source: pitch.model_id.to_string(),
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::from_conviction(self.conviction)
    }
}

/// Account and positions read together
#[derive(Debug, Clone)]
pub struct AccountState {
    pub account: AccountSnapshot,
    pub positions: Vec<PositionSnapshot>,
}

impl AccountState {
    pub fn position(&self, symbol: &str) -> Option<&PositionSnapshot> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

/// Read account and positions concurrently under one deadline
pub async fn fetch_state(
    broker: &dyn Brokerage,
    account_id: &AccountId,
    deadline: Duration,
) -> BrokerResult<AccountState> {
    let start = Instant::now();
    let read = async {
        let (account, positions) = tokio::join!(broker.get_account(account_id), broker.get_positions(account_id));
        Ok(AccountState {
            account: account?,
            positions: positions?,
        })
    };
    match timeout(deadline, read).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

/// Protective stop below a long entry or above a short one
pub fn protective_stop(direction: Direction, price: Decimal, stop_loss_pct: f64) -> Option<Decimal> {
    let pct = Decimal::try_from(stop_loss_pct).ok()?;
    if pct <= Decimal::ZERO {
        return None;
    }
    match direction {
        Direction::Long => Some((price * (Decimal::ONE - pct)).round_dp(2)),
        Direction::Short => Some((price * (Decimal::ONE + pct)).round_dp(2)),
        Direction::Flat => None,
    }
}

/// Side and magnitude of a signed quantity change
pub fn side_for(delta: Decimal) -> (OrderSide, Decimal) {
    if delta > Decimal::ZERO {
        (OrderSide::Buy, delta)
    } else {
        (OrderSide::Sell, -delta)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeeklyPlan {
    pub targets: Vec<AccountTarget>,
    pub tickets: Vec<OrderTicket>,
    pub skipped: Vec<SkippedAccount>,
    /// Accounts that could not be read; already terminal
    pub failures: Vec<ExecutionOrder>,
}

enum AccountPlan {
    Tickets(Vec<OrderTicket>),
    Skip(SkippedAccount),
    Failed(ExecutionOrder),
}

pub struct WeeklyPlanner {
    broker: Arc<dyn Brokerage>,
    sizing: SizingTable,
    account_timeout: Duration,
}

impl WeeklyPlanner {
    pub fn new(broker: Arc<dyn Brokerage>, sizing: SizingTable, account_timeout: Duration) -> Self {
        Self {
            broker,
            sizing,
            account_timeout,
        }
    }

    /// Resolve each account's target from its role.
    ///
    /// Agent accounts whose agent produced no pitch this cycle are skipped.
    pub fn targets(
        registry: &AccountRegistry,
        decision: &CouncilDecision,
        pitches: &[Pitch],
    ) -> (Vec<AccountTarget>, Vec<SkippedAccount>) {
        let mut targets = Vec::new();
        let mut skipped = Vec::new();

        for spec in registry.iter() {
            match &spec.role {
                AccountRole::Council => targets.push(AccountTarget::from_decision(spec.id.clone(), decision)),
                AccountRole::Agent(agent) => match pitches.iter().find(|p| &p.model_id == agent) {
                    Some(pitch) => targets.push(AccountTarget::from_pitch(spec.id.clone(), pitch)),
                    None => skipped.push(SkippedAccount {
                        account_id: spec.id.clone(),
                        reason: format!("no pitch from {} this cycle", agent),
                    }),
                },
            }
        }
        (targets, skipped)
    }

    pub async fn plan(
        &self,
        registry: &AccountRegistry,
        decision: &CouncilDecision,
        pitches: &[Pitch],
        snapshot: Option<&MarketSnapshot>,
    ) -> WeeklyPlan {
        let (targets, skipped) = Self::targets(registry, decision, pitches);
        let futures: Vec<_> = targets
            .iter()
            .map(|target| async move { self.plan_account(target, snapshot).await })
            .collect();

        let mut plan = WeeklyPlan {
            targets: targets.clone(),
            skipped,
            ..WeeklyPlan::default()
        };
        for account_plan in join_all(futures).await {
            match account_plan {
                AccountPlan::Tickets(tickets) => plan.tickets.extend(tickets),
                AccountPlan::Skip(skip) => plan.skipped.push(skip),
                AccountPlan::Failed(order) => plan.failures.push(order),
            }
        }
        plan
    }

    async fn plan_account(&self, target: &AccountTarget, snapshot: Option<&MarketSnapshot>) -> AccountPlan {
        let state = match fetch_state(self.broker.as_ref(), &target.account_id, self.account_timeout).await {
            Ok(state) => state,
            Err(e) => {
                warn!(account = %target.account_id, error = %e, "account lookup failed");
                return AccountPlan::Failed(ExecutionOrder::lookup_failed(
                    target.account_id.clone(),
                    target.instrument.as_str(),
                    format!("account lookup failed: {}", e),
                ));
            }
        };

        match self.tickets_for(target, &state, snapshot) {
            Ok(tickets) if tickets.is_empty() => AccountPlan::Skip(SkippedAccount {
                account_id: target.account_id.clone(),
                reason: if target.instrument.is_flat() {
                    "flat with no open positions".to_string()
                } else {
                    format!("already at target in {}", target.instrument)
                },
            }),
            Ok(tickets) => AccountPlan::Tickets(tickets),
            Err(reason) => AccountPlan::Failed(ExecutionOrder::lookup_failed(
                target.account_id.clone(),
                target.instrument.as_str(),
                reason,
            )),
        }
    }

    /// Close everything outside the target, then step the target position
    fn tickets_for(
        &self,
        target: &AccountTarget,
        state: &AccountState,
        snapshot: Option<&MarketSnapshot>,
    ) -> Result<Vec<OrderTicket>, String> {
        let mut tickets = Vec::new();

        for position in &state.positions {
            let in_universe = position
                .symbol
                .parse::<Instrument>()
                .map(|i| !i.is_flat())
                .unwrap_or(false);
            if !in_universe || position.symbol == target.instrument.as_str() || position.qty.is_zero() {
                continue;
            }
            let (side, qty) = side_for(-position.qty);
            tickets.push(OrderTicket::close(target.account_id.clone(), &position.symbol, side, qty));
        }

        if target.instrument.is_flat() {
            return Ok(tickets);
        }

        let symbol = target.instrument.as_str();
        let held = state.position(symbol);
        let current = held.map(|p| p.qty).unwrap_or(Decimal::ZERO);
        let price = held
            .map(|p| p.current_price)
            .filter(|p| *p > Decimal::ZERO)
            .or_else(|| snapshot.and_then(|s| s.last_close(target.instrument)))
            .ok_or_else(|| format!("no price for {}", symbol))?;

        let desired = self
            .sizing
            .target_qty(target.conviction, state.account.equity, price);
        debug!(
            account = %target.account_id,
            symbol,
            conviction = target.conviction,
            current = %current,
            desired = %desired,
            "sized target"
        );

        if desired.is_zero() {
            if !current.is_zero() {
                let (side, qty) = side_for(-current);
                tickets.push(OrderTicket::close(target.account_id.clone(), symbol, side, qty));
            }
            return Ok(tickets);
        }

        let delta = desired - current;
        if delta.is_zero() {
            return Ok(tickets);
        }

        let (side, qty) = side_for(delta);
        let mut ticket = OrderTicket::market(target.account_id.clone(), symbol, side, qty);
        if target.entry_policy.mode == EntryMode::Limit {
            if let Some(limit) = target.entry_policy.limit_price {
                ticket = ticket.with_limit(limit);
            }
        }

        let adds_exposure = delta.is_sign_positive() == desired.is_sign_positive();
        if adds_exposure {
            if let Some(stop) = target
                .exit_policy
                .as_ref()
                .and_then(|exit| protective_stop(target.direction(), price, exit.stop_loss_pct))
            {
                ticket = ticket.with_stop(stop);
            }
        }
        tickets.push(ticket);
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountConfig, AgentConfig};
    use crate::domain::{PitchContent, PitchOrigin, RiskProfile, TicketIntent};
    use crate::execution::paper::PaperBroker;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn registry(roles: &[(&str, &str)]) -> AccountRegistry {
        let accounts: Vec<_> = roles
            .iter()
            .map(|(id, role)| AccountConfig {
                id: id.to_string(),
                role: role.to_string(),
                broker: "paper".to_string(),
                base_url: None,
                key_env: None,
                secret_env: None,
                paper_equity: None,
            })
            .collect();
        let agents = vec![AgentConfig {
            id: "gpt".into(),
            model: "vendor/gpt".into(),
            temperature: 0.7,
        }];
        AccountRegistry::from_config(&accounts, &agents, true, |_| None).unwrap()
    }

    fn spy_long(cycle: Uuid) -> Pitch {
        Pitch::new(
            cycle,
            "gpt".into(),
            PitchOrigin::FirstPass,
            PitchContent {
                instrument: Instrument::Spy,
                direction: Direction::Long,
                conviction: 1.0,
                risk_profile: Some(RiskProfile::Base),
                thesis_bullets: Vec::new(),
                entry_policy: EntryPolicy {
                    mode: EntryMode::MarketOnOpen,
                    limit_price: None,
                },
                exit_policy: Some(ExitPolicy::canonical(RiskProfile::Base)),
            },
        )
    }

    async fn paper(accounts: &[&str]) -> Arc<PaperBroker> {
        let broker = Arc::new(PaperBroker::new());
        for id in accounts {
            broker.open_account(AccountId::from(*id), dec!(100000)).await;
        }
        broker.set_price("SPY", dec!(500)).await;
        broker.set_price("TLT", dec!(90)).await;
        broker
    }

    #[test]
    fn test_protective_stop_sides() {
        assert_eq!(protective_stop(Direction::Long, dec!(500), 0.02), Some(dec!(490.00)));
        assert_eq!(protective_stop(Direction::Short, dec!(500), 0.02), Some(dec!(510.00)));
        assert_eq!(protective_stop(Direction::Flat, dec!(500), 0.02), None);
    }

    #[tokio::test]
    async fn test_council_and_agent_targets() {
        let cycle = Uuid::new_v4();
        let pitch = spy_long(cycle);
        let decision = CouncilDecision::flat(cycle, "no edge".into(), Vec::new(), false);
        let registry = registry(&[("main", "council"), ("solo", "agent:gpt")]);
        let broker = paper(&["main", "solo"]).await;

        let planner = WeeklyPlanner::new(broker.clone(), SizingTable::default(), Duration::from_secs(1));
        let plan = planner.plan(&registry, &decision, &[pitch], None).await;

        // Council is flat with nothing open; the agent account buys 10% of 100k at 500
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].account_id.as_str(), "main");
        assert_eq!(plan.tickets.len(), 1);
        let ticket = &plan.tickets[0];
        assert_eq!(ticket.account_id.as_str(), "solo");
        assert_eq!(ticket.side, OrderSide::Buy);
        assert_eq!(ticket.qty, dec!(20));
        assert_eq!(ticket.stop_price, Some(dec!(490.00)));
    }

    #[tokio::test]
    async fn test_rotation_closes_other_positions() {
        let cycle = Uuid::new_v4();
        let registry = registry(&[("main", "council")]);
        let broker = paper(&["main"]).await;
        broker
            .place_order(
                &AccountId::from("main"),
                &crate::execution::broker::OrderRequest::from(&OrderTicket::market(
                    AccountId::from("main"),
                    "TLT",
                    OrderSide::Buy,
                    dec!(50),
                )),
            )
            .await
            .unwrap();

        let decision = CouncilDecision::from_pitch(&spy_long(cycle), 1.0, "go".into(), Vec::new(), None, false);
        let planner = WeeklyPlanner::new(broker, SizingTable::default(), Duration::from_secs(1));
        let plan = planner.plan(&registry, &decision, &[], None).await;

        assert_eq!(plan.tickets.len(), 2);
        assert_eq!(plan.tickets[0].intent, TicketIntent::Close);
        assert_eq!(plan.tickets[0].symbol, "TLT");
        assert_eq!(plan.tickets[1].symbol, "SPY");
    }

    #[tokio::test]
    async fn test_missing_agent_pitch_and_unknown_account() {
        let cycle = Uuid::new_v4();
        let registry = registry(&[("main", "council"), ("solo", "agent:gpt")]);
        // "main" never opened on the broker
        let broker = paper(&["solo"]).await;
        let decision = CouncilDecision::from_pitch(&spy_long(cycle), 1.0, "go".into(), Vec::new(), None, false);

        let planner = WeeklyPlanner::new(broker, SizingTable::default(), Duration::from_secs(1));
        let plan = planner.plan(&registry, &decision, &[], None).await;

        assert_eq!(plan.failures.len(), 1);
        assert_eq!(plan.failures[0].account_id.as_str(), "main");
        assert!(plan.failures[0].error.as_deref().unwrap().contains("unknown account"));
        assert_eq!(plan.skipped.len(), 1);
        assert!(plan.skipped[0].reason.contains("no pitch from gpt"));
        assert!(plan.tickets.is_empty());
    }
}
