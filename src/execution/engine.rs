use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::domain::{ExecutionOrder, OrderTicket, TicketIntent};
use crate::error::BrokerError;

use super::broker::{Brokerage, OrderRequest};

/// Places a batch of tickets concurrently.
///
/// Every ticket yields exactly one [`ExecutionOrder`]; a broker error or a
/// timeout on one account never touches the others.
#[derive(Clone)]
pub struct ExecutionEngine {
    broker: Arc<dyn Brokerage>,
    order_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(broker: Arc<dyn Brokerage>, order_timeout: Duration) -> Self {
        Self { broker, order_timeout }
    }

    pub fn broker(&self) -> &Arc<dyn Brokerage> {
        &self.broker
    }

    pub async fn execute(&self, ticket: &OrderTicket) -> ExecutionOrder {
        let start = Instant::now();
        let submit = async {
            match ticket.intent {
                TicketIntent::Close => self.broker.close_position(&ticket.account_id, &ticket.symbol).await,
                TicketIntent::Adjust => {
                    self.broker
                        .place_order(&ticket.account_id, &OrderRequest::from(ticket))
                        .await
                }
            }
        };

        let result = match timeout(self.order_timeout, submit).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(broker_ref) => {
                info!(
                    account = %ticket.account_id,
                    symbol = %ticket.symbol,
                    side = %ticket.side,
                    qty = %ticket.qty,
                    broker_ref = %broker_ref,
                    elapsed_ms,
                    "order accepted"
                );
                ExecutionOrder::accepted(ticket, broker_ref, elapsed_ms)
            }
            Err(e) => {
                warn!(
                    account = %ticket.account_id,
                    symbol = %ticket.symbol,
                    side = %ticket.side,
                    qty = %ticket.qty,
                    error = %e,
                    elapsed_ms,
                    "order rejected"
                );
                ExecutionOrder::rejected(ticket, e.to_string(), elapsed_ms)
            }
        }
    }

    /// Results come back in ticket order
    pub async fn execute_batch(&self, tickets: Vec<OrderTicket>) -> Vec<ExecutionOrder> {
        let futures: Vec<_> = tickets
            .iter()
            .map(|ticket| async move { self.execute(ticket).await })
            .collect();

        join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, OrderSide, OrderStatus};
    use crate::execution::broker::MockBrokerage;
    use rust_decimal_macros::dec;

    fn tickets(n: usize) -> Vec<OrderTicket> {
        (0..n)
            .map(|i| OrderTicket::market(AccountId::new(format!("acct{}", i)), "SPY", OrderSide::Buy, dec!(10)))
            .collect()
    }

    #[tokio::test]
    async fn test_one_rigged_account_isolated() {
        let mut mock = MockBrokerage::new();
        mock.expect_place_order().times(6).returning(|account, _| {
            if account.as_str() == "acct3" {
                Err(BrokerError::InsufficientCapital("buying power 0".into()))
            } else {
                Ok(format!("ref-{}", account))
            }
        });

        let engine = ExecutionEngine::new(Arc::new(mock), Duration::from_secs(1));
        let orders = engine.execute_batch(tickets(6)).await;

        assert_eq!(orders.len(), 6);
        assert_eq!(orders.iter().filter(|o| o.is_accepted()).count(), 5);
        let failed = &orders[3];
        assert_eq!(failed.status, OrderStatus::Rejected);
        assert_eq!(failed.account_id.as_str(), "acct3");
        assert!(failed.error.as_deref().unwrap().contains("insufficient capital"));
        assert_eq!(orders[0].broker_ref.as_deref(), Some("ref-acct0"));
    }

    #[tokio::test]
    async fn test_close_intent_uses_close_endpoint() {
        let mut mock = MockBrokerage::new();
        mock.expect_close_position()
            .withf(|_, symbol| symbol == "TLT")
            .times(1)
            .returning(|_, _| Ok("close-1".into()));
        mock.expect_place_order().never();

        let engine = ExecutionEngine::new(Arc::new(mock), Duration::from_secs(1));
        let ticket = OrderTicket::close(AccountId::from("a"), "TLT", OrderSide::Sell, dec!(4));
        let order = engine.execute(&ticket).await;
        assert!(order.is_accepted());
        assert_eq!(order.ticket_id, ticket.ticket_id);
    }

    struct SlowBroker;

    #[async_trait::async_trait]
    impl Brokerage for SlowBroker {
        async fn get_account(
            &self,
            _: &AccountId,
        ) -> crate::execution::broker::BrokerResult<crate::execution::broker::AccountSnapshot> {
            Err(BrokerError::Transport("unused".into()))
        }
        async fn get_positions(
            &self,
            _: &AccountId,
        ) -> crate::execution::broker::BrokerResult<Vec<crate::execution::broker::PositionSnapshot>> {
            Ok(Vec::new())
        }
        async fn place_order(&self, _: &AccountId, _: &OrderRequest) -> crate::execution::broker::BrokerResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
        async fn get_orders(
            &self,
            _: &AccountId,
        ) -> crate::execution::broker::BrokerResult<Vec<crate::execution::broker::BrokerOrder>> {
            Ok(Vec::new())
        }
        async fn close_position(&self, _: &AccountId, _: &str) -> crate::execution::broker::BrokerResult<String> {
            Ok("closed".into())
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_rejection() {
        let engine = ExecutionEngine::new(Arc::new(SlowBroker), Duration::from_millis(20));
        let orders = engine.execute_batch(tickets(2)).await;
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.status == OrderStatus::Rejected));
        assert!(orders[0].error.as_deref().unwrap().contains("timed out"));
    }
}
