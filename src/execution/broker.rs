use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{AccountId, OrderSide, OrderTicket, OrderType};
use crate::error::BrokerError;

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
}

/// Open position. `qty` is signed: negative for shorts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,
    /// Unrealized P&L as a fraction of cost basis
    pub unrealized_plpc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: Decimal,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

impl From<&OrderTicket> for OrderRequest {
    fn from(ticket: &OrderTicket) -> Self {
        Self {
            symbol: ticket.symbol.clone(),
            qty: ticket.qty,
            side: ticket.side,
            order_type: ticket.order_type,
            limit_price: ticket.limit_price,
            stop_price: ticket.stop_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub status: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// High-level brokerage operations, addressed per account
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Brokerage: Send + Sync {
    async fn get_account(&self, account_id: &AccountId) -> BrokerResult<AccountSnapshot>;

    async fn get_positions(&self, account_id: &AccountId) -> BrokerResult<Vec<PositionSnapshot>>;

    /// Returns the broker's order reference
    async fn place_order(&self, account_id: &AccountId, order: &OrderRequest) -> BrokerResult<String>;

    async fn get_orders(&self, account_id: &AccountId) -> BrokerResult<Vec<BrokerOrder>>;

    /// Flatten the whole position in `symbol`; returns the closing order's reference
    async fn close_position(&self, account_id: &AccountId, symbol: &str) -> BrokerResult<String>;
}

/// Routes each call to the brokerage that owns the account
#[derive(Default, Clone)]
pub struct BrokerRouter {
    routes: HashMap<AccountId, Arc<dyn Brokerage>>,
}

impl BrokerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, account_id: AccountId, broker: Arc<dyn Brokerage>) -> Self {
        self.routes.insert(account_id, broker);
        self
    }

    fn broker(&self, account_id: &AccountId) -> BrokerResult<&Arc<dyn Brokerage>> {
        self.routes
            .get(account_id)
            .ok_or_else(|| BrokerError::UnknownAccount(account_id.to_string()))
    }
}

#[async_trait]
impl Brokerage for BrokerRouter {
    async fn get_account(&self, account_id: &AccountId) -> BrokerResult<AccountSnapshot> {
        self.broker(account_id)?.get_account(account_id).await
    }

    async fn get_positions(&self, account_id: &AccountId) -> BrokerResult<Vec<PositionSnapshot>> {
        self.broker(account_id)?.get_positions(account_id).await
    }

    async fn place_order(&self, account_id: &AccountId, order: &OrderRequest) -> BrokerResult<String> {
        self.broker(account_id)?.place_order(account_id, order).await
    }

    async fn get_orders(&self, account_id: &AccountId) -> BrokerResult<Vec<BrokerOrder>> {
        self.broker(account_id)?.get_orders(account_id).await
    }

    async fn close_position(&self, account_id: &AccountId, symbol: &str) -> BrokerResult<String> {
        self.broker(account_id)?.close_position(account_id, symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_router_dispatches_by_account() {
        let mut mock = MockBrokerage::new();
        mock.expect_close_position()
            .withf(|account, symbol| account.as_str() == "a" && symbol == "SPY")
            .times(1)
            .returning(|_, _| Ok("close-1".to_string()));

        let router = BrokerRouter::new().route(AccountId::from("a"), Arc::new(mock));
        assert_eq!(
            router.close_position(&AccountId::from("a"), "SPY").await.unwrap(),
            "close-1"
        );
        assert_eq!(
            router.get_orders(&AccountId::from("b")).await.unwrap_err(),
            BrokerError::UnknownAccount("b".into())
        );
    }
}
