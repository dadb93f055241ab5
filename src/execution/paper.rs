//! In-process paper brokerage for dry runs
//!
//! Market orders fill immediately at the last known price. Gross exposure is
//! capped at 1x equity; anything beyond is rejected as insufficient capital.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::{Signed, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::domain::{AccountId, OrderSide, OrderType};
use crate::error::BrokerError;
use crate::market::MarketSnapshot;

use super::broker::{AccountSnapshot, BrokerOrder, BrokerResult, Brokerage, OrderRequest, PositionSnapshot};

#[derive(Debug, Clone, Default)]
struct PaperPosition {
    qty: Decimal,
    avg_price: Decimal,
}

#[derive(Debug, Default)]
struct PaperAccount {
    cash: Decimal,
    positions: HashMap<String, PaperPosition>,
    orders: Vec<BrokerOrder>,
}

#[derive(Default)]
pub struct PaperBroker {
    accounts: Mutex<HashMap<AccountId, PaperAccount>>,
    prices: RwLock<HashMap<String, Decimal>>,
    next_order: AtomicU64,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_account(&self, account_id: AccountId, cash: Decimal) {
        self.accounts.lock().await.insert(
            account_id,
            PaperAccount {
                cash,
                ..PaperAccount::default()
            },
        );
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Mark every instrument at its last snapshot close
    pub async fn mark_to_snapshot(&self, snapshot: &MarketSnapshot) {
        let mut prices = self.prices.write().await;
        for (instrument, bars) in &snapshot.history {
            if let Some(bar) = bars.last() {
                prices.insert(instrument.as_str().to_string(), bar.close);
            }
        }
    }

    async fn price(&self, symbol: &str) -> BrokerResult<Decimal> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::Rejected(format!("no price for {}", symbol)))
    }

    fn order_id(&self) -> String {
        format!("paper-{}", self.next_order.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

fn equity(account: &PaperAccount, prices: &HashMap<String, Decimal>) -> Decimal {
    account.cash
        + account
            .positions
            .iter()
            .map(|(symbol, p)| p.qty * prices.get(symbol).copied().unwrap_or(p.avg_price))
            .sum::<Decimal>()
}

fn gross_exposure(account: &PaperAccount, prices: &HashMap<String, Decimal>) -> Decimal {
    account
        .positions
        .iter()
        .map(|(symbol, p)| (p.qty * prices.get(symbol).copied().unwrap_or(p.avg_price)).abs())
        .sum()
}

fn apply_fill(account: &mut PaperAccount, symbol: &str, signed_qty: Decimal, price: Decimal) {
    account.cash -= signed_qty * price;
    let position = account.positions.entry(symbol.to_string()).or_default();
    let new_qty = position.qty + signed_qty;

    if position.qty.is_zero() || (position.qty.is_sign_positive() != new_qty.is_sign_positive() && !new_qty.is_zero()) {
        position.avg_price = price;
    } else if position.qty.is_sign_positive() == signed_qty.is_sign_positive() {
        position.avg_price = (position.qty * position.avg_price + signed_qty * price) / new_qty;
    }
    position.qty = new_qty;

    if position.qty.is_zero() {
        account.positions.remove(symbol);
    }
}

#[async_trait]
impl Brokerage for PaperBroker {
    async fn get_account(&self, account_id: &AccountId) -> BrokerResult<AccountSnapshot> {
        let accounts = self.accounts.lock().await;
        let account = accounts
            .get(account_id)
            .ok_or_else(|| BrokerError::UnknownAccount(account_id.to_string()))?;
        let prices = self.prices.read().await;
        let equity = equity(account, &prices);
        Ok(AccountSnapshot {
            account_id: account_id.clone(),
            equity,
            cash: account.cash,
            buying_power: (equity - gross_exposure(account, &prices)).max(Decimal::ZERO),
        })
    }

    async fn get_positions(&self, account_id: &AccountId) -> BrokerResult<Vec<PositionSnapshot>> {
        let accounts = self.accounts.lock().await;
        let account = accounts
            .get(account_id)
            .ok_or_else(|| BrokerError::UnknownAccount(account_id.to_string()))?;
        let prices = self.prices.read().await;

        let mut positions: Vec<PositionSnapshot> = account
            .positions
            .iter()
            .map(|(symbol, p)| {
                let current = prices.get(symbol).copied().unwrap_or(p.avg_price);
                let plpc = if p.avg_price.is_zero() {
                    Decimal::ZERO
                } else {
                    (current - p.avg_price) / p.avg_price * p.qty.signum()
                };
                PositionSnapshot {
                    symbol: symbol.clone(),
                    qty: p.qty,
                    avg_entry_price: p.avg_price,
                    current_price: current,
                    unrealized_plpc: plpc.to_f64().unwrap_or(0.0),
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn place_order(&self, account_id: &AccountId, order: &OrderRequest) -> BrokerResult<String> {
        if order.qty <= Decimal::ZERO {
            return Err(BrokerError::Rejected(format!("qty must be positive, got {}", order.qty)));
        }
        let market = self.price(&order.symbol).await?;

        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| BrokerError::UnknownAccount(account_id.to_string()))?;
        let prices = self.prices.read().await;

        let signed_qty = match order.side {
            OrderSide::Buy => order.qty,
            OrderSide::Sell => -order.qty,
        };
        let fill_price = match (order.order_type, order.limit_price) {
            (OrderType::Limit, Some(limit)) => {
                let marketable = match order.side {
                    OrderSide::Buy => market <= limit,
                    OrderSide::Sell => market >= limit,
                };
                marketable.then_some(market)
            }
            _ => Some(market),
        };

        let id = self.order_id();
        let status = match fill_price {
            Some(price) => {
                let mut trial = PaperAccount {
                    cash: account.cash,
                    positions: account.positions.clone(),
                    orders: Vec::new(),
                };
                apply_fill(&mut trial, &order.symbol, signed_qty, price);
                let equity_now = equity(account, &prices);
                if gross_exposure(&trial, &prices) > equity_now {
                    return Err(BrokerError::InsufficientCapital(format!(
                        "{} {} {} exceeds equity {}",
                        order.side, order.qty, order.symbol, equity_now
                    )));
                }
                apply_fill(account, &order.symbol, signed_qty, price);
                "filled"
            }
            None => "new",
        };

        account.orders.push(BrokerOrder {
            id: id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
            status: status.to_string(),
            submitted_at: Some(Utc::now()),
        });
        info!(account = %account_id, order_id = %id, symbol = %order.symbol, side = %order.side, qty = %order.qty, status, "paper order");
        Ok(id)
    }

    async fn get_orders(&self, account_id: &AccountId) -> BrokerResult<Vec<BrokerOrder>> {
        let accounts = self.accounts.lock().await;
        let account = accounts
            .get(account_id)
            .ok_or_else(|| BrokerError::UnknownAccount(account_id.to_string()))?;
        Ok(account.orders.iter().rev().cloned().collect())
    }

    async fn close_position(&self, account_id: &AccountId, symbol: &str) -> BrokerResult<String> {
        let qty = {
            let accounts = self.accounts.lock().await;
            let account = accounts
                .get(account_id)
                .ok_or_else(|| BrokerError::UnknownAccount(account_id.to_string()))?;
            account
                .positions
                .get(symbol)
                .map(|p| p.qty)
                .ok_or_else(|| BrokerError::NoPosition(symbol.to_string()))?
        };

        let order = OrderRequest {
            symbol: symbol.to_string(),
            qty: qty.abs(),
            side: if qty > Decimal::ZERO { OrderSide::Sell } else { OrderSide::Buy },
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
        };
        self.place_order(account_id, &order).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy(symbol: &str, qty: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: symbol.into(),
            qty,
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
        }
    }

    async fn broker() -> (PaperBroker, AccountId) {
        let broker = PaperBroker::new();
        let id = AccountId::from("paper");
        broker.open_account(id.clone(), dec!(10000)).await;
        broker.set_price("SPY", dec!(500)).await;
        (broker, id)
    }

    #[tokio::test]
    async fn test_fill_and_pnl() {
        let (broker, id) = broker().await;
        broker.place_order(&id, &buy("SPY", dec!(10))).await.unwrap();
        broker.set_price("SPY", dec!(510)).await;

        let positions = broker.get_positions(&id).await.unwrap();
        assert_eq!(positions[0].qty, dec!(10));
        assert!((positions[0].unrealized_plpc - 0.02).abs() < 1e-9);

        let account = broker.get_account(&id).await.unwrap();
        assert_eq!(account.equity, dec!(10100));
    }

    #[tokio::test]
    async fn test_over_leverage_rejected() {
        let (broker, id) = broker().await;
        let err = broker.place_order(&id, &buy("SPY", dec!(21))).await.unwrap_err();
        assert!(matches!(err, BrokerError::InsufficientCapital(_)));
        assert!(broker.get_positions(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_position_flattens_shorts() {
        let (broker, id) = broker().await;
        let mut short = buy("SPY", dec!(5));
        short.side = OrderSide::Sell;
        broker.place_order(&id, &short).await.unwrap();
        broker.set_price("SPY", dec!(490)).await;
        let positions = broker.get_positions(&id).await.unwrap();
        assert_eq!(positions[0].qty, dec!(-5));
        assert!((positions[0].unrealized_plpc - 0.02).abs() < 1e-9);

        broker.close_position(&id, "SPY").await.unwrap();
        assert!(broker.get_positions(&id).await.unwrap().is_empty());
        assert_eq!(
            broker.close_position(&id, "SPY").await.unwrap_err(),
            BrokerError::NoPosition("SPY".into())
        );
        assert_eq!(broker.get_orders(&id).await.unwrap().len(), 2);
    }
}
