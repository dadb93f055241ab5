//! Alpaca REST brokerage
//!
//! One client per account; each carries that account's key pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::domain::{AccountId, OrderSide, OrderType};
use crate::error::BrokerError;

use super::accounts::Credentials;
use super::broker::{AccountSnapshot, BrokerOrder, BrokerResult, Brokerage, OrderRequest, PositionSnapshot};

pub const PAPER_URL: &str = "https://paper-api.alpaca.markets";

#[derive(Debug, Serialize)]
struct AlpacaOrderRequest {
    symbol: String,
    qty: String,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_loss: Option<StopLoss>,
}

#[derive(Debug, Serialize)]
struct StopLoss {
    stop_price: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    symbol: String,
    side: String,
    #[serde(default)]
    qty: Option<String>,
    status: String,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: String,
    side: String,
    avg_entry_price: String,
    current_price: String,
    unrealized_plpc: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    equity: String,
    cash: String,
    buying_power: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaErrorBody {
    #[serde(default)]
    message: String,
}

fn decimal(field: &str, raw: &str) -> BrokerResult<Decimal> {
    Decimal::from_str(raw).map_err(|e| BrokerError::Transport(format!("bad {} '{}': {}", field, raw, e)))
}

pub struct AlpacaBroker {
    credentials: Credentials,
    base_url: String,
    client: Client,
}

impl AlpacaBroker {
    pub fn new(credentials: Credentials, base_url: Option<&str>, timeout: Duration) -> BrokerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            credentials,
            base_url: base_url.unwrap_or(PAPER_URL).trim_end_matches('/').to_string(),
            client,
        })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", self.credentials.key_id())
            .header("APCA-API-SECRET-KEY", self.credentials.secret())
    }

    async fn send(&self, builder: RequestBuilder) -> BrokerResult<Response> {
        let response = self.authed(builder).send().await.map_err(|e| {
            if e.is_timeout() {
                BrokerError::Timeout { elapsed_ms: 0 }
            } else {
                BrokerError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<AlpacaErrorBody>(&body)
            .map(|b| b.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(body);
        Err(classify(status, message))
    }
}

fn classify(status: StatusCode, message: String) -> BrokerError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("insufficient") {
        BrokerError::InsufficientCapital(message)
    } else if lower.contains("market is closed") || lower.contains("market closed") {
        BrokerError::MarketClosed
    } else if status == StatusCode::NOT_FOUND && lower.contains("position") {
        BrokerError::NoPosition(message)
    } else if status.is_server_error() {
        BrokerError::Transport(format!("{}: {}", status, message))
    } else {
        BrokerError::Rejected(format!("{}: {}", status, message))
    }
}

#[async_trait]
impl Brokerage for AlpacaBroker {
    async fn get_account(&self, account_id: &AccountId) -> BrokerResult<AccountSnapshot> {
        let response = self.send(self.client.get(format!("{}/v2/account", self.base_url))).await?;
        let account: AlpacaAccount = response
            .json()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        Ok(AccountSnapshot {
            account_id: account_id.clone(),
            equity: decimal("equity", &account.equity)?,
            cash: decimal("cash", &account.cash)?,
            buying_power: decimal("buying_power", &account.buying_power)?,
        })
    }

    async fn get_positions(&self, _account_id: &AccountId) -> BrokerResult<Vec<PositionSnapshot>> {
        let response = self.send(self.client.get(format!("{}/v2/positions", self.base_url))).await?;
        let positions: Vec<AlpacaPosition> = response
            .json()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        positions
            .into_iter()
            .map(|p| {
                let mut qty = decimal("qty", &p.qty)?;
                if p.side.eq_ignore_ascii_case("short") && qty > Decimal::ZERO {
                    qty = -qty;
                }
                Ok(PositionSnapshot {
                    qty,
                    avg_entry_price: decimal("avg_entry_price", &p.avg_entry_price)?,
                    current_price: decimal("current_price", &p.current_price)?,
                    unrealized_plpc: p.unrealized_plpc.parse::<f64>().map_err(|e| {
                        BrokerError::Transport(format!("bad unrealized_plpc '{}': {}", p.unrealized_plpc, e))
                    })?,
                    symbol: p.symbol,
                })
            })
            .collect()
    }

    async fn place_order(&self, account_id: &AccountId, order: &OrderRequest) -> BrokerResult<String> {
        let request = AlpacaOrderRequest {
            symbol: order.symbol.clone(),
            qty: order.qty.abs().to_string(),
            side: match order.side {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            },
            order_type: match order.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
            },
            time_in_force: "day",
            limit_price: order.limit_price.map(|p| p.to_string()),
            order_class: order.stop_price.map(|_| "oto"),
            stop_loss: order.stop_price.map(|p| StopLoss {
                stop_price: p.round_dp(2).to_string(),
            }),
        };

        debug!(account = %account_id, symbol = %request.symbol, side = request.side, qty = %request.qty, "submitting order");
        let response = self
            .send(self.client.post(format!("{}/v2/orders", self.base_url)).json(&request))
            .await?;
        let placed: AlpacaOrder = response
            .json()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        Ok(placed.id)
    }

    async fn get_orders(&self, _account_id: &AccountId) -> BrokerResult<Vec<BrokerOrder>> {
        let response = self
            .send(self.client.get(format!("{}/v2/orders?status=all&limit=50", self.base_url)))
            .await?;
        let orders: Vec<AlpacaOrder> = response
            .json()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        orders
            .into_iter()
            .map(|o| {
                Ok(BrokerOrder {
                    side: if o.side.eq_ignore_ascii_case("sell") {
                        OrderSide::Sell
                    } else {
                        OrderSide::Buy
                    },
                    qty: o.qty.as_deref().map(|q| decimal("qty", q)).transpose()?.unwrap_or_default(),
                    id: o.id,
                    symbol: o.symbol,
                    status: o.status,
                    submitted_at: o.submitted_at,
                })
            })
            .collect()
    }

    async fn close_position(&self, _account_id: &AccountId, symbol: &str) -> BrokerResult<String> {
        let response = self
            .send(self.client.delete(format!("{}/v2/positions/{}", self.base_url, symbol)))
            .await?;
        let order: AlpacaOrder = response
            .json()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        Ok(order.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(
            classify(StatusCode::FORBIDDEN, "insufficient buying power".into()),
            BrokerError::InsufficientCapital("insufficient buying power".into())
        );
        assert_eq!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, "market is closed".into()),
            BrokerError::MarketClosed
        );
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, "position does not exist".into()),
            BrokerError::NoPosition(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, "upstream".into()),
            BrokerError::Transport(_)
        ));
    }

    #[test]
    fn test_order_request_shape() {
        let request = AlpacaOrderRequest {
            symbol: "SPY".into(),
            qty: "10".into(),
            side: "buy",
            order_type: "market",
            time_in_force: "day",
            limit_price: None,
            order_class: Some("oto"),
            stop_loss: Some(StopLoss {
                stop_price: "499.40".into(),
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "market");
        assert_eq!(json["order_class"], "oto");
        assert_eq!(json["stop_loss"]["stop_price"], "499.40");
        assert!(json.get("limit_price").is_none());
    }
}
