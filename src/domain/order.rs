use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AccountId;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Terminal order status. There is no "pending": a ticket that never hears
/// back from the broker is rejected with a timeout error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Accepted,
    Rejected,
}

/// What the ticket does to the position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketIntent {
    /// Open or resize toward a target
    Adjust,
    /// Flatten the whole position via the broker's close endpoint
    Close,
}

/// One order to place on one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub ticket_id: Uuid,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub intent: TicketIntent,
}

impl OrderTicket {
    pub fn market(account_id: AccountId, symbol: impl Into<String>, side: OrderSide, qty: Decimal) -> Self {
        Self {
            ticket_id: Uuid::new_v4(),
            account_id,
            symbol: symbol.into(),
            side,
            qty,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            intent: TicketIntent::Adjust,
        }
    }

    pub fn close(account_id: AccountId, symbol: impl Into<String>, side: OrderSide, qty: Decimal) -> Self {
        Self {
            intent: TicketIntent::Close,
            ..Self::market(account_id, symbol, side, qty)
        }
    }

    pub fn with_limit(mut self, limit_price: Decimal) -> Self {
        self.order_type = OrderType::Limit;
        self.limit_price = Some(limit_price);
        self
    }

    pub fn with_stop(mut self, stop_price: Decimal) -> Self {
        self.stop_price = Some(stop_price);
        self
    }
}

/// Outcome of one ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOrder {
    pub ticket_id: Uuid,
    pub account_id: AccountId,
    pub instrument: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub broker_ref: Option<String>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ExecutionOrder {
    pub fn accepted(ticket: &OrderTicket, broker_ref: String, elapsed_ms: u64) -> Self {
        Self::from_ticket(ticket, OrderStatus::Accepted, Some(broker_ref), None, elapsed_ms)
    }

    pub fn rejected(ticket: &OrderTicket, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::from_ticket(ticket, OrderStatus::Rejected, None, Some(error.into()), elapsed_ms)
    }

    /// The account could not be read, so no ticket was sized
    pub fn lookup_failed(account_id: AccountId, symbol: impl Into<String>, error: impl Into<String>) -> Self {
        let ticket = OrderTicket::market(account_id, symbol, OrderSide::Buy, Decimal::ZERO);
        Self::rejected(&ticket, error, 0)
    }

    fn from_ticket(
        ticket: &OrderTicket,
        status: OrderStatus,
        broker_ref: Option<String>,
        error: Option<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            account_id: ticket.account_id.clone(),
            instrument: ticket.symbol.clone(),
            side: ticket.side,
            qty: ticket.qty,
            order_type: ticket.order_type,
            status,
            broker_ref,
            error,
            completed_at: Utc::now(),
            elapsed_ms,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == OrderStatus::Accepted
    }
}

/// An account that needed no order, with the reason why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedAccount {
    pub account_id: AccountId,
    pub reason: String,
}

/// What triggered a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTrigger {
    Weekly,
    Checkpoint,
}

/// Per-account outcome of one execution batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub cycle_id: Uuid,
    pub trigger: ExecutionTrigger,
    pub orders: Vec<ExecutionOrder>,
    pub skipped: Vec<SkippedAccount>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn new(cycle_id: Uuid, trigger: ExecutionTrigger) -> Self {
        Self {
            cycle_id,
            trigger,
            orders: Vec::new(),
            skipped: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn accepted_count(&self) -> usize {
        self.orders.iter().filter(|o| o.is_accepted()).count()
    }

    pub fn rejected_count(&self) -> usize {
        self.orders.len() - self.accepted_count()
    }
}
