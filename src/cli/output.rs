//! Output formatting for `council` commands.
//!
//! Supports two modes: human-readable tables (default) and JSON (--json).

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::checkpoint::CheckpointRun;
use crate::domain::{CheckpointEvent, CouncilDecision, ExecutionOrder, ExecutionReport, Pitch, SkippedAccount};
use crate::execution::AccountSpec;
use crate::pipeline::{StageReport, StageStatus};

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                println!("{}", Table::new(items));
            }
        }
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(items)?),
    }
    Ok(())
}

/// Print a single Serialize item as pretty JSON in either mode.
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

#[derive(Debug, Serialize, Tabled)]
pub struct PitchRow {
    pub agent: String,
    pub origin: String,
    pub instrument: String,
    pub direction: String,
    pub conviction: String,
    pub risk: String,
    pub bullets: usize,
}

impl From<&Pitch> for PitchRow {
    fn from(pitch: &Pitch) -> Self {
        let c = &pitch.content;
        Self {
            agent: pitch.model_id.to_string(),
            origin: format!("{:?}", pitch.origin),
            instrument: c.instrument.to_string(),
            direction: c.direction.to_string(),
            conviction: format!("{:+.2}", c.conviction),
            risk: c.risk_profile.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
            bullets: c.thesis_bullets.len(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct OrderRow {
    pub account: String,
    pub instrument: String,
    pub side: String,
    pub qty: String,
    pub status: String,
    pub detail: String,
}

impl From<&ExecutionOrder> for OrderRow {
    fn from(order: &ExecutionOrder) -> Self {
        Self {
            account: order.account_id.to_string(),
            instrument: order.instrument.clone(),
            side: order.side.to_string(),
            qty: order.qty.to_string(),
            status: format!("{:?}", order.status).to_lowercase(),
            detail: order
                .broker_ref
                .clone()
                .or_else(|| order.error.clone())
                .unwrap_or_default(),
        }
    }
}

impl From<&SkippedAccount> for OrderRow {
    fn from(skipped: &SkippedAccount) -> Self {
        Self {
            account: skipped.account_id.to_string(),
            instrument: "-".into(),
            side: "-".into(),
            qty: "0".into(),
            status: "skipped".into(),
            detail: skipped.reason.clone(),
        }
    }
}

/// One row per account: orders first, then skips
pub fn report_rows(report: &ExecutionReport) -> Vec<OrderRow> {
    report
        .orders
        .iter()
        .map(OrderRow::from)
        .chain(report.skipped.iter().map(OrderRow::from))
        .collect()
}

#[derive(Debug, Serialize, Tabled)]
pub struct AccountRow {
    pub id: String,
    pub role: String,
    pub broker: String,
    pub base_url: String,
    pub credentials: String,
}

impl From<&AccountSpec> for AccountRow {
    fn from(spec: &AccountSpec) -> Self {
        Self {
            id: spec.id.to_string(),
            role: spec.role.to_string(),
            broker: format!("{:?}", spec.broker).to_lowercase(),
            base_url: spec.base_url.as_ref().map(|u| u.to_string()).unwrap_or_else(|| "-".into()),
            credentials: if spec.credentials.is_some() { "set" } else { "-" }.into(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct EventRow {
    pub account: String,
    pub action: String,
    pub prior: String,
    pub new: String,
    pub reasoning: String,
}

impl From<&CheckpointEvent> for EventRow {
    fn from(event: &CheckpointEvent) -> Self {
        Self {
            account: event.account_id.to_string(),
            action: event.action.to_string(),
            prior: format!("{:+.2}", event.prior_conviction),
            new: format!("{:+.2}", event.new_conviction),
            reasoning: event.reasoning.clone(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct StageRow {
    pub stage: String,
    pub status: String,
    pub elapsed_ms: u64,
}

impl From<&StageReport> for StageRow {
    fn from(report: &StageReport) -> Self {
        let status = match &report.status {
            StageStatus::Completed => "completed".to_string(),
            StageStatus::Degraded { missing } => format!("degraded (no {})", missing),
            StageStatus::Failed { error } => format!("failed: {}", error),
        };
        Self {
            stage: report.stage.to_string(),
            status,
            elapsed_ms: report.elapsed_ms,
        }
    }
}

pub fn print_decision(decision: &CouncilDecision, mode: OutputMode) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        return print_item(decision);
    }
    println!(
        "Decision: {} {} conviction {:+.2}{}",
        decision.direction,
        decision.instrument,
        decision.conviction,
        if decision.used_fallback { " (fallback)" } else { "" }
    );
    if let Some(model) = &decision.selected_model {
        println!("Selected: {}", model);
    }
    if let Some(exit) = &decision.exit_policy {
        println!(
            "Exit: stop {:.3} / take {:.3}",
            exit.stop_loss_pct, exit.take_profit_pct
        );
    }
    println!("Rationale: {}", decision.rationale);
    for line in &decision.dissent_summary {
        println!("  - {}", line);
    }
    Ok(())
}

pub fn print_checkpoint(run: &CheckpointRun, mode: OutputMode) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        return print_item(run);
    }
    println!("Checkpoint for cycle {} at {}", run.cycle_id, run.ran_at);
    print_items(&run.events.iter().map(EventRow::from).collect::<Vec<_>>(), mode)?;
    print_items(&report_rows(&run.report), mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, ExecutionTrigger, OrderSide, OrderTicket};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_output_mode_from_flag() {
        assert_eq!(OutputMode::from_json_flag(true), OutputMode::Json);
        assert_eq!(OutputMode::from_json_flag(false), OutputMode::Table);
    }

    #[test]
    fn test_report_rows_cover_orders_then_skips() {
        let ticket = OrderTicket::market(AccountId::from("gpt"), "SPY", OrderSide::Buy, dec!(10));
        let mut report = ExecutionReport::new(Uuid::new_v4(), ExecutionTrigger::Weekly);
        report.orders.push(ExecutionOrder::accepted(&ticket, "paper-1".into(), 3));
        report.orders.push(ExecutionOrder::rejected(&ticket, "market closed", 2));
        report.skipped.push(SkippedAccount {
            account_id: AccountId::from("claude"),
            reason: "flat with no open positions".into(),
        });

        let rows = report_rows(&report);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, "accepted");
        assert_eq!(rows[0].detail, "paper-1");
        assert_eq!(rows[1].status, "rejected");
        assert_eq!(rows[1].detail, "market closed");
        assert_eq!(rows[2].status, "skipped");
        assert_eq!(rows[2].account, "claude");
    }
}
