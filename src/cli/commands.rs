//! Command handlers. Each one drives the service and prints its result.

use chrono::Utc;

use crate::council::PitchReportSummary;
use crate::domain::AgentId;
use crate::market::{MarketSnapshot, ResearchPacket};
use crate::service::CouncilService;

use super::output::{self, AccountRow, OutputMode, PitchRow, StageRow};
use super::ShowCommands;

fn load_snapshot(path: Option<&str>) -> anyhow::Result<Option<MarketSnapshot>> {
    path.map(MarketSnapshot::load).transpose().map_err(Into::into)
}

pub async fn weekly(
    service: &CouncilService,
    research: &str,
    snapshot: Option<&str>,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let research = ResearchPacket::load(research)?;
    let snapshot = load_snapshot(snapshot)?;

    let cycle = service.run_weekly_cycle(research, snapshot).await?;
    if mode == OutputMode::Json {
        return output::print_item(&cycle);
    }

    println!("Cycle {}", cycle.cycle_id);
    output::print_items(&cycle.stages.iter().map(StageRow::from).collect::<Vec<_>>(), mode)?;
    output::print_items(&cycle.pitches.iter().map(PitchRow::from).collect::<Vec<_>>(), mode)?;
    output::print_decision(&cycle.decision, mode)?;
    output::print_items(&output::report_rows(&cycle.report), mode)
}

pub async fn pitch(
    service: &CouncilService,
    agent: &str,
    research: &str,
    snapshot: Option<&str>,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let agent_id = AgentId::new(agent);
    let research = ResearchPacket::load(research)?;
    let snapshot = load_snapshot(snapshot)?;

    let report = service
        .regenerate_pitch(&agent_id, &research, snapshot.as_ref())
        .await?;
    if mode == OutputMode::Json {
        return output::print_item(&PitchReportSummary::from(&report));
    }

    println!(
        "{}: {} after {} attempt(s)",
        report.model_id,
        report.outcome.label(),
        report.attempts
    );
    for violation in &report.violations {
        println!("  ! {}", violation);
    }
    let rows: Vec<PitchRow> = report.outcome.pitch().map(PitchRow::from).into_iter().collect();
    output::print_items(&rows, mode)
}

pub async fn checkpoint(service: &CouncilService, force: bool, mode: OutputMode) -> anyhow::Result<()> {
    let now = Utc::now();
    match service.run_checkpoint(now, force).await? {
        Some(run) => output::print_checkpoint(&run, mode),
        None => {
            println!(
                "Not a checkpoint time. Next checkpoint: {} (use --force to run anyway)",
                service.schedule().next_after(now)
            );
            Ok(())
        }
    }
}

pub async fn show(service: &CouncilService, cmd: &ShowCommands, mode: OutputMode) -> anyhow::Result<()> {
    match cmd {
        ShowCommands::Pitches => {
            let pitches = service.current_pitches().await?;
            output::print_items(&pitches.iter().map(PitchRow::from).collect::<Vec<_>>(), mode)
        }
        ShowCommands::Decision => match service.current_decision().await? {
            Some(decision) => output::print_decision(&decision, mode),
            None => {
                println!("(no decision yet)");
                Ok(())
            }
        },
        ShowCommands::Report => match service.latest_execution_report().await? {
            Some(report) => {
                if mode == OutputMode::Json {
                    return output::print_item(&report);
                }
                println!("{:?} execution for cycle {}", report.trigger, report.cycle_id);
                output::print_items(&output::report_rows(&report), mode)
            }
            None => {
                println!("(no execution report yet)");
                Ok(())
            }
        },
    }
}

pub fn accounts(service: &CouncilService, mode: OutputMode) -> anyhow::Result<()> {
    let rows: Vec<AccountRow> = service.accounts().iter().map(AccountRow::from).collect();
    if service.is_dry_run() && mode == OutputMode::Table {
        println!("Dry run: every account trades on the paper broker");
    }
    output::print_items(&rows, mode)
}

pub fn schedule(service: &CouncilService, mode: OutputMode) -> anyhow::Result<()> {
    let schedule = service.schedule();
    let next = schedule.next_after(Utc::now());
    let times: Vec<String> = schedule.times().iter().map(|t| t.format("%H:%M").to_string()).collect();
    if mode == OutputMode::Json {
        return output::print_item(&serde_json::json!({ "times": times, "next": next }));
    }
    println!("Checkpoints: {}", times.join(", "));
    println!("Next: {}", next);
    Ok(())
}
