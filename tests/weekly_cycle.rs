mod support;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use council::council::FALLBACK_MARKER;
use council::domain::{AccountId, AgentId, Direction, Instrument, OrderSide, PitchOrigin};
use council::execution::Brokerage;
use council::pipeline::StageStatus;
use support::{base_pitch, chairman_reply, harness, pitch_reply, research, review_reply, snapshot, ScriptedClient, Step};

fn scripted_council() -> ScriptedClient {
    ScriptedClient::new()
        // Clean on the first try
        .reply("gpt", Step::Pitch, base_pitch("SPY", 1.5))
        // Indicator vocabulary twice: FLAT after exactly one retry
        .reply("claude", Step::Pitch, pitch_reply("QQQ", 1.0, 0.015, 0.025, "GROWTH: RSI shows momentum"))
        .reply("claude", Step::Pitch, pitch_reply("QQQ", 1.0, 0.015, 0.025, "GROWTH: RSI still rising"))
        // Custom stop, then the canonical BASE pair
        .reply("gemini", Step::Pitch, pitch_reply("TLT", 1.0, 0.02, 0.025, "INFLATION: Prices cooling"))
        .reply("gemini", Step::Pitch, base_pitch("TLT", 1.0))
        .reply("gpt", Step::Review, review_reply(7))
        .reply("claude", Step::Review, review_reply(6))
        .reply("gemini", Step::Review, review_reply(8))
        .reply("chairman", Step::Chairman, chairman_reply("gpt", "SPY", 1.0, &["claude", "gemini"]))
}

#[tokio::test]
async fn weekly_cycle_trades_every_account() {
    let h = harness(&["gpt", "claude", "gemini"], scripted_council()).await;
    let snap = snapshot(Utc::now() - Duration::hours(1));

    let cycle = h.service.run_weekly_cycle(research(), Some(snap)).await.unwrap();

    assert!(cycle
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Completed));

    // Pitch outcomes
    assert_eq!(cycle.pitches.len(), 3);
    let by_model = |id: &str| {
        cycle
            .pitches
            .iter()
            .find(|p| p.model_id == AgentId::from(id))
            .unwrap()
            .clone()
    };
    assert_eq!(by_model("gpt").origin, PitchOrigin::FirstPass);
    let claude = by_model("claude");
    assert_eq!(claude.origin, PitchOrigin::ComplianceFallback);
    assert!(claude.content.is_flat());
    assert_eq!(h.client.calls("claude", Step::Pitch), 2);
    let gemini = by_model("gemini");
    assert_eq!(gemini.origin, PitchOrigin::Corrected);
    assert_eq!(gemini.content.instrument, Instrument::Tlt);
    assert_eq!(h.client.calls("gemini", Step::Pitch), 2);

    // Chairman
    let decision = &cycle.decision;
    assert!(!decision.used_fallback);
    assert_eq!(decision.selected_model, Some(AgentId::from("gpt")));
    assert_eq!(decision.instrument, Instrument::Spy);
    assert_eq!(decision.direction, Direction::Long);
    assert_eq!(decision.conviction, 1.0);
    // Risk parameters come from the selected pitch
    assert_eq!(decision.exit_policy, by_model("gpt").content.exit_policy);

    // Every account shows up exactly once
    let report = &cycle.report;
    let mut accounts: Vec<String> = report
        .orders
        .iter()
        .map(|o| o.account_id.to_string())
        .chain(report.skipped.iter().map(|s| s.account_id.to_string()))
        .collect();
    accounts.sort();
    assert_eq!(accounts, vec!["claude", "council", "gemini", "gpt"]);
    assert!(report.orders.iter().all(|o| o.is_accepted()));
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].account_id, AccountId::from("claude"));

    // 10% of 100k at 507, 17.5% of 100k at 507, 10% of 100k at 89
    let council = h.paper.get_positions(&AccountId::from("council")).await.unwrap();
    assert_eq!(council.len(), 1);
    assert_eq!(council[0].symbol, "SPY");
    assert_eq!(council[0].qty, dec!(19));
    let gpt = h.paper.get_positions(&AccountId::from("gpt")).await.unwrap();
    assert_eq!(gpt[0].qty, dec!(34));
    let tlt = h.paper.get_positions(&AccountId::from("gemini")).await.unwrap();
    assert_eq!(tlt[0].symbol, "TLT");
    assert_eq!(tlt[0].qty, dec!(112));
    assert!(report
        .orders
        .iter()
        .all(|o| o.side == OrderSide::Buy));
}

#[tokio::test]
async fn weekly_cycle_state_is_queryable_afterwards() {
    let h = harness(&["gpt", "claude", "gemini"], scripted_council()).await;
    let cycle = h
        .service
        .run_weekly_cycle(research(), Some(snapshot(Utc::now() - Duration::hours(1))))
        .await
        .unwrap();

    let pitches = h.service.current_pitches().await.unwrap();
    let order: Vec<String> = pitches.iter().map(|p| p.model_id.to_string()).collect();
    assert_eq!(order, vec!["gpt", "claude", "gemini"]);

    let decision = h.service.current_decision().await.unwrap().unwrap();
    assert_eq!(decision.cycle_id, cycle.cycle_id);
    assert_eq!(decision.instrument, Instrument::Spy);

    let report = h.service.latest_execution_report().await.unwrap().unwrap();
    assert_eq!(report.cycle_id, cycle.cycle_id);
    assert_eq!(report.orders.len(), cycle.report.orders.len());
}

#[tokio::test]
async fn silent_reviewers_and_chairman_fall_back_deterministically() {
    let script = || {
        ScriptedClient::new()
            .reply("gpt", Step::Pitch, base_pitch("SPY", 1.5))
            .reply("claude", Step::Pitch, base_pitch("QQQ", -1.0))
            .reply("gemini", Step::Pitch, base_pitch("TLT", 1.0))
    };

    let mut decisions = Vec::new();
    for _ in 0..2 {
        let h = harness(&["gpt", "claude", "gemini"], script()).await;
        let cycle = h
            .service
            .run_weekly_cycle(research(), Some(snapshot(Utc::now() - Duration::hours(1))))
            .await
            .unwrap();

        // No reviewer answered; the round still completes, empty
        assert!(cycle
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Completed));
        assert_eq!(h.client.calls("chairman", Step::Chairman), 1);
        decisions.push(cycle.decision);
    }

    for decision in &decisions {
        assert!(decision.used_fallback);
        // 1.5 x neutral 5.0 beats 1.0 x 5.0 twice
        assert_eq!(decision.selected_model, Some(AgentId::from("gpt")));
        assert_eq!(decision.instrument, Instrument::Spy);
        assert!((decision.conviction - 1.2).abs() < 1e-9);
        assert!(decision.dissent_summary[0].starts_with(FALLBACK_MARKER));
        assert!(decision.dissent_summary.iter().any(|l| l.contains("claude")));
        assert!(decision.dissent_summary.iter().any(|l| l.contains("gemini")));
    }
    assert_eq!(decisions[0].conviction, decisions[1].conviction);
    assert_eq!(decisions[0].rationale, decisions[1].rationale);
}

#[tokio::test]
async fn chairman_raising_conviction_is_overruled() {
    let client = ScriptedClient::new()
        .reply("gpt", Step::Pitch, base_pitch("SPY", 1.0))
        .reply("claude", Step::Pitch, base_pitch("TLT", 0.5))
        .reply("chairman", Step::Chairman, chairman_reply("gpt", "SPY", 2.0, &["claude"]));
    let h = harness(&["gpt", "claude"], client).await;

    let cycle = h
        .service
        .run_weekly_cycle(research(), Some(snapshot(Utc::now() - Duration::hours(1))))
        .await
        .unwrap();

    assert!(cycle.decision.used_fallback);
    assert_eq!(cycle.decision.instrument, Instrument::Spy);
    assert!(cycle.decision.conviction <= 1.0);
}

#[tokio::test]
async fn no_valid_pitches_leaves_council_flat() {
    let client = ScriptedClient::new()
        .reply("gpt", Step::Pitch, "I would rather not say")
        .reply("claude", Step::Pitch, base_pitch("BTC", 1.0));
    let h = harness(&["gpt", "claude"], client).await;

    let cycle = h
        .service
        .run_weekly_cycle(research(), Some(snapshot(Utc::now() - Duration::hours(1))))
        .await
        .unwrap();

    assert!(cycle.pitches.is_empty());
    // Unparsable and out-of-universe replies are dropped without a retry
    assert_eq!(h.client.calls("gpt", Step::Pitch), 1);
    assert_eq!(h.client.calls("claude", Step::Pitch), 1);
    assert!(cycle.decision.is_flat());
    assert_eq!(cycle.decision.conviction, 0.0);
    assert_eq!(h.client.calls("chairman", Step::Chairman), 0);
    // Nothing to trade anywhere, but every account is still accounted for
    assert!(cycle.report.orders.is_empty());
    assert_eq!(cycle.report.skipped.len(), 3);
}
