//! Shared fixtures: a scripted model client, a broken brokerage and a small
//! paper-trading council.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use config::{Config, File, FileFormat};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use council::agent::prompts::{chairman_system_prompt, pitch_system_prompt, review_system_prompt};
use council::agent::{AgentQuery, ModelClient};
use council::config::AppConfig;
use council::domain::{AccountId, Instrument};
use council::error::{AgentError, BrokerError};
use council::execution::{
    AccountRegistry, AccountSnapshot, BrokerOrder, BrokerResult, Brokerage, OrderRequest, PaperBroker,
    PositionSnapshot,
};
use council::market::{Bar, MarketSnapshot, ResearchPacket};
use council::persistence::MemoryStore;
use council::service::CouncilService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Pitch,
    Review,
    Chairman,
}

/// Replays queued replies per (agent, step). An empty queue is a transport failure.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<HashMap<(String, Step), VecDeque<Result<String, AgentError>>>>,
    calls: Mutex<Vec<(String, Step)>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, agent: &str, step: Step, text: impl Into<String>) -> Self {
        self.push(agent, step, Ok(text.into()));
        self
    }

    pub fn fail(self, agent: &str, step: Step, error: AgentError) -> Self {
        self.push(agent, step, Err(error));
        self
    }

    fn push(&self, agent: &str, step: Step, reply: Result<String, AgentError>) {
        self.replies
            .lock()
            .unwrap()
            .entry((agent.to_string(), step))
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self, agent: &str, step: Step) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, s)| a == agent && *s == step)
            .count()
    }

    fn step_of(query: &AgentQuery) -> Step {
        if query.system_prompt == pitch_system_prompt() {
            Step::Pitch
        } else if query.system_prompt == review_system_prompt() {
            Step::Review
        } else if query.system_prompt == chairman_system_prompt() {
            Step::Chairman
        } else {
            panic!("unexpected system prompt for {}", query.agent_id)
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn query(&self, query: &AgentQuery) -> Result<String, AgentError> {
        let step = Self::step_of(query);
        let agent = query.agent_id.to_string();
        self.calls.lock().unwrap().push((agent.clone(), step));
        self.replies
            .lock()
            .unwrap()
            .get_mut(&(agent, step))
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(AgentError::Transport("no scripted reply".into())))
    }
}

/// Every call fails; used to isolate one account
pub struct BrokenBroker;

#[async_trait]
impl Brokerage for BrokenBroker {
    async fn get_account(&self, _account_id: &AccountId) -> BrokerResult<AccountSnapshot> {
        Err(BrokerError::Transport("connection reset".into()))
    }

    async fn get_positions(&self, _account_id: &AccountId) -> BrokerResult<Vec<PositionSnapshot>> {
        Err(BrokerError::Transport("connection reset".into()))
    }

    async fn place_order(&self, _account_id: &AccountId, _order: &OrderRequest) -> BrokerResult<String> {
        Err(BrokerError::Transport("connection reset".into()))
    }

    async fn get_orders(&self, _account_id: &AccountId) -> BrokerResult<Vec<BrokerOrder>> {
        Err(BrokerError::Transport("connection reset".into()))
    }

    async fn close_position(&self, _account_id: &AccountId, _symbol: &str) -> BrokerResult<String> {
        Err(BrokerError::Transport("connection reset".into()))
    }
}

const BASE_CONFIG: &str = r#"
[llm]
base_url = "http://localhost:9/v1/chat/completions"
pitch_timeout_secs = 2
review_timeout_secs = 2
chairman_timeout_secs = 2

[chairman]
id = "chairman"
model = "test/chairman"

[checkpoint]
times = ["10:00", "11:30", "13:30", "15:30"]
utc_offset_minutes = -300
conviction_step = 0.5

[dry_run]
enabled = true
"#;

/// Dry-run config with one council account plus one account per agent
pub fn config_for(agents: &[&str]) -> AppConfig {
    let mut toml = String::from(BASE_CONFIG);
    for id in agents {
        toml.push_str(&format!("\n[[agents]]\nid = \"{id}\"\nmodel = \"test/{id}\"\n"));
    }
    toml.push_str("\n[[accounts]]\nid = \"council\"\nrole = \"council\"\nbroker = \"paper\"\n");
    for id in agents {
        toml.push_str(&format!("\n[[accounts]]\nid = \"{id}\"\nrole = \"agent:{id}\"\nbroker = \"paper\"\n"));
    }

    Config::builder()
        .add_source(File::from_str(&toml, FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}

pub fn registry(config: &AppConfig) -> AccountRegistry {
    AccountRegistry::from_config(&config.accounts, &config.agents, true, |_| None).unwrap()
}

/// Paper-trading council over an in-memory store
pub struct Harness {
    pub service: CouncilService,
    pub client: Arc<ScriptedClient>,
    pub paper: Arc<PaperBroker>,
    pub store: Arc<MemoryStore>,
}

pub async fn harness(agents: &[&str], client: ScriptedClient) -> Harness {
    let config = config_for(agents);
    let registry = registry(&config);
    let paper = Arc::new(PaperBroker::new());
    for spec in registry.iter() {
        paper.open_account(spec.id.clone(), spec.paper_equity).await;
    }
    let client = Arc::new(client);
    let store = Arc::new(MemoryStore::default());

    let service = CouncilService::new(
        config,
        client.clone(),
        store.clone(),
        paper.clone(),
        Some(paper.clone()),
        registry,
    )
    .unwrap()
    .with_label_seed(7);

    Harness {
        service,
        client,
        paper,
        store,
    }
}

pub fn bars(closes: &[Decimal]) -> Vec<Bar> {
    let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| Bar {
            date: start + ChronoDuration::days(i as i64),
            open: *close,
            high: *close + dec!(1),
            low: *close - dec!(1),
            close: *close,
            volume: 1_000,
        })
        .collect()
}

/// SPY closing at 507 (week range 501-508), TLT at 89 (88-92)
pub fn snapshot(as_of: DateTime<Utc>) -> MarketSnapshot {
    let mut history = BTreeMap::new();
    history.insert(
        Instrument::Spy,
        bars(&[dec!(500), dec!(502), dec!(504), dec!(503), dec!(505), dec!(507)]),
    );
    history.insert(Instrument::Tlt, bars(&[dec!(90), dec!(91), dec!(89)]));
    MarketSnapshot {
        as_of,
        history,
        buying_power: BTreeMap::new(),
    }
}

pub fn research() -> ResearchPacket {
    ResearchPacket {
        as_of: Utc::now(),
        body: "Inflation cooling, Fed on hold, credit spreads tight.".into(),
    }
}

pub fn pitch_reply(instrument: &str, conviction: f64, stop: f64, take: f64, bullet: &str) -> String {
    let direction = if conviction > 0.0 { "LONG" } else { "SHORT" };
    json!({
        "instrument": instrument,
        "direction": direction,
        "conviction": conviction,
        "risk_profile": "BASE",
        "thesis_bullets": [bullet],
        "entry_policy": {"mode": "MOO"},
        "exit_policy": {"stop_loss_pct": stop, "take_profit_pct": take}
    })
    .to_string()
}

pub fn base_pitch(instrument: &str, conviction: f64) -> String {
    pitch_reply(instrument, conviction, 0.015, 0.025, "POLICY: Fed on hold through the quarter")
}

/// Scores every label a reviewer might see; unseen and own labels are dropped
pub fn review_reply(score: u8) -> String {
    let scores = json!({
        "thesis_clarity": score,
        "evidence_quality": score,
        "catalyst_timing": score,
        "risk_definition": score,
        "invalidation_clarity": score,
        "sizing_discipline": score,
        "macro_coherence": score
    });
    let reviews: Vec<_> = ["A", "B", "C", "D", "E"]
        .iter()
        .map(|label| {
            json!({
                "pitch_label": label,
                "scores": scores,
                "counter_argument": "Growth could roll over",
                "flip_condition": "A hawkish surprise",
                "fix_suggestion": "Tighten the catalyst window"
            })
        })
        .collect();
    json!({ "reviews": reviews }).to_string()
}

pub fn chairman_reply(selected: &str, instrument: &str, conviction: f64, dissent: &[&str]) -> String {
    json!({
        "selected_model": selected,
        "instrument": instrument,
        "direction": if conviction > 0.0 { "LONG" } else { "SHORT" },
        "conviction": conviction,
        "rationale": "Best risk-adjusted macro case",
        "dissent_summary": dissent
            .iter()
            .map(|m| format!("{m}: thesis weaker on catalyst timing"))
            .collect::<Vec<_>>()
    })
    .to_string()
}
