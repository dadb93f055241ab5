pub mod accounts;
pub mod alpaca;
pub mod broker;
pub mod engine;
pub mod paper;
pub mod planner;
pub mod sizing;

pub use accounts::{AccountRegistry, AccountRole, AccountSpec, BrokerKind, Credentials, MAX_ACCOUNTS};
pub use alpaca::AlpacaBroker;
pub use broker::{
    AccountSnapshot, BrokerOrder, BrokerResult, BrokerRouter, Brokerage, OrderRequest, PositionSnapshot,
};
pub use engine::ExecutionEngine;
pub use paper::PaperBroker;
pub use planner::{fetch_state, protective_stop, side_for, AccountState, AccountTarget, WeeklyPlan, WeeklyPlanner};
pub use sizing::SizingTable;
