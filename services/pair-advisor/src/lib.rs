//! Pair Advisor Library
//!
//! Decision loop that sits beside a trading engine: it scans the market,
//! selects pairs under a risk policy, maintains per-pair trade plans and
//! pushes the resulting whitelist to the engine.

pub mod client;
pub mod config;
pub mod history;
pub mod notify;
pub mod planner;
pub mod policy;
pub mod reconcile;
pub mod report;
pub mod runner;
pub mod scanner;
pub mod schedule;
pub mod store;
pub mod types;
pub mod watchlist;

// Re-export main types for convenience
pub use client::{EngineClient, EngineError, OpenPositions, StatePoll};
pub use config::{EngineSettings, Settings, SettingsError, TelegramDelivery};
pub use notify::{LogNotifier, Notifications, Notifier, TelegramNotifier};
pub use planner::{build_plan, CarryForwardPlanManager, PlanInputs, PlanManager, PlanOutcome};
pub use policy::SelectionPolicy;
pub use reconcile::{ConfigPusher, PushOutcome};
pub use runner::{Advisor, CycleGuard, CycleOutcome};
pub use scanner::{HttpScanner, MarketScanner};
pub use store::{ExchangeConfig, StateStore};
pub use types::{
    CycleSummary, MarketState, OpenTrade, OperationalState, Recommendation, RiskLevel,
    ScanReport, TacticalStance, TradePlan, TradePlanDocument,
};
