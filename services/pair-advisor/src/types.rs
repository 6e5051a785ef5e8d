//! Core types shared by the advisor components
//!
//! These types define the documents exchanged with the trading engine, the
//! market scanner and the state files under `user_data_dir`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Operational mode reported by the trading engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationalState {
    Running,
    Stopped,
}

impl OperationalState {
    /// Parse the engine's `state` field; anything else is not a mode we track
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Some(Self::Running),
            "STOPPED" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-tier market risk classification, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RiskLevel {
    Defcon1,
    Defcon2,
    Defcon3,
    #[default]
    Defcon4,
    Defcon5,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 5] = [
        RiskLevel::Defcon1,
        RiskLevel::Defcon2,
        RiskLevel::Defcon3,
        RiskLevel::Defcon4,
        RiskLevel::Defcon5,
    ];

    /// Parse any label containing `DEFCON n`.
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.to_ascii_uppercase();
        let idx = upper.find("DEFCON")?;
        let digit = upper[idx + "DEFCON".len()..]
            .trim_start()
            .chars()
            .next()?;
        match digit {
            '1' => Some(Self::Defcon1),
            '2' => Some(Self::Defcon2),
            '3' => Some(Self::Defcon3),
            '4' => Some(Self::Defcon4),
            '5' => Some(Self::Defcon5),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Defcon1 => "DEFCON 1: MAXIMUM RISK",
            Self::Defcon2 => "DEFCON 2: HIGH RISK",
            Self::Defcon3 => "DEFCON 3: CAUTION",
            Self::Defcon4 => "DEFCON 4: NORMAL",
            Self::Defcon5 => "DEFCON 5: UPTREND",
        }
    }

    /// The three most severe tiers force a defensive stance
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Defcon1 | Self::Defcon2 | Self::Defcon3)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for RiskLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for RiskLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(RiskLevel::parse(&raw).unwrap_or_default())
    }
}

/// Market context attached to each cycle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketState {
    #[serde(default)]
    pub level: RiskLevel,
    #[serde(default)]
    pub narrative: String,
}

/// Per-pair management posture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TacticalStance {
    Offensive,
    Defensive,
    #[default]
    #[serde(other)]
    Standard,
}

impl TacticalStance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offensive => "OFFENSIVE",
            Self::Defensive => "DEFENSIVE",
            Self::Standard => "STANDARD",
        }
    }
}

impl fmt::Display for TacticalStance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored recommendation produced by the market scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub pair: String,
    #[serde(default)]
    pub final_score: f64,
    #[serde(default)]
    pub strategy_type: String,
    #[serde(default)]
    pub tactical_stance: TacticalStance,
    #[serde(default)]
    pub entry: Option<f64>,
    #[serde(default, rename = "sl")]
    pub stop_loss: Option<f64>,
    #[serde(default, rename = "tp1")]
    pub take_profit_1: Option<f64>,
    #[serde(default, rename = "tp2")]
    pub take_profit_2: Option<f64>,
    #[serde(default, alias = "is_A_grade")]
    pub is_top_grade: bool,
    #[serde(default)]
    pub probability_estimate: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
}

impl Recommendation {
    /// Entry, stop-loss and both take-profits, when all are present
    pub fn price_levels(&self) -> Option<(f64, f64, f64, f64)> {
        Some((
            self.entry?,
            self.stop_loss?,
            self.take_profit_1?,
            self.take_profit_2?,
        ))
    }
}

/// Managed entry/exit parameters for one pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    #[serde(default)]
    pub entry: f64,
    #[serde(default)]
    pub sl: f64,
    #[serde(default)]
    pub tp1: f64,
    #[serde(default)]
    pub tp2: Option<f64>,
    #[serde(default)]
    pub strategy_type: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub tactical_stance: TacticalStance,
}

/// The trade plan document (`trade_plan.json`)
///
/// Both fields default when absent so a partial document still loads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TradePlanDocument {
    #[serde(default)]
    pub market_state: MarketState,
    #[serde(default)]
    pub pairs: BTreeMap<String, TradePlan>,
}

/// Open position as reported by the trading engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    pub trade_id: i64,
    pub pair: String,
    #[serde(default)]
    pub open_rate: f64,
    #[serde(default)]
    pub current_rate: Option<f64>,
    #[serde(default)]
    pub profit_pct: Option<f64>,
    #[serde(default)]
    pub stake_amount: Option<f64>,
}

/// Short-term health classification of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    Good,
    Weak,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub status: HealthStatus,
    #[serde(default)]
    pub reason: String,
}

/// Aggregate part of a scan
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    #[serde(default)]
    pub market_state: MarketState,
    #[serde(default)]
    pub total_pairs_in_universe: usize,
    /// Pairs the scanner wants watched regardless of score (e.g. top by volume)
    #[serde(default, alias = "top_15_by_volume")]
    pub reference_pairs: Vec<String>,
}

/// Full output of one scanner run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub summary: ScanSummary,
}

/// Summary of one full cycle, also stored as a market-history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub operational_state: OperationalState,
    pub market_state: MarketState,
    pub total_pairs_in_universe: usize,
    pub top_grade_targets: Vec<String>,
    pub other_targets: Vec<String>,
    pub new_targets_in_whitelist: Vec<String>,
    pub final_whitelist: Vec<String>,
    pub fallback_activated: bool,
    pub applied: bool,
}
