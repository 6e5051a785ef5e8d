//! Risk policy - maps the market risk level to selection rules

use crate::types::{RiskLevel, TacticalStance};

/// Candidate limit outside elevated risk
pub const DEFAULT_MAX_NEW_TARGETS: usize = 10;
/// Candidate limit under elevated risk
pub const ELEVATED_MAX_NEW_TARGETS: usize = 5;
/// Score floor outside elevated risk
pub const DEFAULT_MIN_SCORE: f64 = 90.0;

pub const REVERSAL_STRATEGY: &str = "Reversal-Scout";
pub const PRE_BREAKOUT_STRATEGY: &str = "Breakout-Pre";

/// Selection rules for new targets in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionPolicy {
    pub max_new_targets: usize,
    pub min_score_threshold: f64,
    /// When set, only strategies containing this tag pass
    pub allowed_strategy: Option<&'static str>,
    pub disallowed_strategies: Vec<&'static str>,
}

/// Why a candidate failed the policy
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    ScoreTooLow { score: f64, floor: f64 },
    StrategyNotAllowed { strategy: String, allowed: &'static str },
    StrategyDisallowed { strategy: String },
}

impl SelectionPolicy {
    pub fn for_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Defcon1 => Self::reversal_only(110.0),
            RiskLevel::Defcon2 | RiskLevel::Defcon3 => Self::reversal_only(100.0),
            RiskLevel::Defcon4 => Self {
                max_new_targets: DEFAULT_MAX_NEW_TARGETS,
                min_score_threshold: DEFAULT_MIN_SCORE,
                allowed_strategy: None,
                disallowed_strategies: vec![PRE_BREAKOUT_STRATEGY],
            },
            RiskLevel::Defcon5 => Self {
                max_new_targets: DEFAULT_MAX_NEW_TARGETS,
                min_score_threshold: DEFAULT_MIN_SCORE,
                allowed_strategy: None,
                disallowed_strategies: Vec::new(),
            },
        }
    }

    fn reversal_only(floor: f64) -> Self {
        Self {
            max_new_targets: ELEVATED_MAX_NEW_TARGETS,
            min_score_threshold: floor,
            allowed_strategy: Some(REVERSAL_STRATEGY),
            disallowed_strategies: Vec::new(),
        }
    }

    /// Check one candidate. Predicates run in order: score floor, allowed
    /// strategy, disallowed strategies; the first failure is returned.
    pub fn evaluate(&self, score: f64, strategy: &str) -> Result<(), Rejection> {
        if !(score >= self.min_score_threshold) {
            return Err(Rejection::ScoreTooLow {
                score,
                floor: self.min_score_threshold,
            });
        }

        if let Some(allowed) = self.allowed_strategy {
            if !strategy.contains(allowed) {
                return Err(Rejection::StrategyNotAllowed {
                    strategy: strategy.to_string(),
                    allowed,
                });
            }
        }

        if self.disallowed_strategies.iter().any(|&blocked| blocked == strategy) {
            return Err(Rejection::StrategyDisallowed {
                strategy: strategy.to_string(),
            });
        }

        Ok(())
    }
}

/// Mandatory stance for the level, if any. Applies to new and existing plans alike.
pub fn stance_override(level: RiskLevel) -> Option<TacticalStance> {
    if level.is_elevated() {
        Some(TacticalStance::Defensive)
    } else {
        None
    }
}

/// Apply the level's override to a proposed stance
pub fn final_stance(level: RiskLevel, proposed: TacticalStance) -> TacticalStance {
    stance_override(level).unwrap_or(proposed)
}
