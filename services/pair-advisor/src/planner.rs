//! Trade plan lifecycle - merges open positions, prior plans and fresh
//! recommendations into the next cycle's plan map and whitelist

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::policy::{final_stance, Rejection, SelectionPolicy};
use crate::types::{MarketState, OpenTrade, Recommendation, TacticalStance, TradePlan};

/// Inputs handed to a [`PlanManager`] for one open position
pub struct PlanUpdate<'a> {
    pub pair: &'a str,
    pub prior: &'a TradePlan,
    pub fresh: Option<&'a Recommendation>,
    pub trade: &'a OpenTrade,
    pub market_state: &'a MarketState,
    pub stance: TacticalStance,
}

/// Recomputes stop-loss/take-profit for an open position
pub trait PlanManager: Send + Sync {
    fn manage(&self, update: PlanUpdate<'_>) -> TradePlan;
}

/// Keeps the prior price levels and refreshes metadata
///
/// The stop-loss only ever moves up, and only to a level still below the
/// position's current rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CarryForwardPlanManager;

impl PlanManager for CarryForwardPlanManager {
    fn manage(&self, update: PlanUpdate<'_>) -> TradePlan {
        let mut plan = update.prior.clone();
        plan.tactical_stance = update.stance;

        if let Some(fresh) = update.fresh {
            plan.score = fresh.final_score;
            if !fresh.strategy_type.is_empty() {
                plan.strategy_type = fresh.strategy_type.clone();
            }

            if let (Some(proposed), Some(current)) = (fresh.stop_loss, update.trade.current_rate) {
                if proposed > plan.sl && proposed < current {
                    debug!(
                        pair = %update.pair,
                        "Raising stop-loss {} -> {}", plan.sl, proposed
                    );
                    plan.sl = proposed;
                }
            }
        }

        plan
    }
}

/// Everything the planner needs for one cycle
pub struct PlanInputs<'a> {
    pub open_trades: &'a [OpenTrade],
    pub prior_plans: &'a BTreeMap<String, TradePlan>,
    pub recommendations: &'a [Recommendation],
    pub market_state: &'a MarketState,
    pub reference_pairs: &'a BTreeSet<String>,
    pub emergency_pair: &'a str,
}

/// Result of merging one cycle
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub plans: BTreeMap<String, TradePlan>,
    /// Newly selected pairs in score order
    pub new_targets: Vec<String>,
    /// Sorted, never empty
    pub whitelist: Vec<String>,
    pub fallback_activated: bool,
    /// Open pairs with no prior plan to update from
    pub unmanaged_open_pairs: Vec<String>,
    pub rejections: Vec<(String, Rejection)>,
}

/// Deduplicate by pair (a later entry replaces an earlier one in place)
/// and sort by score, highest first. The sort is stable.
pub fn rank_recommendations(recommendations: &[Recommendation]) -> Vec<&Recommendation> {
    let mut ranked: Vec<&Recommendation> = Vec::with_capacity(recommendations.len());
    let mut index: HashMap<&str, usize> = HashMap::new();

    for rec in recommendations {
        match index.get(rec.pair.as_str()) {
            Some(&i) => ranked[i] = rec,
            None => {
                index.insert(rec.pair.as_str(), ranked.len());
                ranked.push(rec);
            }
        }
    }

    ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    ranked
}

/// Build the next plan map and whitelist
pub fn build_plan(inputs: &PlanInputs<'_>, manager: &dyn PlanManager) -> PlanOutcome {
    let level = inputs.market_state.level;
    let ranked = rank_recommendations(inputs.recommendations);
    let by_pair: HashMap<&str, &Recommendation> =
        ranked.iter().map(|rec| (rec.pair.as_str(), *rec)).collect();

    let mut outcome = PlanOutcome::default();

    // Open positions first
    let mut open_pairs: BTreeSet<&str> = BTreeSet::new();
    for trade in inputs.open_trades {
        open_pairs.insert(trade.pair.as_str());

        let Some(prior) = inputs.prior_plans.get(&trade.pair) else {
            warn!(pair = %trade.pair, "Open position has no prior plan, leaving it unmanaged");
            outcome.unmanaged_open_pairs.push(trade.pair.clone());
            continue;
        };

        let fresh = by_pair.get(trade.pair.as_str()).copied();
        let base = fresh
            .map(|rec| rec.tactical_stance)
            .unwrap_or(prior.tactical_stance);
        let stance = final_stance(level, base);
        if stance != base {
            info!(pair = %trade.pair, "Stance forced {} -> {} by {}", base, stance, level);
        }

        let plan = manager.manage(PlanUpdate {
            pair: &trade.pair,
            prior,
            fresh,
            trade,
            market_state: inputs.market_state,
            stance,
        });
        outcome.plans.insert(trade.pair.clone(), plan);
    }

    // New targets
    let policy = SelectionPolicy::for_level(level);
    info!(
        "{}: limit {}, floor {}, allowed {:?}, blocked {:?}",
        level,
        policy.max_new_targets,
        policy.min_score_threshold,
        policy.allowed_strategy,
        policy.disallowed_strategies
    );

    let mut selected: Vec<&Recommendation> = Vec::new();
    for rec in ranked
        .iter()
        .copied()
        .filter(|rec| !open_pairs.contains(rec.pair.as_str()))
    {
        match policy.evaluate(rec.final_score, &rec.strategy_type) {
            Ok(()) => selected.push(rec),
            Err(reason) => {
                debug!(pair = %rec.pair, ?reason, "Rejected");
                outcome.rejections.push((rec.pair.clone(), reason));
            }
        }
    }
    selected.truncate(policy.max_new_targets);

    for rec in &selected {
        outcome.new_targets.push(rec.pair.clone());

        let Some((entry, sl, tp1, tp2)) = rec.price_levels() else {
            warn!(pair = %rec.pair, "Selected without a complete price plan, no managed plan");
            continue;
        };

        outcome.plans.insert(
            rec.pair.clone(),
            TradePlan {
                entry,
                sl,
                tp1,
                tp2: Some(tp2),
                strategy_type: rec.strategy_type.clone(),
                score: rec.final_score,
                tactical_stance: final_stance(level, rec.tactical_stance),
            },
        );
    }

    // Whitelist
    let mut whitelist: BTreeSet<String> = outcome.plans.keys().cloned().collect();
    whitelist.extend(inputs.reference_pairs.iter().cloned());
    if whitelist.is_empty() {
        warn!("Whitelist empty, falling back to {}", inputs.emergency_pair);
        whitelist.insert(inputs.emergency_pair.to_string());
        outcome.fallback_activated = true;
    }
    outcome.whitelist = whitelist.into_iter().collect();

    info!(
        "Plan built: {} managed, {} new, {} whitelisted",
        outcome.plans.len(),
        outcome.new_targets.len(),
        outcome.whitelist.len()
    );

    outcome
}
