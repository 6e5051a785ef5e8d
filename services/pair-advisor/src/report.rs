//! Operator report formatting (Telegram HTML subset)

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::{Display, Write};

use crate::types::{
    CycleSummary, HealthReport, HealthStatus, OpenTrade, OperationalState, Recommendation,
    RiskLevel, TacticalStance, TradePlan,
};

/// Escape text for HTML parse mode
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Price with precision scaled to its magnitude
pub fn format_price(price: f64) -> String {
    let decimals = if price > 100.0 {
        2
    } else if price > 10.0 {
        3
    } else if price > 0.1 {
        4
    } else {
        6
    };
    format!("{:.*}", decimals, price)
}

/// Reward-to-risk of a long plan; `None` when the stop is not below entry
pub fn reward_to_risk(entry: f64, sl: f64, target: f64) -> Option<f64> {
    let risk = entry - sl;
    (risk > 0.0).then(|| (target - entry) / risk)
}

fn level_marker(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Defcon1 | RiskLevel::Defcon2 => "🚨",
        RiskLevel::Defcon3 => "⚠️",
        RiskLevel::Defcon4 => "🔄",
        RiskLevel::Defcon5 => "✅",
    }
}

fn stance_marker(stance: TacticalStance) -> &'static str {
    match stance {
        TacticalStance::Offensive => "⚔️",
        TacticalStance::Defensive => "🛡️",
        TacticalStance::Standard => "⚖️",
    }
}

pub fn cycle_start(state: OperationalState) -> String {
    match state {
        OperationalState::Running => "🚀 <b>Hourly advisory cycle started</b>".to_string(),
        OperationalState::Stopped => {
            "⚠️ <b>Engine is stopped (advisory mode).</b>\nScanning the market for a reference report...".to_string()
        }
    }
}

pub fn login_failed(error: &dyn Display) -> String {
    format!(
        "🚨 <b>CRITICAL:</b> Could not log in to the trading engine API. Cycle aborted.\n<pre>{}</pre>",
        escape(&error.to_string())
    )
}

pub fn positions_degraded() -> String {
    "⚠️ <b>Open positions unavailable.</b>\nThis cycle proceeds as if no positions are open.".to_string()
}

/// The state poll failed and the cycle runs on the last known mode
pub fn state_unknown(assumed: OperationalState, error: &dyn Display) -> String {
    format!(
        "⚠️ <b>Engine state unavailable.</b>\nAssuming <b>{}</b> until the next successful poll.\n<pre>{}</pre>",
        assumed,
        escape(&error.to_string())
    )
}

pub fn save_failed(document: &str, error: &dyn Display) -> String {
    format!(
        "⚠️ <b>Could not save {}.</b>\n<pre>{}</pre>",
        escape(document),
        escape(&error.to_string())
    )
}

pub fn scan_failed(error: &dyn Display) -> String {
    format!(
        "🚨 <b>Market scan failed.</b> Cycle aborted, nothing was changed.\n<pre>{}</pre>",
        escape(&error.to_string())
    )
}

pub fn reload_failed(reason: &str) -> String {
    format!(
        "⚠️ <b>Engine reload failed.</b>\nThe new whitelist is written and takes effect on the next reload.\n<pre>{}</pre>",
        escape(reason)
    )
}

pub fn state_transition(from: OperationalState, to: OperationalState) -> String {
    format!(
        "ℹ️ <b>Engine state changed</b>\nThe trading engine moved from <b>{}</b> to <b>{}</b>.",
        from, to
    )
}

pub fn restart_triggered() -> String {
    "🚀 <b>Engine start detected!</b>\nRunning an advisory cycle now...".to_string()
}

pub fn job_error(job: &str, error: &dyn Display) -> String {
    format!(
        "🚨 <b>Unexpected error in {}:</b>\n<pre>{}</pre>",
        escape(job),
        escape(&error.to_string())
    )
}

fn write_health_line(out: &mut String, pair: &str, health: Option<&HealthReport>) {
    let pair = escape(pair);
    match health {
        Some(report) if report.status == HealthStatus::Good => {
            let _ = writeln!(out, "✅ <code>{:<12}</code> <b>GOOD</b>. {}", pair, escape(&report.reason));
        }
        Some(report) if report.status == HealthStatus::Weak => {
            let _ = writeln!(
                out,
                "⚠️ <code>{:<12}</code> <b>WEAK</b>. {} <b>Consider tightening SL.</b>",
                pair,
                escape(&report.reason)
            );
        }
        _ => {
            let _ = writeln!(out, "❓ <code>{:<12}</code> <b>No assessment</b>. Check manually.", pair);
        }
    }
}

/// Hourly cycle report
pub fn cycle_report(
    summary: &CycleSummary,
    recommendations: &[Recommendation],
    health: &HashMap<String, HealthReport>,
    open_pairs: &[String],
) -> String {
    let mut out = String::new();
    let level = summary.market_state.level;
    let narrative = if summary.market_state.narrative.is_empty() {
        "No narrative available.".to_string()
    } else {
        escape(&summary.market_state.narrative)
    };

    let _ = writeln!(out, "📡 <b>Advisory Report</b> 📡");
    let _ = writeln!(out, "<i>{}</i>\n", summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "<b><u>{} Market Risk</u></b>", level_marker(level));
    let _ = writeln!(out, "▪️ <b>Level: {}</b>", level);
    let _ = writeln!(out, "▪️ <b>Narrative:</b> <i>{}</i>\n", narrative);

    let _ = writeln!(out, "<b><u>📊 Open Positions:</u></b>");
    if open_pairs.is_empty() {
        let _ = writeln!(out, "<i>- No open positions.</i>");
    } else {
        for pair in open_pairs {
            write_health_line(&mut out, pair, health.get(pair));
        }
    }
    out.push('\n');

    let by_pair: HashMap<&str, &Recommendation> =
        recommendations.iter().map(|rec| (rec.pair.as_str(), rec)).collect();
    let mut selected: Vec<&Recommendation> = summary
        .new_targets_in_whitelist
        .iter()
        .filter_map(|pair| by_pair.get(pair.as_str()).copied())
        .collect();
    selected.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));

    let _ = writeln!(out, "<b><u>🎯 Selected Targets ({})</u></b>", selected.len());
    if selected.is_empty() {
        let _ = writeln!(out, "<i>- No new targets selected this cycle.</i>\n");
    }
    for (i, rec) in selected.iter().enumerate() {
        let grade = if rec.is_top_grade { "🏅" } else { "🔹" };
        let _ = writeln!(
            out,
            "<b>{}. {} <u>{}</u></b> | Score: <b>{:.0}</b>",
            i + 1,
            grade,
            escape(&rec.pair),
            rec.final_score
        );
        let _ = writeln!(out, "   - <b>Strategy:</b> <i>{}</i>", escape(&rec.strategy_type));
        if let Some(reason) = &rec.reason {
            let _ = writeln!(out, "   - <i>Reason: {}</i>", escape(reason));
        }
        if let Some(probability) = rec.probability_estimate {
            let _ = writeln!(out, "   - <b>Win probability:</b> <b>{:.1}%</b>", probability);
        }
        match (rec.entry, rec.stop_loss, rec.take_profit_1) {
            (Some(entry), Some(sl), Some(tp1)) => {
                if let Some(price) = rec.current_price.filter(|_| entry > 0.0) {
                    let deviation = (price - entry) / entry * 100.0;
                    let status = if deviation > 2.0 {
                        format!("✅ Past entry ({:+.1}%)", deviation)
                    } else if deviation > -2.0 {
                        format!("⏳ <b>NEAR ENTRY</b> ({:+.1}%)", deviation)
                    } else {
                        format!("... Waiting ({:.1}% away)", deviation)
                    };
                    let _ = writeln!(
                        out,
                        "   - <b>Price:</b> <code>{}</code> | <i>{}</i>",
                        format_price(price),
                        status
                    );
                }
                let rr = reward_to_risk(entry, sl, tp1)
                    .map(|rr| format!(" (R:R ~1:{:.1})", rr))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "   - <b>Plan:</b> Buy <code>{}</code> | SL <code>{}</code> | TP1 <code>{}</code>{}",
                    format_price(entry),
                    format_price(sl),
                    format_price(tp1),
                    rr
                );
            }
            _ => {
                let _ = writeln!(out, "   - <i>(No detailed trade plan proposed.)</i>");
            }
        }
        out.push('\n');
    }

    let _ = writeln!(out, "<b><u>🔬 Cycle Summary:</u></b>");
    let _ = writeln!(
        out,
        "- Scanned <b>{}</b> pairs: <b>{} top grade</b> & <b>{} other</b> targets.",
        summary.total_pairs_in_universe,
        summary.top_grade_targets.len(),
        summary.other_targets.len()
    );
    let _ = writeln!(out, "- Whitelist: <b>{}</b> pairs.", summary.final_whitelist.len());
    if summary.fallback_activated {
        let _ = writeln!(
            out,
            "- ⚠️ <b>WARNING:</b> Whitelist was empty, fell back to {}.",
            escape(summary.final_whitelist.first().map(String::as_str).unwrap_or(""))
        );
    }
    match (summary.applied, summary.operational_state) {
        (true, _) => out.push_str("✅ <i>Trade plan and whitelist applied to the engine.</i>"),
        (false, OperationalState::Running) => out.push_str(
            "🚨 <b>Config push failed.</b> The trade plan is saved but the whitelist was <b>NOT</b> applied to the running engine.",
        ),
        (false, OperationalState::Stopped) => out.push_str(
            "⚠️ <b>Engine is stopped.</b> This report is advisory only and was <b>NOT</b> applied.",
        ),
    }
    out
}

/// One open position for the periodic health report
#[derive(Debug, Clone)]
pub struct PositionHealth {
    pub trade: OpenTrade,
    pub health: Option<HealthReport>,
    pub plan: Option<TradePlan>,
}

pub fn health_report(positions: &[PositionHealth], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "🩺 <b>Open Position Health</b>");
    let _ = writeln!(out, "<i>{}</i>\n", now.format("%Y-%m-%d %H:%M UTC"));

    for position in positions {
        write_health_line(&mut out, &position.trade.pair, position.health.as_ref());

        let mut details = Vec::new();
        if let Some(profit) = position.trade.profit_pct {
            details.push(format!("P/L <b>{:+.2}%</b>", profit));
        }
        if let Some(rate) = position.trade.current_rate {
            details.push(format!("now <code>{}</code>", format_price(rate)));
        }
        if let Some(plan) = &position.plan {
            details.push(format!("SL <code>{}</code>", format_price(plan.sl)));
            details.push(format!("TP1 <code>{}</code>", format_price(plan.tp1)));
            if let Some(tp2) = plan.tp2 {
                details.push(format!("TP2 <code>{}</code>", format_price(tp2)));
            }
        }
        let stance = position
            .plan
            .as_ref()
            .map(|plan| plan.tactical_stance)
            .unwrap_or_default();
        details.push(format!("{} {}", stance, stance_marker(stance)));

        let _ = writeln!(out, "   {}", details.join(" | "));
    }
    out
}

/// Notice sent the first time a position is brought under plan management
pub fn takeover(pair: &str, plan: &TradePlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "✅ <b>Now managing position: <u>{}</u></b>\n", escape(pair));
    let _ = writeln!(out, "▪️ <b>Strategy:</b> <i>{}</i>", escape(&plan.strategy_type));
    let _ = writeln!(
        out,
        "▪️ <b>Stance:</b> {} {}",
        plan.tactical_stance,
        stance_marker(plan.tactical_stance)
    );
    if plan.score > 0.0 {
        let _ = writeln!(out, "▪️ <b>Score:</b> {:.0}", plan.score);
    }
    out.push('\n');

    match reward_to_risk(plan.entry, plan.sl, plan.tp1) {
        Some(rr1) if plan.tp1 > 0.0 => {
            let _ = writeln!(out, "▪️ <b>Entry:</b> <code>{}</code>", format_price(plan.entry));
            let _ = writeln!(out, "▪️ <b>Stoploss:</b> <code>{}</code>", format_price(plan.sl));
            let _ = writeln!(
                out,
                "▪️ <b>TP1:</b> <code>{}</code> (R:R ≈ 1:{:.1})",
                format_price(plan.tp1),
                rr1
            );
            if let Some(tp2) = plan.tp2.filter(|&tp2| tp2 > plan.tp1) {
                if let Some(rr2) = reward_to_risk(plan.entry, plan.sl, tp2) {
                    let _ = writeln!(
                        out,
                        "▪️ <b>TP2:</b> <code>{}</code> (R:R ≈ 1:{:.1})",
                        format_price(tp2),
                        rr2
                    );
                }
            }
        }
        _ => {
            let _ = writeln!(out, "<i>Plan levels unavailable.</i>");
        }
    }
    out.push_str("\n<i>The engine will manage this position according to the plan above.</i>");
    out
}
