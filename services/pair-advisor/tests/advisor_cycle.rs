//! Full advisory cycles against a mocked engine and a fake scanner


use fakes::{build_advisor, read_json, test_settings, write_engine_config, FakeScanner, RecordingNotifier};
use pair_advisor::store::{MANAGED_TRADES_FILE, MARKET_HISTORY_FILE, STRATEGY_OVERRIDES_FILE, TRADE_PLAN_FILE, WATCHLIST_FILE};
use pair_advisor::planner::{PlanManager, PlanUpdate};
use pair_advisor::types::{HealthReport, HealthStatus, MarketState, ScanSummary};
use pair_advisor::{
    CycleOutcome, OperationalState, Recommendation, RiskLevel, ScanReport, TacticalStance, TradePlan,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn recommendation(pair: &str, score: f64, stance: TacticalStance) -> Recommendation {
    Recommendation {
        pair: pair.to_string(),
        final_score: score,
        strategy_type: "Breakout-Pre".to_string(),
        tactical_stance: stance,
        entry: Some(10.0),
        stop_loss: Some(9.0),
        take_profit_1: Some(12.0),
        take_profit_2: Some(14.0),
        is_top_grade: score >= 120.0,
        probability_estimate: None,
        reason: Some("test".to_string()),
        current_price: Some(10.1),
    }
}

fn report(level: RiskLevel, recommendations: Vec<Recommendation>, reference: Vec<String>) -> ScanReport {
    ScanReport {
        recommendations,
        summary: ScanSummary {
            market_state: MarketState {
                level,
                narrative: "test market".to_string(),
            },
            total_pairs_in_universe: 250,
            reference_pairs: reference,
        },
    }
}

async fn mock_engine(state: &str, open_trades: Value, reloads: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/show_config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": state })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(open_trades))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reload_config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "reloading" })))
        .expect(reloads)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_calm_market_cycle_end_to_end() {
    let stances = [TacticalStance::Offensive, TacticalStance::Standard, TacticalStance::Defensive];
    let scores = [130.0, 125.0, 120.0, 115.0, 110.0, 100.0, 95.0, 90.0, 85.0, 70.0, 50.0, 40.0];
    let recs: Vec<Recommendation> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| recommendation(&format!("T{:02}/USDT", i), score, stances[i % 3]))
        .collect();

    // 15 reference pairs, two of which are also selected targets
    let mut reference: Vec<String> = (0..13).map(|i| format!("REF{:02}/USDT", i)).collect();
    reference.push("T00/USDT".to_string());
    reference.push("T03/USDT".to_string());

    let server = mock_engine("running", json!([]), 1).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &["OLD/USDT"]);
    let state_dir = dir.path().join("user_data");
    let scanner = Arc::new(FakeScanner::new(report(RiskLevel::Defcon5, recs.clone(), reference.clone())));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &state_dir,
        scanner.clone(),
        notifier.clone(),
    );

    let CycleOutcome::Completed(summary) = advisor.run_full_cycle().await.unwrap() else {
        panic!("cycle did not complete");
    };

    // min(10, 8 scores >= 90) + 15 reference - 2 overlap
    assert_eq!(summary.new_targets_in_whitelist.len(), 8);
    assert_eq!(summary.final_whitelist.len(), 21);
    assert!(!summary.fallback_activated);
    assert!(summary.applied);
    assert_eq!(summary.operational_state, OperationalState::Running);
    assert_eq!(summary.top_grade_targets.len(), 3);
    assert_eq!(summary.other_targets.len(), 9);

    let plan = read_json(&state_dir.join(TRADE_PLAN_FILE));
    assert_eq!(plan["market_state"]["level"], "DEFCON 5: UPTREND");
    let plan_pairs = plan["pairs"].as_object().unwrap();
    assert_eq!(plan_pairs.len(), 8);
    for rec in recs.iter().filter(|r| r.final_score >= 90.0) {
        assert_eq!(
            plan_pairs[&rec.pair]["tactical_stance"],
            json!(rec.tactical_stance.as_str()),
            "stance of {} changed",
            rec.pair
        );
    }

    let config = read_json(&config_path);
    let whitelist: Vec<String> =
        serde_json::from_value(config["exchange"]["pair_whitelist"].clone()).unwrap();
    assert_eq!(whitelist, summary.final_whitelist);
    let mut sorted = whitelist.clone();
    sorted.sort();
    assert_eq!(whitelist, sorted);

    let overrides = read_json(&state_dir.join(STRATEGY_OVERRIDES_FILE));
    assert_eq!(overrides.as_object().unwrap().len(), 21);

    let watchlist = read_json(&state_dir.join(WATCHLIST_FILE));
    assert_eq!(watchlist.as_object().unwrap().len(), 10);
    assert!(watchlist.get("T10/USDT").is_none());

    let history = read_json(&state_dir.join(MARKET_HISTORY_FILE));
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["cycle_id"], json!(summary.cycle_id.to_string()));

    assert_eq!(notifier.count_containing("Advisory Report"), 1);
    assert_eq!(notifier.count_containing("applied to the engine"), 1);
    assert_eq!(scanner.scan_count(), 1);
}

#[tokio::test]
async fn test_cycle_in_progress_makes_no_engine_calls() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &[]);
    let scanner = Arc::new(FakeScanner::new(ScanReport::default()));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &dir.path().join("user_data"),
        scanner.clone(),
        notifier.clone(),
    );

    let _ticket = advisor.cycle_guard().try_begin().unwrap();
    let outcome = tokio_test::assert_ok!(advisor.run_full_cycle().await);

    assert_eq!(outcome, CycleOutcome::Skipped);
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(scanner.scan_count(), 0);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn test_stopped_engine_gets_advice_only() {
    let server = mock_engine("stopped", json!([]), 0).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &["OLD/USDT"]);
    let before = std::fs::read_to_string(&config_path).unwrap();
    let state_dir = dir.path().join("user_data");
    let recs = vec![recommendation("NEW/USDT", 120.0, TacticalStance::Offensive)];
    let scanner = Arc::new(FakeScanner::new(report(RiskLevel::Defcon4, recs, vec![])));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &state_dir,
        scanner,
        notifier.clone(),
    );

    let CycleOutcome::Completed(summary) = advisor.run_full_cycle().await.unwrap() else {
        panic!("cycle did not complete");
    };

    assert!(!summary.applied);
    assert_eq!(std::fs::read_to_string(&config_path).unwrap(), before);
    assert!(!state_dir.join(STRATEGY_OVERRIDES_FILE).exists());
    let plan = read_json(&state_dir.join(TRADE_PLAN_FILE));
    assert!(plan["pairs"].get("NEW/USDT").is_none(), "Breakout-Pre is blocked at DEFCON 4");
    assert_eq!(notifier.count_containing("advisory mode"), 1);
    assert_eq!(notifier.count_containing("advisory only"), 1);
}

#[tokio::test]
async fn test_empty_market_falls_back_to_emergency_pair() {
    let server = mock_engine("running", json!([]), 1).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &["OLD/USDT"]);
    let scanner = Arc::new(FakeScanner::new(report(RiskLevel::Defcon1, vec![], vec![])));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &dir.path().join("user_data"),
        scanner,
        notifier.clone(),
    );

    let CycleOutcome::Completed(summary) = advisor.run_full_cycle().await.unwrap() else {
        panic!("cycle did not complete");
    };

    assert!(summary.fallback_activated);
    assert_eq!(summary.final_whitelist, vec!["USDC/USDT".to_string()]);
    assert_eq!(
        read_json(&config_path)["exchange"]["pair_whitelist"],
        json!(["USDC/USDT"])
    );
    assert_eq!(notifier.count_containing("fell back to USDC/USDT"), 1);
}

#[tokio::test]
async fn test_login_failure_aborts_before_scanning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/balance"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &[]);
    let scanner = Arc::new(FakeScanner::new(ScanReport::default()));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &dir.path().join("user_data"),
        scanner.clone(),
        notifier.clone(),
    );

    let outcome = advisor.run_full_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Aborted { .. }));
    assert_eq!(scanner.scan_count(), 0);
    assert_eq!(notifier.count_containing("Could not log in"), 1);
    assert!(!advisor.cycle_guard().is_active());
}

#[tokio::test]
async fn test_scan_failure_aborts_without_writes() {
    let server = mock_engine("running", json!([]), 0).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &["OLD/USDT"]);
    let state_dir = dir.path().join("user_data");
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &state_dir,
        Arc::new(FakeScanner::failing()),
        notifier.clone(),
    );

    let outcome = advisor.run_full_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Aborted { .. }));
    assert!(!state_dir.join(TRADE_PLAN_FILE).exists());
    assert_eq!(notifier.count_containing("Market scan failed"), 1);
}

#[tokio::test]
async fn test_open_position_is_taken_over_once() {
    let trades = json!([
        { "trade_id": 11, "pair": "ETH/USDT", "open_rate": 100.0, "current_rate": 104.0, "profit_pct": 4.0 },
        { "trade_id": 12, "pair": "XRP/USDT", "open_rate": 0.5, "current_rate": 0.51, "profit_pct": 2.0 }
    ]);
    let server = mock_engine("running", trades, 2).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &["ETH/USDT"]);
    let state_dir = dir.path().join("user_data");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(
        state_dir.join(TRADE_PLAN_FILE),
        json!({
            "market_state": { "level": "DEFCON 4: NORMAL", "narrative": "" },
            "pairs": {
                "ETH/USDT": {
                    "entry": 100.0, "sl": 95.0, "tp1": 110.0, "tp2": 120.0,
                    "strategy_type": "Trend", "score": 98.0, "tactical_stance": "OFFENSIVE"
                }
            }
        })
        .to_string(),
    )
    .unwrap();

    // DEFCON 3 forces DEFENSIVE on the carried plan; the fresh SL is a valid raise
    let mut fresh = recommendation("ETH/USDT", 80.0, TacticalStance::Offensive);
    fresh.stop_loss = Some(99.0);
    let scanner = Arc::new(
        FakeScanner::new(report(RiskLevel::Defcon3, vec![fresh], vec![])).with_health(
            "ETH/USDT",
            HealthReport {
                status: HealthStatus::Good,
                reason: "holding trend".to_string(),
            },
        ),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &state_dir,
        scanner,
        notifier.clone(),
    );

    for _ in 0..2 {
        let outcome = advisor.run_full_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(_)));
    }

    let plan = read_json(&state_dir.join(TRADE_PLAN_FILE));
    assert_eq!(plan["pairs"]["ETH/USDT"]["tactical_stance"], "DEFENSIVE");
    assert_eq!(plan["pairs"]["ETH/USDT"]["sl"], 99.0);
    assert!(plan["pairs"].get("XRP/USDT").is_none(), "no prior plan, stays unmanaged");

    assert_eq!(notifier.count_containing("Now managing position: <u>ETH/USDT</u>"), 1);
    assert_eq!(notifier.count_containing("XRP/USDT</u>"), 0);
    let managed: BTreeSet<i64> =
        serde_json::from_value(read_json(&state_dir.join(MANAGED_TRADES_FILE))).unwrap();
    assert_eq!(managed, [11].into_iter().collect());
    assert!(notifier.count_containing("holding trend") >= 1);
}

#[tokio::test]
async fn test_engine_start_triggers_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/show_config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "stopped" })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &[]);
    let scanner = Arc::new(FakeScanner::new(report(RiskLevel::Defcon4, vec![], vec!["BTC/USDT".to_string()])));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &dir.path().join("user_data"),
        scanner.clone(),
        notifier.clone(),
    );

    // First poll only records the state
    assert!(advisor.watch_state().await.unwrap().is_none());
    assert!(advisor.watch_state().await.unwrap().is_none());

    server.reset().await;
    let server_uri = server.uri();
    for (verb, route, body) in [
        ("GET", "/api/v1/show_config", json!({ "state": "running" })),
        ("GET", "/api/v1/balance", json!({})),
        ("GET", "/api/v1/status", json!([])),
        ("POST", "/api/v1/reload_config", json!({ "status": "ok" })),
    ] {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }
    assert_eq!(server.uri(), server_uri);

    let outcome = advisor.watch_state().await.unwrap();
    assert!(matches!(outcome, Some(CycleOutcome::Completed(_))));
    assert_eq!(notifier.count_containing("moved from <b>STOPPED</b> to <b>RUNNING</b>"), 1);
    assert_eq!(notifier.count_containing("Engine start detected"), 1);
    assert_eq!(scanner.scan_count(), 1);
}

#[tokio::test]
async fn test_monitor_reports_open_positions() {
    let trades = json!([{ "trade_id": 1, "pair": "SOL/USDT", "open_rate": 20.0, "current_rate": 19.0, "profit_pct": -5.0 }]);
    let server = mock_engine("running", trades, 0).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &[]);
    let scanner = Arc::new(FakeScanner::new(ScanReport::default()).with_health(
        "SOL/USDT",
        HealthReport {
            status: HealthStatus::Weak,
            reason: "lost support".to_string(),
        },
    ));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &dir.path().join("user_data"),
        scanner.clone(),
        notifier.clone(),
    );

    assert_eq!(advisor.monitor_open_trades().await.unwrap(), 1);
    assert_eq!(scanner.scan_count(), 0);
    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("WEAK"));
    assert!(messages[0].contains("-5.00%"));
    assert!(!dir.path().join("user_data").join(TRADE_PLAN_FILE).exists());
}

#[tokio::test]
async fn test_failed_push_to_running_engine_is_not_reported_as_stopped() {
    let server = mock_engine("running", json!([]), 0).await;
    let dir = tempfile::tempdir().unwrap();
    let missing_config = dir.path().join("absent").join("config.json");
    let state_dir = dir.path().join("user_data");
    let scanner = Arc::new(FakeScanner::new(report(RiskLevel::Defcon4, vec![], vec!["BTC/USDT".to_string()])));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&missing_config),
        &state_dir,
        scanner,
        notifier.clone(),
    );

    let CycleOutcome::Completed(summary) = advisor.run_full_cycle().await.unwrap() else {
        panic!("cycle did not complete");
    };

    assert_eq!(summary.operational_state, OperationalState::Running);
    assert!(!summary.applied);
    assert!(state_dir.join(TRADE_PLAN_FILE).exists());
    assert_eq!(notifier.count_containing("Unexpected error in config push"), 1);
    assert_eq!(notifier.count_containing("Config push failed"), 1);
    assert_eq!(notifier.count_containing("Engine is stopped"), 0);
}

#[tokio::test]
async fn test_failed_document_writes_are_reported() {
    let server = mock_engine("running", json!([]), 1).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &["OLD/USDT"]);
    let state_dir = dir.path().join("user_data");
    // A directory in place of the document makes the rename fail
    std::fs::create_dir_all(state_dir.join(WATCHLIST_FILE)).unwrap();
    std::fs::create_dir_all(state_dir.join(MARKET_HISTORY_FILE)).unwrap();

    let recs = vec![recommendation("SOL/USDT", 95.0, TacticalStance::Standard)];
    let scanner = Arc::new(FakeScanner::new(report(RiskLevel::Defcon5, recs, vec![])));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &state_dir,
        scanner,
        notifier.clone(),
    );

    let outcome = advisor.run_full_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed(_)));
    assert_eq!(notifier.count_containing("Could not save potential_watchlist.json"), 1);
    assert_eq!(notifier.count_containing("Could not save market_history.json"), 1);
    assert_eq!(notifier.count_containing("Advisory Report"), 1);
}

#[tokio::test]
async fn test_failed_state_poll_is_reported_once_per_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/show_config"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    for (verb, route, body) in [
        ("GET", "/api/v1/balance", json!({})),
        ("GET", "/api/v1/status", json!([])),
        ("POST", "/api/v1/reload_config", json!({ "status": "ok" })),
    ] {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &[]);
    let scanner = Arc::new(FakeScanner::new(report(RiskLevel::Defcon4, vec![], vec!["BTC/USDT".to_string()])));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &dir.path().join("user_data"),
        scanner,
        notifier.clone(),
    );

    let CycleOutcome::Completed(summary) = advisor.run_full_cycle().await.unwrap() else {
        panic!("cycle did not complete");
    };
    // Nothing polled successfully yet, so the engine is assumed RUNNING
    assert_eq!(summary.operational_state, OperationalState::Running);
    assert!(summary.applied);
    assert_eq!(notifier.count_containing("Engine state unavailable"), 1);

    assert!(advisor.watch_state().await.unwrap().is_none());
    assert_eq!(notifier.count_containing("Engine state unavailable"), 1);
}

/// Plan manager that pins every managed position to fixed levels
struct PinnedPlanManager;

impl PlanManager for PinnedPlanManager {
    fn manage(&self, update: PlanUpdate<'_>) -> TradePlan {
        TradePlan {
            entry: update.prior.entry,
            sl: 42.0,
            tp1: 60.0,
            tp2: None,
            strategy_type: "Pinned".to_string(),
            score: update.prior.score,
            tactical_stance: update.stance,
        }
    }
}

#[tokio::test]
async fn test_injected_plan_manager_shapes_open_position_plans() {
    let trades = json!([{ "trade_id": 7, "pair": "AVAX/USDT", "open_rate": 50.0, "current_rate": 51.0, "profit_pct": 2.0 }]);
    let server = mock_engine("running", trades, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_engine_config(dir.path(), &["AVAX/USDT"]);
    let state_dir = dir.path().join("user_data");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(
        state_dir.join(TRADE_PLAN_FILE),
        json!({
            "pairs": {
                "AVAX/USDT": {
                    "entry": 50.0, "sl": 45.0, "tp1": 55.0, "tp2": 60.0,
                    "strategy_type": "Trend", "score": 97.0, "tactical_stance": "STANDARD"
                }
            }
        })
        .to_string(),
    )
    .unwrap();

    let scanner = Arc::new(FakeScanner::new(report(RiskLevel::Defcon2, vec![], vec![])));
    let notifier = Arc::new(RecordingNotifier::default());
    let advisor = build_advisor(
        &server.uri(),
        test_settings(&config_path),
        &state_dir,
        scanner,
        notifier.clone(),
    )
    .with_plan_manager(Arc::new(PinnedPlanManager));

    let outcome = advisor.run_full_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed(_)));

    let plan = read_json(&state_dir.join(TRADE_PLAN_FILE));
    let avax = &plan["pairs"]["AVAX/USDT"];
    assert_eq!(avax["sl"], 42.0);
    assert_eq!(avax["tp1"], 60.0);
    assert_eq!(avax["strategy_type"], "Pinned");
    // DEFCON 2 forces the stance before the manager sees it
    assert_eq!(avax["tactical_stance"], "DEFENSIVE");
}
