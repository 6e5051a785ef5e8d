//! Advisor runner - cycle orchestration and the scheduler loop
//!
//! One [`Advisor`] is built at startup and owns every collaborator. Jobs run
//! one at a time from a single `select!` loop; the cycle guard additionally
//! refuses a full cycle while another one is in flight.

use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::client::EngineClient;
use crate::config::{EngineSettings, Settings, TelegramDelivery};
use crate::history::MarketHistory;
use crate::notify::{LogNotifier, Notifications, Notifier, TelegramNotifier};
use crate::planner::{build_plan, rank_recommendations, CarryForwardPlanManager, PlanInputs, PlanManager};
use crate::reconcile::{ConfigPusher, PushOutcome};
use crate::report::{self, PositionHealth};
use crate::scanner::{HttpScanner, MarketScanner};
use crate::schedule::{Job, JobClock};
use crate::store::{
    ExchangeConfig, StateStore, MANAGED_TRADES_FILE, MARKET_HISTORY_FILE, WATCHLIST_FILE,
};
use crate::types::{
    CycleSummary, HealthReport, OpenTrade, OperationalState, Recommendation, TradePlanDocument,
};
use crate::watchlist::WatchlistCache;

/// At most one full cycle in flight
#[derive(Debug, Default)]
pub struct CycleGuard {
    in_progress: AtomicBool,
}

/// Held for the duration of a cycle; releases the guard on drop
#[derive(Debug)]
pub struct CycleTicket<'a> {
    flag: &'a AtomicBool,
}

impl CycleGuard {
    pub fn try_begin(&self) -> Option<CycleTicket<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleTicket {
                flag: &self.in_progress,
            })
    }

    pub fn is_active(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

impl Drop for CycleTicket<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// How a full-cycle trigger ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Another cycle was in flight
    Skipped,
    Aborted { reason: String },
    Completed(CycleSummary),
}

pub struct Advisor {
    settings: Settings,
    engine: EngineClient,
    scanner: Arc<dyn MarketScanner>,
    plan_manager: Arc<dyn PlanManager>,
    notifications: Notifications,
    store: StateStore,
    exchange: ExchangeConfig,
    history: MarketHistory,
    cycle_guard: CycleGuard,
    reported_state: Mutex<Option<OperationalState>>,
    state_poll_failing: AtomicBool,
}

impl Advisor {
    pub fn new(
        settings: Settings,
        engine: EngineClient,
        scanner: Arc<dyn MarketScanner>,
        notifier: Arc<dyn Notifier>,
        store: StateStore,
    ) -> Self {
        let delivery_store = settings.telegram.cleanup_enabled.then(|| store.clone());
        let notifications =
            Notifications::new(notifier, delivery_store, settings.telegram.retention_days);
        let exchange = ExchangeConfig::new(&settings.engine_config_path);
        let history = MarketHistory::new(store.clone(), settings.history.max_entries);

        Self {
            settings,
            engine,
            scanner,
            plan_manager: Arc::new(CarryForwardPlanManager),
            notifications,
            store,
            exchange,
            history,
            cycle_guard: CycleGuard::default(),
            reported_state: Mutex::new(None),
            state_poll_failing: AtomicBool::new(false),
        }
    }

    /// Wire up the production collaborators
    pub fn from_settings(settings: Settings, engine_settings: &EngineSettings) -> Result<Self> {
        let engine = EngineClient::from_settings(engine_settings)?;
        let scanner = HttpScanner::new(
            &settings.scanner_url,
            Duration::from_secs(settings.scanner_timeout_secs),
        )?;

        let notifier: Arc<dyn Notifier> = match settings.telegram.delivery(engine_settings) {
            TelegramDelivery::Ready { token, chat_id } => {
                info!("Telegram delivery enabled");
                Arc::new(TelegramNotifier::new(&token, &chat_id)?)
            }
            TelegramDelivery::MissingCredentials => {
                warn!("Telegram enabled without token/chat_id, reports go to the log");
                Arc::new(LogNotifier)
            }
            TelegramDelivery::Disabled => Arc::new(LogNotifier),
        };

        let store = StateStore::new(&engine_settings.user_data_dir);
        Ok(Self::new(settings, engine, Arc::new(scanner), notifier, store))
    }

    pub fn with_plan_manager(mut self, manager: Arc<dyn PlanManager>) -> Self {
        self.plan_manager = manager;
        self
    }

    pub fn engine(&self) -> &EngineClient {
        &self.engine
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn cycle_guard(&self) -> &CycleGuard {
        &self.cycle_guard
    }

    /// Run the full advisory cycle unless one is already in flight
    pub async fn run_full_cycle(&self) -> Result<CycleOutcome> {
        let Some(_ticket) = self.cycle_guard.try_begin() else {
            warn!("Another full cycle is in progress, skipping this trigger");
            return Ok(CycleOutcome::Skipped);
        };

        let cycle_id = Uuid::new_v4();
        self.full_cycle(cycle_id)
            .instrument(info_span!("cycle", %cycle_id))
            .await
    }

    async fn full_cycle(&self, cycle_id: Uuid) -> Result<CycleOutcome> {
        let started_at = Utc::now();
        info!("Full cycle starting");

        let state = self.poll_state().await;
        self.set_reported_state(state);
        if state == OperationalState::Stopped {
            warn!("Engine is STOPPED, running in advisory mode");
        }
        self.notifications.notify(&report::cycle_start(state)).await;

        if let Err(e) = self.engine.login().await {
            error!("Engine login failed, aborting cycle: {}", e);
            self.notifications.notify(&report::login_failed(&e)).await;
            return Ok(CycleOutcome::Aborted {
                reason: e.to_string(),
            });
        }

        let positions = self.engine.open_positions().await;
        if positions.degraded {
            self.notifications.notify(&report::positions_degraded()).await;
        }
        let prior = self.store.load_trade_plan().await;

        info!("Scanning market (this may take a while)");
        let scan = match self.scanner.scan().await {
            Ok(scan) => scan,
            Err(e) => {
                error!("Market scan failed, aborting cycle: {:#}", e);
                self.notifications.notify(&report::scan_failed(&e)).await;
                return Ok(CycleOutcome::Aborted {
                    reason: format!("{:#}", e),
                });
            }
        };
        let market_state = scan.summary.market_state.clone();
        info!("Market risk: {}", market_state.level);

        let mut reference_pairs: BTreeSet<String> =
            self.settings.always_watch.iter().cloned().collect();
        reference_pairs.extend(scan.summary.reference_pairs.iter().cloned());

        let outcome = build_plan(
            &PlanInputs {
                open_trades: &positions.trades,
                prior_plans: &prior.pairs,
                recommendations: &scan.recommendations,
                market_state: &market_state,
                reference_pairs: &reference_pairs,
                emergency_pair: &self.settings.emergency_fallback_pair,
            },
            self.plan_manager.as_ref(),
        );
        if outcome.fallback_activated {
            warn!(
                "Whitelist fallback activated: {}",
                self.settings.emergency_fallback_pair
            );
        }

        let mut watchlist = WatchlistCache::new(
            self.settings.watchlist.min_score,
            self.settings.watchlist.capacity,
        );
        watchlist.rebuild(&scan.recommendations, started_at);
        match watchlist.persist(&self.store).await {
            Ok(count) => info!("Watchlist saved with {} pairs", count),
            Err(e) => {
                error!("Failed to save watchlist: {:#}", e);
                self.notifications
                    .notify(&report::save_failed(WATCHLIST_FILE, &format!("{:#}", e)))
                    .await;
            }
        }

        let open_pairs: Vec<String> = positions.trades.iter().map(|t| t.pair.clone()).collect();
        let health = self.assess_health(&open_pairs).await;

        let document = TradePlanDocument {
            market_state: market_state.clone(),
            pairs: outcome.plans.clone(),
        };
        self.store.save_trade_plan(&document).await?;

        let applied = match state {
            OperationalState::Running => self.push(&outcome.whitelist).await,
            OperationalState::Stopped => {
                info!("Advisory mode: trade plan written, whitelist and reload skipped");
                false
            }
        };

        let ranked: Vec<Recommendation> = rank_recommendations(&scan.recommendations)
            .into_iter()
            .cloned()
            .collect();
        let (top_grade, other): (Vec<&Recommendation>, Vec<&Recommendation>) =
            ranked.iter().partition(|rec| rec.is_top_grade);

        let summary = CycleSummary {
            cycle_id,
            started_at,
            operational_state: state,
            market_state,
            total_pairs_in_universe: scan.summary.total_pairs_in_universe,
            top_grade_targets: top_grade.iter().map(|rec| rec.pair.clone()).collect(),
            other_targets: other.iter().map(|rec| rec.pair.clone()).collect(),
            new_targets_in_whitelist: outcome.new_targets.clone(),
            final_whitelist: outcome.whitelist.clone(),
            fallback_activated: outcome.fallback_activated,
            applied,
        };

        self.notifications
            .notify(&report::cycle_report(&summary, &ranked, &health, &open_pairs))
            .await;

        self.announce_takeovers(&positions.trades, &document).await;

        if let Err(e) = self.history.record(&summary).await {
            error!("Failed to record market history: {:#}", e);
            self.notifications
                .notify(&report::save_failed(MARKET_HISTORY_FILE, &format!("{:#}", e)))
                .await;
        }

        info!(
            "Full cycle complete: {} whitelisted, applied={}",
            summary.final_whitelist.len(),
            summary.applied
        );
        Ok(CycleOutcome::Completed(summary))
    }

    /// Push to a running engine; true when the files were written
    async fn push(&self, whitelist: &[String]) -> bool {
        let pusher = ConfigPusher::new(
            &self.engine,
            &self.store,
            &self.exchange,
            &self.settings.strategy_name,
            &self.settings.reload,
        );
        match pusher
            .push_config_and_reload(whitelist, self.settings.reload.force_each_cycle)
            .await
        {
            Ok(PushOutcome::ReloadFailed { reason }) => {
                self.notifications.notify(&report::reload_failed(&reason)).await;
                true
            }
            Ok(_) => true,
            Err(e) => {
                error!("Config push failed: {:#}", e);
                self.notifications
                    .notify(&report::job_error("config push", &format!("{:#}", e)))
                    .await;
                false
            }
        }
    }

    async fn assess_health(&self, pairs: &[String]) -> HashMap<String, HealthReport> {
        if pairs.is_empty() {
            return HashMap::new();
        }
        match self.scanner.assess_health(pairs).await {
            Ok(health) => health,
            Err(e) => {
                warn!("Health assessment failed: {:#}", e);
                HashMap::new()
            }
        }
    }

    /// Report each open position the first time it has a plan
    async fn announce_takeovers(&self, trades: &[OpenTrade], document: &TradePlanDocument) {
        let mut managed = self.store.load_managed_trades().await;
        let mut changed = false;

        for trade in trades {
            if managed.contains(&trade.trade_id) {
                continue;
            }
            let Some(plan) = document.pairs.get(&trade.pair) else {
                continue;
            };
            info!(pair = %trade.pair, trade_id = trade.trade_id, "Position now under plan management");
            self.notifications
                .notify(&report::takeover(&trade.pair, plan))
                .await;
            managed.insert(trade.trade_id);
            changed = true;
        }

        if changed {
            if let Err(e) = self.store.save_managed_trades(&managed).await {
                error!("Failed to save managed trade ids: {:#}", e);
                self.notifications
                    .notify(&report::save_failed(MANAGED_TRADES_FILE, &format!("{:#}", e)))
                    .await;
            }
        }
    }

    /// Engine mode for this job. A failed poll falls back to the last known
    /// mode and is reported once until a poll succeeds again.
    async fn poll_state(&self) -> OperationalState {
        let poll = self.engine.poll_state().await;
        match &poll.failure {
            Some(reason) => {
                if !self.state_poll_failing.swap(true, Ordering::AcqRel) {
                    self.notifications
                        .notify(&report::state_unknown(poll.state, reason))
                        .await;
                }
            }
            None => {
                if self.state_poll_failing.swap(false, Ordering::AcqRel) {
                    info!("Engine state poll recovered: {}", poll.state);
                }
            }
        }
        poll.state
    }

    fn set_reported_state(&self, state: OperationalState) -> Option<OperationalState> {
        self.reported_state
            .lock()
            .map(|mut reported| reported.replace(state))
            .unwrap_or(None)
    }

    /// Poll the engine mode; a STOPPED to RUNNING transition starts a cycle
    pub async fn watch_state(&self) -> Result<Option<CycleOutcome>> {
        let current = self.poll_state().await;
        let previous = self.set_reported_state(current);

        let Some(previous) = previous else {
            info!("Engine state: {}", current);
            return Ok(None);
        };
        if previous == current {
            return Ok(None);
        }

        info!("Engine state changed: {} -> {}", previous, current);
        self.notifications
            .notify(&report::state_transition(previous, current))
            .await;

        if current == OperationalState::Running && !self.cycle_guard.is_active() {
            info!("Engine start detected, running a cycle now");
            self.notifications.notify(&report::restart_triggered()).await;
            return self.run_full_cycle().await.map(Some);
        }
        Ok(None)
    }

    /// Health report for open positions; leaves the trade plan alone
    pub async fn monitor_open_trades(&self) -> Result<usize> {
        let positions = self.engine.open_positions().await;
        if positions.degraded {
            self.notifications.notify(&report::positions_degraded()).await;
        }
        if positions.trades.is_empty() {
            info!("No open positions to monitor");
            return Ok(0);
        }

        let plan = self.store.load_trade_plan().await;
        let pairs: Vec<String> = positions.trades.iter().map(|t| t.pair.clone()).collect();
        let mut health = self.assess_health(&pairs).await;

        let rows: Vec<PositionHealth> = positions
            .trades
            .into_iter()
            .map(|trade| PositionHealth {
                health: health.remove(&trade.pair),
                plan: plan.pairs.get(&trade.pair).cloned(),
                trade,
            })
            .collect();

        self.notifications
            .notify(&report::health_report(&rows, Utc::now()))
            .await;
        Ok(rows.len())
    }

    pub async fn cleanup_notifications(&self) -> Result<()> {
        self.notifications.cleanup(Utc::now()).await?;
        Ok(())
    }

    async fn run_job(&self, job: Job) {
        let (name, result) = match job {
            Job::FullCycle => ("full cycle", self.run_full_cycle().await.map(drop)),
            Job::WatchState => ("state watch", self.watch_state().await.map(drop)),
            Job::MonitorPositions => ("position monitor", self.monitor_open_trades().await.map(drop)),
            Job::NotificationCleanup => ("notification cleanup", self.cleanup_notifications().await),
        };

        if let Err(e) = result {
            error!("{} failed: {:#}", name, e);
            self.notifications
                .notify(&report::job_error(name, &format!("{:#}", e)))
                .await;
        }
    }

    /// Run until Ctrl-C. The full cycle and the state watch run once up front.
    pub async fn run(&self) -> Result<()> {
        info!("Advisor starting, engine at {}", self.engine.base_url());

        self.run_job(Job::FullCycle).await;
        self.run_job(Job::WatchState).await;

        let cleanup_enabled = self.settings.telegram.cleanup_enabled;
        let mut clock = JobClock::from_settings(&self.settings.schedule, cleanup_enabled, Utc::now());
        for job in [Job::FullCycle, Job::MonitorPositions] {
            if let Some(next) = clock.next_due(job) {
                info!("Next {:?}: {}", job, next.format("%H:%M:%S UTC"));
            }
        }

        let mut tick = interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for job in clock.take_due(Utc::now()) {
                        self.run_job(job).await;
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping");
                    break;
                }
            }
        }
        Ok(())
    }
}
