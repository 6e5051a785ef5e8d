//! Config push and reload protocol
//!
//! Writes the strategy overrides and the engine whitelist, then asks the
//! engine to reload. A reload is skipped when the whitelist is unchanged and
//! the push was not forced.

use anyhow::Result;
use std::time::Duration;
use tracing::{error, info};

use crate::client::EngineClient;
use crate::config::ReloadSettings;
use crate::store::{ExchangeConfig, StateStore, WhitelistChange};

/// What a push did
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Whitelist unchanged, no reload issued
    Unchanged,
    Reloaded { whitelist_changed: bool },
    /// Files are written; the engine picks them up on its next reload
    ReloadFailed { reason: String },
}

pub struct ConfigPusher<'a> {
    engine: &'a EngineClient,
    store: &'a StateStore,
    exchange: &'a ExchangeConfig,
    strategy_name: &'a str,
    pre_settle: Duration,
    post_settle: Duration,
}

impl<'a> ConfigPusher<'a> {
    pub fn new(
        engine: &'a EngineClient,
        store: &'a StateStore,
        exchange: &'a ExchangeConfig,
        strategy_name: &'a str,
        timing: &ReloadSettings,
    ) -> Self {
        Self {
            engine,
            store,
            exchange,
            strategy_name,
            pre_settle: Duration::from_secs(timing.pre_settle_secs),
            post_settle: Duration::from_secs(timing.post_settle_secs),
        }
    }

    /// Write overrides and whitelist, reload if changed or forced.
    /// Errors only for file writes; reload failure is an outcome.
    pub async fn push_config_and_reload(
        &self,
        whitelist: &[String],
        force: bool,
    ) -> Result<PushOutcome> {
        self.store
            .save_strategy_overrides(whitelist, self.strategy_name)
            .await?;

        let change = self.exchange.replace_whitelist(whitelist).await?;
        let whitelist_changed = matches!(change, WhitelistChange::Updated { .. });

        if !whitelist_changed && !force {
            info!("Whitelist unchanged, skipping reload");
            return Ok(PushOutcome::Unchanged);
        }

        info!(
            "Reloading engine (whitelist changed: {}, forced: {}) in {:?}",
            whitelist_changed, force, self.pre_settle
        );
        tokio::time::sleep(self.pre_settle).await;

        match self.engine.reload_config().await {
            Ok(()) => {
                info!("Reload sent, waiting {:?} for the engine to settle", self.post_settle);
                tokio::time::sleep(self.post_settle).await;
                Ok(PushOutcome::Reloaded { whitelist_changed })
            }
            Err(e) => {
                error!("Engine reload failed: {}", e);
                Ok(PushOutcome::ReloadFailed {
                    reason: e.to_string(),
                })
            }
        }
    }
}
