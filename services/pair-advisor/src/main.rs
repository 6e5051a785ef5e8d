//! Pair Advisor - decision loop for a trading engine
//!
//! 1. Polls the engine's operational state
//! 2. Scans the market through the intelligence service
//! 3. Selects targets under the current risk level
//! 4. Merges them with open positions into trade plans
//! 5. Pushes the whitelist and reloads the engine

use anyhow::Context;
use tracing::{error, info};

use pair_advisor::{Advisor, EngineSettings, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting Pair Advisor...");

    let settings = Settings::load().context("Failed to load advisor settings")?;
    let engine_settings = EngineSettings::from_file(&settings.engine_config_path)
        .context("Failed to load trading engine config")?;
    info!(
        "Engine: {}, state dir: {}, scanner: {}",
        engine_settings.base_url,
        engine_settings.user_data_dir.display(),
        settings.scanner_url
    );

    let advisor = Advisor::from_settings(settings, &engine_settings)?;
    advisor.store().init().await?;

    if let Err(e) = advisor.engine().login().await {
        error!("Cannot log in to the trading engine at startup: {}", e);
        return Err(e.into());
    }
    let state = advisor.engine().operational_state().await;
    info!("Initial engine state: {}", state);

    advisor.run().await
}
