//! Persistent state - JSON documents under the engine's `user_data_dir`
//!
//! Loads never fail: a missing or corrupt document comes back as its
//! default. Writes go to a temp file first and are renamed into place.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::types::TradePlanDocument;

pub const TRADE_PLAN_FILE: &str = "trade_plan.json";
pub const STRATEGY_OVERRIDES_FILE: &str = "strategy_overrides.json";
pub const WATCHLIST_FILE: &str = "potential_watchlist.json";
pub const MARKET_HISTORY_FILE: &str = "market_history.json";
pub const MANAGED_TRADES_FILE: &str = "managed_trades.json";
pub const DELIVERY_LOG_FILE: &str = "telegram_message_log.json";

/// Typed access to the advisor's state documents
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        Ok(())
    }

    /// Read a document; `None` when missing or unreadable
    pub async fn read_document<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        read_json(&self.path(file)).await
    }

    pub async fn write_document<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        self.init().await?;
        write_json(&self.path(file), value).await
    }

    pub async fn load_trade_plan(&self) -> TradePlanDocument {
        self.read_document(TRADE_PLAN_FILE).await.unwrap_or_default()
    }

    pub async fn save_trade_plan(&self, doc: &TradePlanDocument) -> Result<()> {
        self.write_document(TRADE_PLAN_FILE, doc).await?;
        info!("Saved trade plan: {} pairs, {}", doc.pairs.len(), doc.market_state.level);
        Ok(())
    }

    /// Point every whitelisted pair at the same strategy
    pub async fn save_strategy_overrides(&self, whitelist: &[String], strategy: &str) -> Result<()> {
        let overrides: serde_json::Map<String, Value> = whitelist
            .iter()
            .map(|pair| (pair.clone(), Value::String(strategy.to_string())))
            .collect();
        self.write_document(STRATEGY_OVERRIDES_FILE, &overrides).await?;
        info!("Pointed {} pairs at strategy '{}'", overrides.len(), strategy);
        Ok(())
    }

    pub async fn load_managed_trades(&self) -> BTreeSet<i64> {
        let ids: BTreeSet<i64> = self
            .read_document(MANAGED_TRADES_FILE)
            .await
            .unwrap_or_default();
        debug!("Loaded {} managed trade ids", ids.len());
        ids
    }

    pub async fn save_managed_trades(&self, ids: &BTreeSet<i64>) -> Result<()> {
        self.write_document(MANAGED_TRADES_FILE, ids).await
    }
}

/// Result of rewriting the engine's whitelist
#[derive(Debug, Clone, PartialEq)]
pub enum WhitelistChange {
    Unchanged,
    Updated { previous: Vec<String> },
}

/// The trading engine's own config file; only `exchange.pair_whitelist` is touched
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    path: PathBuf,
}

impl ExchangeConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Value> {
        let raw = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    pub async fn current_whitelist(&self) -> Result<Vec<String>> {
        let config = self.load().await?;
        Ok(whitelist_of(&config))
    }

    /// Replace the whitelist when its contents differ (order-insensitive).
    /// Everything else in the file is written back as read.
    pub async fn replace_whitelist(&self, whitelist: &[String]) -> Result<WhitelistChange> {
        let mut config = self.load().await?;

        let mut current = whitelist_of(&config);
        current.sort();
        let mut wanted = whitelist.to_vec();
        wanted.sort();
        wanted.dedup();

        if current == wanted {
            debug!("Whitelist unchanged ({} pairs)", current.len());
            return Ok(WhitelistChange::Unchanged);
        }

        let Some(exchange) = config.get_mut("exchange").and_then(Value::as_object_mut) else {
            error!("No 'exchange' section in {}, whitelist not written", self.path.display());
            return Ok(WhitelistChange::Unchanged);
        };
        exchange.insert(
            "pair_whitelist".to_string(),
            Value::Array(wanted.iter().cloned().map(Value::String).collect()),
        );

        write_json(&self.path, &config).await?;
        info!(
            "Whitelist updated in {}: {} -> {} pairs",
            self.path.display(),
            current.len(),
            wanted.len()
        );
        Ok(WhitelistChange::Updated { previous: current })
    }
}

fn whitelist_of(config: &Value) -> Vec<String> {
    config
        .get("exchange")
        .and_then(|exchange| exchange.get("pair_whitelist"))
        .and_then(Value::as_array)
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|pair| pair.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Corrupt document {}, using defaults: {}", path.display(), e);
            None
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, content)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;

    debug!("Wrote {}", path.display());
    Ok(())
}
