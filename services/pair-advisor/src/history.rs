//! Market history - newest-first ring of cycle summaries

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::store::{StateStore, MARKET_HISTORY_FILE};

pub const DEFAULT_MAX_ENTRIES: usize = 72;

#[derive(Debug, Clone)]
pub struct MarketHistory {
    store: StateStore,
    max_entries: usize,
}

impl MarketHistory {
    pub fn new(store: StateStore, max_entries: usize) -> Self {
        Self { store, max_entries }
    }

    /// Stored entries, newest first. Unreadable history is empty.
    pub async fn entries(&self) -> Vec<Value> {
        self.store
            .read_document::<Vec<Value>>(MARKET_HISTORY_FILE)
            .await
            .unwrap_or_default()
    }

    /// Prepend, truncate, persist
    pub async fn record<T: Serialize>(&self, entry: &T) -> Result<usize> {
        let mut entries = self.entries().await;
        entries.insert(0, serde_json::to_value(entry)?);
        entries.truncate(self.max_entries);

        self.store.write_document(MARKET_HISTORY_FILE, &entries).await?;
        debug!("Market history now holds {} entries", entries.len());
        Ok(entries.len())
    }
}
