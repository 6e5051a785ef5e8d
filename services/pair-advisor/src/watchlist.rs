//! Watchlist cache - score-ranked memory of interesting pairs
//!
//! Rebuilt from scratch every cycle; nothing carries over from the previous
//! cycle's contents.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::store::{StateStore, WATCHLIST_FILE};
use crate::types::Recommendation;

pub const DEFAULT_MIN_INTEREST_SCORE: f64 = 50.0;
pub const DEFAULT_CAPACITY: usize = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub last_score: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WatchlistCache {
    min_score: f64,
    capacity: usize,
    entries: HashMap<String, WatchlistEntry>,
}

impl WatchlistCache {
    pub fn new(min_score: f64, capacity: usize) -> Self {
        Self {
            min_score,
            capacity,
            entries: HashMap::new(),
        }
    }

    /// Insert or overwrite the pair when its score is strictly above the threshold
    pub fn record_if_interesting(&mut self, pair: &str, score: f64, now: DateTime<Utc>) -> bool {
        if score > self.min_score {
            self.entries.insert(
                pair.to_string(),
                WatchlistEntry {
                    last_score: score,
                    timestamp: now,
                },
            );
            true
        } else {
            false
        }
    }

    /// Replace the contents with this cycle's recommendations
    pub fn rebuild(&mut self, recommendations: &[Recommendation], now: DateTime<Utc>) {
        self.entries.clear();
        for rec in recommendations {
            self.record_if_interesting(&rec.pair, rec.final_score, now);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// At most `capacity` entries, best score first. Ties fall back to pair name.
    pub fn ranked(&self) -> Vec<(&str, &WatchlistEntry)> {
        let mut ranked: Vec<(&str, &WatchlistEntry)> = self
            .entries
            .iter()
            .map(|(pair, entry)| (pair.as_str(), entry))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.last_score
                .total_cmp(&a.1.last_score)
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(self.capacity);
        ranked
    }

    /// Document written to disk, in rank order
    pub fn to_document(&self) -> serde_json::Map<String, serde_json::Value> {
        self.ranked()
            .into_iter()
            .map(|(pair, entry)| {
                (
                    pair.to_string(),
                    serde_json::json!({
                        "last_score": entry.last_score,
                        "timestamp": entry.timestamp.to_rfc3339(),
                    }),
                )
            })
            .collect()
    }

    pub async fn persist(&self, store: &StateStore) -> Result<usize> {
        let doc = self.to_document();
        store.write_document(WATCHLIST_FILE, &doc).await?;
        Ok(doc.len())
    }
}

impl Default for WatchlistCache {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTEREST_SCORE, DEFAULT_CAPACITY)
    }
}
