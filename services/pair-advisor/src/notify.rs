//! Operator notifications
//!
//! Reports go to a chat (Telegram) or, when that is disabled, to the log.
//! Delivered message ids are kept in a delivery log so old messages can be
//! retracted by the daily cleanup.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::store::{StateStore, DELIVERY_LOG_FILE};

pub type DeliveryId = i64;

/// Chat message length limit, in characters
pub const MAX_MESSAGE_CHARS: usize = 4096;

const TELEGRAM_API: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(20);
const DELETE_TIMEOUT: Duration = Duration::from_secs(5);
const PART_PAUSE: Duration = Duration::from_millis(500);

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`, returning the id of every message that went out.
    /// Failures are logged, never raised.
    async fn send(&self, text: &str) -> Vec<DeliveryId>;

    /// Retract a delivered message. `Ok(false)` when the chat refused.
    async fn delete(&self, id: DeliveryId) -> Result<bool>;
}

/// Split at the last newline before the limit, or hard-cut when there is none.
/// Blank parts are dropped.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max_chars {
        let limit = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(remaining.len());
        let cut = remaining[..limit].rfind('\n').unwrap_or(limit);
        parts.push(remaining[..cut].to_string());
        remaining = remaining[cut..].trim_start();
    }
    if !remaining.is_empty() {
        parts.push(remaining.to_string());
    }

    parts.retain(|part| !part.trim().is_empty());
    parts
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    result: Option<TelegramMessage>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: DeliveryId,
}

pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Result<Self> {
        Self::with_api_base(TELEGRAM_API, token, chat_id)
    }

    pub fn with_api_base(api_base: &str, token: &str, chat_id: &str) -> Result<Self> {
        let client = Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn send_part(&self, text: &str) -> Result<DeliveryId> {
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .timeout(SEND_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("sendMessage failed: {} - {}", status, text));
        }

        let body: TelegramResponse = response.json().await?;
        match (body.ok, body.result) {
            (true, Some(message)) => Ok(message.message_id),
            _ => Err(anyhow!(
                "sendMessage not accepted: {}",
                body.description.unwrap_or_default()
            )),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Vec<DeliveryId> {
        let parts = split_message(text, MAX_MESSAGE_CHARS);
        if parts.len() > 1 {
            warn!(
                "Message too long ({} chars), sending in {} parts",
                text.chars().count(),
                parts.len()
            );
        }

        let mut ids = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(PART_PAUSE).await;
            }
            match self.send_part(part).await {
                Ok(id) => ids.push(id),
                Err(e) => error!("Failed to send Telegram message (part {}/{}): {}", i + 1, parts.len(), e),
            }
        }
        ids
    }

    async fn delete(&self, id: DeliveryId) -> Result<bool> {
        let payload = serde_json::json!({ "chat_id": self.chat_id, "message_id": id });
        let response = self
            .client
            .post(self.method_url("deleteMessage"))
            .json(&payload)
            .timeout(DELETE_TIMEOUT)
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

/// Writes reports to the log when chat delivery is off
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Vec<DeliveryId> {
        info!(target: "pair_advisor::report", "\n{}", text);
        Vec::new()
    }

    async fn delete(&self, _id: DeliveryId) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub message_id: DeliveryId,
    pub timestamp: String,
}

impl DeliveryRecord {
    /// RFC 3339, or a naive ISO timestamp taken as UTC
    fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CleanupStats {
    pub deleted: usize,
    pub refused: usize,
    pub kept: usize,
}

/// Notification sink with optional delivery bookkeeping
#[derive(Clone)]
pub struct Notifications {
    notifier: Arc<dyn Notifier>,
    store: Option<StateStore>,
    retention: ChronoDuration,
}

impl Notifications {
    /// `store` is where delivery ids are logged; `None` disables cleanup
    pub fn new(notifier: Arc<dyn Notifier>, store: Option<StateStore>, retention_days: i64) -> Self {
        Self {
            notifier,
            store,
            retention: ChronoDuration::days(retention_days),
        }
    }

    pub async fn notify(&self, text: &str) {
        let ids = self.notifier.send(text).await;
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.record_deliveries(&ids, Utc::now()).await {
            error!("Failed to record delivered message ids: {:#}", e);
        }
    }

    async fn record_deliveries(&self, ids: &[DeliveryId], now: DateTime<Utc>) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut log = delivery_log(store).await;
        log.extend(ids.iter().map(|&message_id| DeliveryRecord {
            message_id,
            timestamp: now.to_rfc3339(),
        }));
        store.write_document(DELIVERY_LOG_FILE, &log).await
    }

    /// Retract deliveries older than the retention window. Entries whose
    /// retraction could not be attempted, or whose timestamp is unreadable,
    /// stay in the log.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupStats> {
        let mut stats = CleanupStats::default();
        let Some(store) = &self.store else {
            return Ok(stats);
        };

        let log = delivery_log(store).await;
        if log.is_empty() {
            return Ok(stats);
        }

        let cutoff = now - self.retention;
        let mut keep = Vec::new();
        for record in log {
            match record.sent_at() {
                Some(sent_at) if sent_at < cutoff => match self.notifier.delete(record.message_id).await {
                    Ok(true) => stats.deleted += 1,
                    Ok(false) => {
                        debug!("Message {} could not be deleted, dropping it", record.message_id);
                        stats.refused += 1;
                    }
                    Err(e) => {
                        warn!("Failed to delete message {}: {}", record.message_id, e);
                        keep.push(record);
                    }
                },
                _ => keep.push(record),
            }
        }

        stats.kept = keep.len();
        store.write_document(DELIVERY_LOG_FILE, &keep).await?;
        info!(
            "Notification cleanup: {} deleted, {} refused, {} kept",
            stats.deleted, stats.refused, stats.kept
        );
        Ok(stats)
    }
}

async fn delivery_log(store: &StateStore) -> Vec<DeliveryRecord> {
    store
        .read_document(DELIVERY_LOG_FILE)
        .await
        .unwrap_or_default()
}
