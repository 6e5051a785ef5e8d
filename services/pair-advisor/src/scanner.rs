//! Market intelligence client
//!
//! The scanner ranks the tradable universe and classifies the health of
//! open positions. Scoring itself happens on the scanner side.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::types::{HealthReport, ScanReport};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(120);

#[async_trait]
pub trait MarketScanner: Send + Sync {
    /// Full universe scan
    async fn scan(&self) -> Result<ScanReport>;

    /// Short-term health for each of `pairs`; pairs without a verdict are omitted
    async fn assess_health(&self, pairs: &[String]) -> Result<HashMap<String, HealthReport>>;
}

#[derive(Serialize)]
struct HealthRequest<'a> {
    pairs: &'a [String],
}

/// Scanner reached over HTTP
pub struct HttpScanner {
    base_url: String,
    http_client: Client,
    scan_timeout: Duration,
}

impl HttpScanner {
    pub fn new(base_url: &str, scan_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(scan_timeout)
            .pool_max_idle_per_host(2)
            .build()?;

        info!(
            "Scanner client initialized: url={}, timeout={}s",
            base_url,
            scan_timeout.as_secs()
        );

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            scan_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Scanner request {} timed out after {:?}", path, timeout)
                } else if e.is_connect() {
                    anyhow!("Failed to connect to scanner at {}: {}", url, e)
                } else {
                    anyhow!("Scanner request failed: {}", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Scanner returned error: status={}, body={}", status, error_text);
            return Err(anyhow!("Scanner {} failed with status {}: {}", path, status, error_text));
        }
        Ok(response)
    }
}

#[async_trait]
impl MarketScanner for HttpScanner {
    async fn scan(&self) -> Result<ScanReport> {
        debug!("Requesting market scan");
        let report: ScanReport = self
            .post("/v1/scan", &serde_json::json!({}), self.scan_timeout)
            .await?
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse scan response: {}", e))?;

        info!(
            "Scan complete: {} recommendations, {} pairs in universe, {}",
            report.recommendations.len(),
            report.summary.total_pairs_in_universe,
            report.summary.market_state.level
        );
        Ok(report)
    }

    async fn assess_health(&self, pairs: &[String]) -> Result<HashMap<String, HealthReport>> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        self.post("/v1/health", &HealthRequest { pairs }, HEALTH_TIMEOUT)
            .await?
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse health response: {}", e))
    }
}
