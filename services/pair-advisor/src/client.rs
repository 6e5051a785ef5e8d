//! Trading engine API client
//!
//! Basic-auth REST client for the engine's `/api/v1` endpoints. `login` and
//! `reload_config` report failures; the state and position polls degrade to
//! a fallback value instead.

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::EngineSettings;
use crate::types::{OpenTrade, OperationalState};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Trading engine unreachable: {0}")]
    Unreachable(String),

    #[error("Trading engine rejected request: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response from trading engine: {0}")]
    InvalidResponse(String),
}

/// Open positions, flagged when the fetch failed and the list is a stand-in
#[derive(Debug, Clone, Default)]
pub struct OpenPositions {
    pub trades: Vec<OpenTrade>,
    pub degraded: bool,
}

/// Engine mode from one poll; `failure` is set when it is the last known mode
#[derive(Debug, Clone, PartialEq)]
pub struct StatePoll {
    pub state: OperationalState,
    pub failure: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShowConfigResponse {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReloadResponse {
    status: Option<String>,
}

pub struct EngineClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    last_known: Mutex<OperationalState>,
}

impl EngineClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            last_known: Mutex::new(OperationalState::Running),
        })
    }

    pub fn from_settings(settings: &EngineSettings) -> Result<Self, EngineError> {
        Self::new(&settings.base_url, &settings.username, &settings.password)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str, timeout: Duration) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
            .timeout(timeout)
    }

    fn post(&self, path: &str, timeout: Duration) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
            .timeout(timeout)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, EngineError> {
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(EngineError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Authenticated probe; failure aborts the cycle
    pub async fn login(&self) -> Result<(), EngineError> {
        self.send(self.get("/api/v1/balance", PROBE_TIMEOUT)).await?;
        debug!("Logged in to trading engine at {}", self.base_url);
        Ok(())
    }

    async fn fetch_state(&self) -> Result<OperationalState, EngineError> {
        let response = self.send(self.get("/api/v1/show_config", PROBE_TIMEOUT)).await?;
        let body: ShowConfigResponse = response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

        let raw = body
            .state
            .ok_or_else(|| EngineError::InvalidResponse("missing 'state'".to_string()))?;
        OperationalState::parse(&raw)
            .ok_or_else(|| EngineError::InvalidResponse(format!("unknown state '{}'", raw)))
    }

    /// Current engine mode. On failure, or an unrecognised mode, the last
    /// known mode is returned; before the first successful poll that is RUNNING.
    pub async fn poll_state(&self) -> StatePoll {
        match self.fetch_state().await {
            Ok(state) => {
                if let Ok(mut last) = self.last_known.lock() {
                    *last = state;
                }
                StatePoll {
                    state,
                    failure: None,
                }
            }
            Err(e) => {
                let last = self.last_known_state();
                warn!("Engine state poll failed, assuming {}: {}", last, e);
                StatePoll {
                    state: last,
                    failure: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn operational_state(&self) -> OperationalState {
        self.poll_state().await.state
    }

    pub fn last_known_state(&self) -> OperationalState {
        self.last_known
            .lock()
            .map(|state| *state)
            .unwrap_or(OperationalState::Running)
    }

    pub async fn fetch_open_positions(&self) -> Result<Vec<OpenTrade>, EngineError> {
        let response = self.send(self.get("/api/v1/status", CALL_TIMEOUT)).await?;
        response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))
    }

    /// Open positions; an empty, degraded list when the engine can't be read
    pub async fn open_positions(&self) -> OpenPositions {
        match self.fetch_open_positions().await {
            Ok(trades) => {
                debug!("Engine reports {} open positions", trades.len());
                OpenPositions {
                    trades,
                    degraded: false,
                }
            }
            Err(e) => {
                error!("Failed to fetch open positions, continuing with none: {}", e);
                OpenPositions {
                    trades: Vec::new(),
                    degraded: true,
                }
            }
        }
    }

    pub async fn reload_config(&self) -> Result<(), EngineError> {
        let response = self.send(self.post("/api/v1/reload_config", CALL_TIMEOUT)).await?;
        let status = response
            .json::<ReloadResponse>()
            .await
            .ok()
            .and_then(|body| body.status)
            .unwrap_or_else(|| "unknown".to_string());
        info!("Engine reload requested: {}", status);
        Ok(())
    }
}
