//! Advisor configuration
//!
//! Two sources: the advisor's own layered settings (defaults, optional
//! settings file, `ADVISOR__*` environment) and the trading engine's JSON
//! config, which supplies API credentials and the state directory.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const SETTINGS_PATH_ENV: &str = "ADVISOR_CONFIG";
pub const DEFAULT_SETTINGS_FILE: &str = "advisor.toml";
pub const ENV_PREFIX: &str = "ADVISOR";

/// Configuration errors; all of them stop the process at startup
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Missing required key '{key}' in {path}")]
    MissingKey { path: PathBuf, key: String },

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for SettingsError {
    fn from(e: config::ConfigError) -> Self {
        SettingsError::Invalid(e.to_string())
    }
}

/// Advisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine_config_path: PathBuf,
    pub scanner_url: String,
    pub scanner_timeout_secs: u64,
    pub strategy_name: String,
    pub emergency_fallback_pair: String,
    pub always_watch: Vec<String>,
    pub watchlist: WatchlistSettings,
    pub history: HistorySettings,
    pub reload: ReloadSettings,
    pub schedule: ScheduleSettings,
    pub telegram: TelegramSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine_config_path: PathBuf::from("config.json"),
            scanner_url: "http://127.0.0.1:8765".to_string(),
            scanner_timeout_secs: 900,
            strategy_name: "ExternalSignalStrategy".to_string(),
            emergency_fallback_pair: "USDC/USDT".to_string(),
            always_watch: Vec::new(),
            watchlist: WatchlistSettings::default(),
            history: HistorySettings::default(),
            reload: ReloadSettings::default(),
            schedule: ScheduleSettings::default(),
            telegram: TelegramSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchlistSettings {
    pub min_score: f64,
    pub capacity: usize,
}

impl Default for WatchlistSettings {
    fn default() -> Self {
        Self {
            min_score: crate::watchlist::DEFAULT_MIN_INTEREST_SCORE,
            capacity: crate::watchlist::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub max_entries: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_entries: crate::history::DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadSettings {
    pub pre_settle_secs: u64,
    pub post_settle_secs: u64,
    /// The hourly cycle reloads even when the whitelist is unchanged
    pub force_each_cycle: bool,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            pre_settle_secs: 5,
            post_settle_secs: 20,
            force_each_cycle: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub full_cycle_minute: u32,
    pub monitor_interval_mins: u64,
    pub watch_interval_secs: u64,
    /// `HH:MM`, UTC
    pub cleanup_time: String,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            full_cycle_minute: 2,
            monitor_interval_mins: 15,
            watch_interval_secs: 60,
            cleanup_time: "03:03".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    /// Unset defers to the engine config's `telegram.enabled`
    pub enabled: Option<bool>,
    pub token: Option<String>,
    pub chat_id: Option<String>,
    pub cleanup_enabled: bool,
    pub retention_days: i64,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            enabled: None,
            token: None,
            chat_id: None,
            cleanup_enabled: true,
            retention_days: 7,
        }
    }
}

/// How reports are delivered once settings and engine config are combined
#[derive(Debug, Clone, PartialEq)]
pub enum TelegramDelivery {
    Disabled,
    MissingCredentials,
    Ready { token: String, chat_id: String },
}

impl TelegramSettings {
    /// Resolve delivery; each unset field falls back to the engine config
    pub fn delivery(&self, engine: &EngineSettings) -> TelegramDelivery {
        let enabled = self.enabled.or(engine.telegram_enabled).unwrap_or(false);
        if !enabled {
            return TelegramDelivery::Disabled;
        }
        let token = self.token.clone().or_else(|| engine.telegram_token.clone());
        let chat_id = self.chat_id.clone().or_else(|| engine.telegram_chat_id.clone());
        match (token, chat_id) {
            (Some(token), Some(chat_id)) => TelegramDelivery::Ready { token, chat_id },
            _ => TelegramDelivery::MissingCredentials,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the settings file if present, then environment
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(settings_path().as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("always_watch"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.schedule.full_cycle_minute > 59 {
            return Err(SettingsError::Invalid(format!(
                "schedule.full_cycle_minute must be 0-59, got {}",
                self.schedule.full_cycle_minute
            )));
        }
        if self.schedule.monitor_interval_mins == 0 || self.schedule.watch_interval_secs == 0 {
            return Err(SettingsError::Invalid(
                "schedule intervals must be positive".to_string(),
            ));
        }
        crate::schedule::parse_time_of_day(&self.schedule.cleanup_time).ok_or_else(|| {
            SettingsError::Invalid(format!(
                "schedule.cleanup_time must be HH:MM, got '{}'",
                self.schedule.cleanup_time
            ))
        })?;
        if self.emergency_fallback_pair.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "emergency_fallback_pair must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings file: `$ADVISOR_CONFIG`, else `./advisor.toml`, else the user config dir
fn settings_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(DEFAULT_SETTINGS_FILE);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir().map(|dir| dir.join("pair-advisor").join(DEFAULT_SETTINGS_FILE))
}

/// Trading engine connection details, read from the engine's own config
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub user_data_dir: PathBuf,
    pub telegram_enabled: Option<bool>,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl EngineSettings {
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SettingsError::NotFound(path.to_path_buf()),
            _ => SettingsError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        let config: Value = serde_json::from_str(&raw).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_value(&config, path)
    }

    pub fn from_value(config: &Value, path: &Path) -> Result<Self, SettingsError> {
        let missing = |key: &str| SettingsError::MissingKey {
            path: path.to_path_buf(),
            key: key.to_string(),
        };
        let api = config.get("api_server").ok_or_else(|| missing("api_server"))?;
        let text = |key: &str| {
            api.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| missing(&format!("api_server.{}", key)))
        };

        let ip = text("listen_ip_address")?;
        let port = match api.get("listen_port") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => return Err(missing("api_server.listen_port")),
        };
        let username = text("username")?;
        let password = text("password")?;

        let user_data_dir = config
            .get("user_data_dir")
            .and_then(Value::as_str)
            .unwrap_or("user_data");

        let telegram = config.get("telegram");
        let telegram_field = |key: &str| {
            telegram
                .and_then(|t| t.get(key))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
        };

        Ok(Self {
            base_url: format!("http://{}:{}", ip, port),
            username,
            password,
            user_data_dir: PathBuf::from(user_data_dir),
            telegram_enabled: telegram.and_then(|t| t.get("enabled")).and_then(Value::as_bool),
            telegram_token: telegram_field("token"),
            telegram_chat_id: telegram_field("chat_id"),
        })
    }
}
