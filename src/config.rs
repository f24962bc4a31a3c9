//! Configuration for the sync engine and its collaborators
//!
//! Every knob has a default matching the production web client. `AppConfig`
//! reads overrides from `PODSYNC_*` environment variables (a `.env` file is
//! loaded first when present).

use crate::sync::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

const DRAIN_INTERVAL_SECS: u64 = 5 * 60;
const STARTUP_DRAIN_DELAY_MS: u64 = 1000;
const CACHE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;
const PROBE_INTERVAL_SECS: u64 = 30;
const PROBE_TIMEOUT_SECS: u64 = 5;
const REMOTE_TIMEOUT_SECS: u64 = 30;

const DB_FILE_NAME: &str = "podsync.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Engine behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Period of the background drain while online
    pub drain_interval: Duration,
    /// Delay of the first drain after `start()`
    pub startup_drain_delay: Duration,
    /// Delivery attempts per queued mutation
    pub max_attempts: u32,
    pub retry: RetryPolicy,
    /// Default age for `cleanup_old_data`
    pub cache_max_age: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(DRAIN_INTERVAL_SECS),
            startup_drain_delay: Duration::from_millis(STARTUP_DRAIN_DELAY_MS),
            max_attempts: crate::sync::queue::DEFAULT_MAX_ATTEMPTS,
            retry: RetryPolicy::default(),
            cache_max_age: Duration::from_secs(CACHE_MAX_AGE_SECS),
        }
    }
}

/// Reachability probing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Liveness endpoint; derived from the remote base URL when unset
    pub probe_url: Option<String>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_interval: Duration::from_secs(PROBE_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
        }
    }
}

/// REST backend access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the REST API, e.g. `https://project.example.co/rest/v1`
    pub base_url: String,
    /// Sent as both the `apikey` header and the bearer token
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(REMOTE_TIMEOUT_SECS),
        }
    }
}

/// Everything `podsyncd` needs to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub remote: RemoteConfig,
    pub monitor: MonitorConfig,
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is not an error
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("PODSYNC_REMOTE_URL").ok_or(ConfigError::Missing("PODSYNC_REMOTE_URL"))?;
        url::Url::parse(&base_url)?;

        let mut remote = RemoteConfig::new(base_url);
        remote.api_key = lookup("PODSYNC_API_KEY").filter(|key| !key.is_empty());

        let mut monitor = MonitorConfig::default();
        if let Some(probe_url) = lookup("PODSYNC_PROBE_URL") {
            url::Url::parse(&probe_url)?;
            monitor.probe_url = Some(probe_url);
        }
        if let Some(secs) = parse_number(&lookup, "PODSYNC_PROBE_INTERVAL_SECS")? {
            monitor.probe_interval = Duration::from_secs(secs);
        }

        let mut sync = SyncConfig::default();
        if let Some(secs) = parse_number(&lookup, "PODSYNC_DRAIN_INTERVAL_SECS")? {
            sync.drain_interval = Duration::from_secs(secs);
        }
        if let Some(max) = parse_number(&lookup, "PODSYNC_MAX_ATTEMPTS")? {
            sync.max_attempts = u32::try_from(max)
                .ok()
                .filter(|max| *max > 0)
                .ok_or(ConfigError::Invalid {
                    key: "PODSYNC_MAX_ATTEMPTS",
                    value: max.to_string(),
                })?;
        }

        let db_path = match lookup("PODSYNC_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_db_path(),
        };

        Ok(Self {
            db_path,
            remote,
            monitor,
            sync,
        })
    }

    /// Probe endpoint, falling back to `<remote origin>/ping`
    pub fn probe_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.monitor.probe_url {
            return Ok(url.clone());
        }
        let base = url::Url::parse(&self.remote.base_url)?;
        Ok(base.join("/ping")?.to_string())
    }
}

fn parse_number<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// `<platform data dir>/podsync/podsync.db`
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("podsync")
        .join(DB_FILE_NAME)
}
