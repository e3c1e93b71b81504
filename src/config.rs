//! Configuration
//!
//! Settings are read from a TOML file and then overridden from the
//! environment (a `.env` file is honoured), e.g.
//!
//! ```toml
//! [store]
//! base_url = "https://example-rtdb.firebaseio.com"
//! path_suffix = ".json"
//!
//! [sync]
//! staleness_threshold_secs = 30
//! stream_idle_timeout_secs = 60
//!
//! [server]
//! port = 3000
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ReplicaError;
use crate::logging::LoggingConfig;
use crate::sync::SyncTiming;

pub const ENV_DATABASE_URL: &str = "REPLICA_DATABASE_URL";
pub const ENV_AUTH_TOKEN: &str = "REPLICA_AUTH_TOKEN";
pub const ENV_PORT: &str = "REPLICA_PORT";

/// Remote store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the document store
    pub base_url: String,

    /// Credential appended as the `auth` query parameter
    pub auth_token: Option<String>,

    /// Appended to every resource path (".json" for Firebase-style stores)
    pub path_suffix: String,

    /// Timeout for request/response calls (not the event stream)
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_token: None,
            path_suffix: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_path_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.path_suffix = suffix.into();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), ReplicaError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ReplicaError::Config(format!("invalid base_url {:?}: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ReplicaError::Config(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ReplicaError::Config("request_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Timing of the background loops, in whole seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub reconnect_delay_secs: u64,
    pub watchdog_interval_secs: u64,
    pub staleness_threshold_secs: u64,
    pub stream_idle_timeout_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        let timing = SyncTiming::default();
        Self {
            reconnect_delay_secs: timing.reconnect_delay.as_secs(),
            watchdog_interval_secs: timing.watchdog_interval.as_secs(),
            staleness_threshold_secs: timing.staleness_threshold.as_secs(),
            stream_idle_timeout_secs: timing.stream_idle_timeout.as_secs(),
        }
    }
}

impl From<&SyncSection> for SyncTiming {
    fn from(section: &SyncSection) -> Self {
        SyncTiming {
            reconnect_delay: Duration::from_secs(section.reconnect_delay_secs),
            watchdog_interval: Duration::from_secs(section.watchdog_interval_secs),
            staleness_threshold: Duration::from_secs(section.staleness_threshold_secs),
            stream_idle_timeout: Duration::from_secs(section.stream_idle_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    pub store: StoreConfig,
    pub sync: SyncSection,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl ReplicaConfig {
    /// Read the file (if given and present), apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_DATABASE_URL) {
            self.store.base_url = url;
        }
        if let Ok(token) = std::env::var(ENV_AUTH_TOKEN) {
            self.store.auth_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(port) = std::env::var(ENV_PORT).ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        if self.sync.watchdog_interval_secs == 0 {
            anyhow::bail!("sync.watchdog_interval_secs must be > 0");
        }
        if self.sync.stream_idle_timeout_secs == 0 {
            anyhow::bail!("sync.stream_idle_timeout_secs must be > 0");
        }
        Ok(())
    }

    pub fn timing(&self) -> SyncTiming {
        SyncTiming::from(&self.sync)
    }
}
