//! Configuration for a shapesync client.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Backing-store connection details are normally supplied through the
//! environment and layered on top with [`SyncConfig::from_env`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use shapesync_core::{CanvasId, SessionId};

/// Environment variable overriding [`StoreConfig::endpoint`]
pub const ENV_ENDPOINT: &str = "SHAPESYNC_ENDPOINT";
/// Environment variable overriding [`StoreConfig::credentials`]
pub const ENV_CREDENTIALS: &str = "SHAPESYNC_CREDENTIALS";
/// Environment variable overriding [`SyncConfig::canvas_id`]
pub const ENV_CANVAS_ID: &str = "SHAPESYNC_CANVAS_ID";

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    let config_dir = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        });
    config_dir.join("shapesync").join("config.json")
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub canvas_id: CanvasId,
    /// Connection id for the session store; generated per process when absent
    pub session_id: Option<SessionId>,
    pub store: StoreConfig,
    pub lease: LeaseConfig,
    pub retry: RetryConfig,
    pub cleanup: CleanupConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            canvas_id: CanvasId::from("main"),
            session_id: None,
            store: StoreConfig::default(),
            lease: LeaseConfig::default(),
            retry: RetryConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

/// Backing-store connection details
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub endpoint: Option<String>,
    pub credentials: Option<String>,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Local lease timer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub timeout_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { timeout_ms: 2_000 }
    }
}

impl LeaseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Backoff for retryable store failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            multiplier: 1.5,
        }
    }
}

/// Disconnect cleanup monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// How often the monitor rescans the cleanup namespace
    pub rescan_interval_ms: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            rescan_interval_ms: 5_000,
        }
    }
}

impl CleanupConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms.max(1))
    }
}

impl SyncConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load from [`default_config_path`] if it exists, else defaults
    pub fn load_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() { Self::load(&path) } else { Ok(Self::default()) }
    }

    /// Overlay `SHAPESYNC_*` environment variables
    pub fn from_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(endpoint) = var(ENV_ENDPOINT) {
            self.store.endpoint = Some(endpoint);
        }
        if let Some(credentials) = var(ENV_CREDENTIALS) {
            self.store.credentials = Some(credentials);
        }
        if let Some(canvas) = var(ENV_CANVAS_ID).filter(|c| !c.is_empty()) {
            self.canvas_id = CanvasId::from(canvas);
        }
        self
    }

    /// The configured session id, or a fresh one
    pub fn session_id(&self) -> SessionId {
        self.session_id.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.lease.timeout(), Duration::from_secs(2));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.retry.multiplier, 1.5);
        assert_eq!(config.canvas_id, CanvasId::from("main"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"canvas_id": "board-7", "lease": {{"timeout_ms": 5000}}}}"#).unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.canvas_id, CanvasId::from("board-7"));
        assert_eq!(config.lease.timeout_ms, 5_000);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = SyncConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
    }

    #[test]
    fn environment_overrides_store_settings() {
        let config = SyncConfig::default().with_overrides(|key| match key {
            ENV_ENDPOINT => Some("https://store.example".into()),
            ENV_CREDENTIALS => Some("secret-token".into()),
            ENV_CANVAS_ID => Some("team".into()),
            _ => None,
        });
        assert_eq!(config.store.endpoint.as_deref(), Some("https://store.example"));
        assert_eq!(config.canvas_id, CanvasId::from("team"));
        assert!(!format!("{:?}", config.store).contains("secret-token"));
    }

    #[test]
    fn session_id_is_stable_when_configured() {
        let config = SyncConfig {
            session_id: Some(SessionId::from("tab-1")),
            ..SyncConfig::default()
        };
        assert_eq!(config.session_id(), SessionId::from("tab-1"));
        assert_ne!(SyncConfig::default().session_id(), SyncConfig::default().session_id());
    }
}
