//! Configuration types.
//!
//! Two layers:
//! - [`GatewayConfig`]: process-level settings read from the environment at startup.
//! - [`BotSettings`]: runtime-editable settings behind a [`ConfigStore`], changed via
//!   `POST /config/{name}` and persisted as JSON.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ConfigError;

/// Default notification referer attached to text replies.
pub const DEFAULT_REFERER: &str = "Iris";

/// Process-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Where the persisted [`BotSettings`] live.
    pub settings_path: PathBuf,
    /// Interface to bind the HTTP server on.
    pub bind_addr: String,
    /// Overrides `bot_http_port` from the settings file when set.
    pub port_override: Option<u16>,
    /// Optional path to the chat SQLite database served by `/query`.
    pub chat_db_path: Option<PathBuf>,
    /// Referer attached to every text reply.
    pub referer: String,
    /// Per-subscriber queue depth in the broadcast hub.
    pub subscriber_buffer: usize,
    /// How long `publish` waits on a full subscriber before disconnecting it.
    pub subscriber_timeout: Duration,
    /// Directory for rolling log files (stderr only when unset).
    pub log_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("./data/iris-config.json"),
            bind_addr: "0.0.0.0".to_string(),
            port_override: None,
            chat_db_path: None,
            referer: DEFAULT_REFERER.to_string(),
            subscriber_buffer: 64,
            subscriber_timeout: Duration::from_secs(5),
            log_dir: None,
        }
    }
}

impl GatewayConfig {
    /// Build from `IRIS_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            settings_path: std::env::var("IRIS_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
            bind_addr: std::env::var("IRIS_BIND_ADDR").unwrap_or(defaults.bind_addr),
            port_override: std::env::var("IRIS_PORT").ok().and_then(|p| p.parse().ok()),
            chat_db_path: std::env::var("IRIS_CHAT_DB").ok().map(PathBuf::from),
            referer: std::env::var("IRIS_REFERER").unwrap_or(defaults.referer),
            subscriber_buffer: std::env::var("IRIS_SUBSCRIBER_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.subscriber_buffer),
            subscriber_timeout: std::env::var("IRIS_SUBSCRIBER_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.subscriber_timeout),
            log_dir: std::env::var("IRIS_LOG_DIR").ok().map(PathBuf::from),
        }
    }
}

/// Runtime-editable bot settings. Serialized with the same keys `GET /config` returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub bot_name: String,
    pub bot_http_port: u16,
    pub web_server_endpoint: String,
    /// Milliseconds between chat database polls.
    pub db_polling_rate: u64,
    /// Minimum milliseconds between two consecutive executor calls.
    pub message_send_rate: u64,
    pub bot_id: i64,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            bot_name: "Iris".to_string(),
            bot_http_port: 3000,
            web_server_endpoint: String::new(),
            db_polling_rate: 100,
            message_send_rate: 50,
            bot_id: 0,
        }
    }
}

impl BotSettings {
    pub fn message_send_interval(&self) -> Duration {
        Duration::from_millis(self.message_send_rate)
    }

    /// Apply a single validated update.
    pub fn apply(&mut self, update: &ConfigUpdate) {
        match update {
            ConfigUpdate::Endpoint(v) => self.web_server_endpoint = v.clone(),
            ConfigUpdate::BotName(v) => self.bot_name = v.clone(),
            ConfigUpdate::DbPollingRate(v) => self.db_polling_rate = *v,
            ConfigUpdate::MessageSendRate(v) => self.message_send_rate = *v,
            ConfigUpdate::BotPort(v) => self.bot_http_port = *v,
        }
    }
}

/// One validated settings change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdate {
    Endpoint(String),
    BotName(String),
    DbPollingRate(u64),
    MessageSendRate(u64),
    BotPort(u16),
}

impl ConfigUpdate {
    /// Settings key this update writes.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Endpoint(_) => "web_server_endpoint",
            Self::BotName(_) => "bot_name",
            Self::DbPollingRate(_) => "db_polling_rate",
            Self::MessageSendRate(_) => "message_send_rate",
            Self::BotPort(_) => "bot_http_port",
        }
    }
}

/// Read/write access to persisted settings.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current settings snapshot.
    async fn get(&self) -> BotSettings;

    /// Apply an update and return the new snapshot.
    async fn set(&self, update: ConfigUpdate) -> Result<BotSettings, ConfigError>;
}

/// Non-persistent store, used by tests and when no settings file is wanted.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    settings: RwLock<BotSettings>,
}

impl MemoryConfigStore {
    pub fn new(settings: BotSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self) -> BotSettings {
        self.settings.read().await.clone()
    }

    async fn set(&self, update: ConfigUpdate) -> Result<BotSettings, ConfigError> {
        let mut settings = self.settings.write().await;
        settings.apply(&update);
        Ok(settings.clone())
    }
}

/// JSON-file backed store. Every `set` rewrites the file via a temp file + rename.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    settings: RwLock<BotSettings>,
}

impl FileConfigStore {
    /// Load settings from `path`, or start from defaults if the file does not exist yet.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let settings = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No settings file, using defaults");
                BotSettings::default()
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Ok(Self {
            path,
            settings: RwLock::new(settings),
        })
    }

    async fn persist(&self, settings: &BotSettings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "Settings persisted");
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(&self) -> BotSettings {
        self.settings.read().await.clone()
    }

    async fn set(&self, update: ConfigUpdate) -> Result<BotSettings, ConfigError> {
        // The write guard is held across persist so concurrent updates hit the file in order.
        let mut settings = self.settings.write().await;
        let mut next = settings.clone();
        next.apply(&update);
        self.persist(&next).await?;
        *settings = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = BotSettings::default();
        assert_eq!(s.bot_http_port, 3000);
        assert_eq!(s.message_send_interval(), Duration::from_millis(50));
    }

    #[test]
    fn settings_tolerate_missing_keys() {
        let s: BotSettings = serde_json::from_str(r#"{"bot_name":"Nova"}"#).unwrap();
        assert_eq!(s.bot_name, "Nova");
        assert_eq!(s.db_polling_rate, 100);
    }

    #[tokio::test]
    async fn memory_store_applies_updates() {
        let store = MemoryConfigStore::default();
        let next = store.set(ConfigUpdate::MessageSendRate(250)).await.unwrap();
        assert_eq!(next.message_send_rate, 250);
        assert_eq!(store.get().await.message_send_rate, 250);
    }

    #[tokio::test]
    async fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let store = FileConfigStore::load(&path).await.unwrap();
        assert_eq!(store.get().await, BotSettings::default());

        store.set(ConfigUpdate::BotPort(8080)).await.unwrap();
        store
            .set(ConfigUpdate::Endpoint("http://localhost:5000".into()))
            .await
            .unwrap();

        let reloaded = FileConfigStore::load(&path).await.unwrap();
        let settings = reloaded.get().await;
        assert_eq!(settings.bot_http_port, 8080);
        assert_eq!(settings.web_server_endpoint, "http://localhost:5000");
    }

    #[tokio::test]
    async fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = FileConfigStore::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
