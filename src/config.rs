//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity and logging.
    #[serde(default)]
    pub server: ServerConfig,
    /// WebSocket listen configuration.
    pub listen: ListenConfig,
    /// HTTP collaborator (room API, health, metrics).
    pub http: HttpConfig,
    /// Shared state store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Room record database.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Room and coordination tunables.
    #[serde(default)]
    pub rooms: RoomsConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console output.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

/// Server identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name used in logs.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            log_format: default_log_format(),
        }
    }
}

fn default_server_name() -> String {
    "blockshare".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// WebSocket listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to accept workspace connections on.
    pub address: SocketAddr,
}

/// HTTP collaborator listener.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Address for `/room/{room_id}/`, `/healthz`, and `/metrics`.
    pub address: SocketAddr,
}

/// Shared state store backend selection.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend type: "redis" or "memory".
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// Store URL for the redis backend. Overridden by `REDIS_URL`.
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: default_store_url(),
        }
    }
}

impl StoreConfig {
    /// Resolve the effective store URL: the `REDIS_URL` environment
    /// variable wins over the configured value.
    pub fn effective_url(&self) -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| self.url.clone())
    }
}

fn default_store_backend() -> String {
    "redis".to_string()
}

fn default_store_url() -> String {
    "redis://localhost:6379/0".to_string()
}

/// Room record database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "blockshare.db".to_string()
}

/// Room and coordination tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// `max_users` assigned to lazily created room records.
    #[serde(default = "default_max_users")]
    pub default_max_users: u32,
    /// Block lock TTL in milliseconds.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    /// Presence entry TTL in seconds.
    #[serde(default = "default_presence_ttl_secs")]
    pub presence_ttl_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            default_max_users: default_max_users(),
            lock_ttl_ms: default_lock_ttl_ms(),
            presence_ttl_secs: default_presence_ttl_secs(),
        }
    }
}

fn default_max_users() -> u32 {
    10
}

fn default_lock_ttl_ms() -> u64 {
    crate::locks::DEFAULT_LOCK_TTL_MS
}

fn default_presence_ttl_secs() -> u64 {
    crate::presence::DEFAULT_PRESENCE_TTL_SECS
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Validate the configuration, collecting every error before startup.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    match config.store.backend.as_str() {
        "redis" | "memory" => {}
        other => errors.push(format!(
            "store.backend must be \"redis\" or \"memory\", got \"{other}\""
        )),
    }

    if config.store.backend == "redis" && !config.store.effective_url().starts_with("redis://") {
        errors.push(format!(
            "store.url must be a redis:// URL, got \"{}\"",
            config.store.url
        ));
    }

    if config.rooms.default_max_users == 0 {
        errors.push("rooms.default_max_users must be positive".to_string());
    }

    if config.rooms.lock_ttl_ms == 0 {
        errors.push("rooms.lock_ttl_ms must be positive".to_string());
    }

    if config.rooms.presence_ttl_secs == 0 {
        errors.push("rooms.presence_ttl_secs must be positive".to_string());
    }

    if config.listen.address == config.http.address {
        errors.push("listen.address and http.address must differ".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
