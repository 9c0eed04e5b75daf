//! Transport configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PROCRPC_CONFIG)
//! 3. Environment variables

use procrpc_protocol::{clamp_buffer_size, DEFAULT_BUFFER_SIZE, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "PROCRPC_CONFIG";

/// procrpc configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket configuration.
    pub network: NetworkConfig,
    /// Connection manager configuration.
    pub reactor: ReactorConfig,
    /// Client call policy.
    pub client: ClientConfig,
    /// Server connection settings.
    pub server: ServerConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.reactor.apply_env_overrides();
        self.client.apply_env_overrides();
    }

    /// Rejects settings the reactor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reactor.max_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "reactor.max_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.reactor.events_capacity == 0 {
            return Err(ConfigError::Validation(
                "reactor.events_capacity must be positive".to_string(),
            ));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "client.request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds to and the client calls.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Datagram buffer size in bytes, clamped to the supported range on use.
    pub buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("PROCRPC_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(size) = std::env::var("PROCRPC_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.buffer_size = n;
            }
        }
    }

    /// Buffer size after clamping.
    pub fn effective_buffer_size(&self) -> usize {
        clamp_buffer_size(self.buffer_size)
    }
}

/// Connection manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Upper bound on a single readiness wait in milliseconds.
    pub max_poll_interval_ms: u64,
    /// Readiness events fetched per wait.
    pub events_capacity: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_poll_interval_ms: 1000,
            events_capacity: 256,
        }
    }
}

impl ReactorConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var("PROCRPC_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.max_poll_interval_ms = ms;
            }
        }
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }
}

/// Client call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-attempt reply timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Additional attempts after the first one times out.
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2000,
            max_retries: 3,
        }
    }
}

impl ClientConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("PROCRPC_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.request_timeout_ms = ms;
            }
        }

        if let Ok(retries) = std::env::var("PROCRPC_MAX_RETRIES") {
            if let Ok(n) = retries.parse() {
                self.max_retries = n;
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Timeout handed to server connections.
    pub reply_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Serializes `SocketAddr` as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
