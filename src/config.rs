//! Configuration module for chatrelay.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{RelayError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Idle timeout in seconds. A connection silent for longer is dropped.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Seconds the listener is given to drain on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Timezone for message timestamps (e.g., "Asia/Shanghai", "UTC").
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_idle_timeout() -> u64 {
    600 // 10 minutes
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            idle_timeout_secs: default_idle_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            timezone: default_timezone(),
        }
    }
}

impl ServerConfig {
    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the history snapshot.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// History snapshot file name inside `data_dir`.
    #[serde(default = "default_history_file")]
    pub history_file: String,
    /// Directory for decoded image uploads.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    /// Directory with the static UI assets.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_history_file() -> String {
    "chat_history.json".to_string()
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

fn default_static_dir() -> String {
    "static".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            history_file: default_history_file(),
            uploads_dir: default_uploads_dir(),
            static_dir: default_static_dir(),
        }
    }
}

impl StorageConfig {
    /// Full path of the history snapshot.
    pub fn history_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join(&self.history_file)
    }
}

/// Relay timing and queueing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Capacity of the broadcast queue. Producers wait when it is full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Delay before a "left" message is emitted, in milliseconds.
    #[serde(default = "default_leave_delay")]
    pub leave_delay_ms: u64,
    /// Window in which a same-origin, same-name reconnect skips the "joined" message.
    #[serde(default = "default_rejoin_window")]
    pub rejoin_window_secs: u64,
    /// Interval between sweeps of stale disconnect records.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Interval between history snapshots.
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_leave_delay() -> u64 {
    2000
}

fn default_rejoin_window() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_persist_interval() -> u64 {
    300 // 5 minutes
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            leave_delay_ms: default_leave_delay(),
            rejoin_window_secs: default_rejoin_window(),
            sweep_interval_secs: default_sweep_interval(),
            persist_interval_secs: default_persist_interval(),
        }
    }
}

impl RelayConfig {
    pub fn leave_delay(&self) -> Duration {
        Duration::from_millis(self.leave_delay_ms)
    }

    pub fn rejoin_window(&self) -> Duration {
        Duration::from_secs(self.rejoin_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/chatrelay.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Relay configuration.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RelayError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CHATRELAY_HOST`: Override the bind host
    /// - `CHATRELAY_PORT`: Override the bind port (ignored if not a valid port)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CHATRELAY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = std::env::var("CHATRELAY_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid CHATRELAY_PORT"),
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - The broadcast queue capacity is zero
    /// - The idle timeout is zero
    /// - A periodic task interval is zero
    pub fn validate(&self) -> Result<()> {
        if self.relay.queue_capacity == 0 {
            return Err(RelayError::Config(
                "relay.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.server.idle_timeout_secs == 0 {
            return Err(RelayError::Config(
                "server.idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.relay.sweep_interval_secs == 0 || self.relay.persist_interval_secs == 0 {
            return Err(RelayError::Config(
                "relay task intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
