//! Configuration loading for hushd.
//!
//! Configuration is loaded from a TOML file (default: `hush.toml`). Every
//! field has a default, so an empty file is a valid configuration.

use hush_core::StalenessPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for hushd.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Local store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Trust revalidation configuration.
    #[serde(default)]
    pub trust: TrustConfig,
    /// Relay stream configuration.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Remote API configuration.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// RPC endpoint configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

/// Local store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

/// Trust revalidation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TrustConfig {
    /// Seconds between check cycles (default: 3600 = 1 hour).
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Seconds before a successful check goes stale (default: 24 hours).
    #[serde(default = "default_success_expiry")]
    pub success_expiry_secs: u64,
    /// Seconds before a failed check is retried (default: 1 hour).
    #[serde(default = "default_failure_expiry")]
    pub failure_expiry_secs: u64,
    /// How long lock waits for the scheduler to exit (default: 1000ms).
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

/// Relay stream configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Keepalive interval in seconds (default: 50).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Capacity of the reader → dispatcher channel (default: 16).
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Remote API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the remote API.
    #[serde(default = "default_remote_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

/// RPC endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address (default: 127.0.0.1:22405).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG` (default: "info").
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("hush.db")
}

fn default_check_interval() -> u64 {
    3600 // 1 hour
}

fn default_success_expiry() -> u64 {
    24 * 60 * 60 // 24 hours
}

fn default_failure_expiry() -> u64 {
    60 * 60 // 1 hour
}

fn default_stop_timeout_ms() -> u64 {
    1000
}

fn default_ping_interval() -> u64 {
    50
}

fn default_event_buffer() -> usize {
    16
}

fn default_remote_url() -> String {
    "http://127.0.0.1:22406".to_string()
}

fn default_remote_timeout() -> u64 {
    30
}

fn default_http_bind() -> String {
    "127.0.0.1:22405".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            success_expiry_secs: default_success_expiry(),
            failure_expiry_secs: default_failure_expiry(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_url(),
            timeout_secs: default_remote_timeout(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl TrustConfig {
    /// Interval between check cycles.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Bound on how long stopping waits for the scheduler.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Staleness rule built from the configured expiries.
    pub fn staleness(&self) -> StalenessPolicy {
        StalenessPolicy::new(
            Duration::from_secs(self.success_expiry_secs),
            Duration::from_secs(self.failure_expiry_secs),
        )
    }
}

impl RelayConfig {
    /// Keepalive interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl RemoteConfig {
    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}
