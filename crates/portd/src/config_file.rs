//! Configuration file support for portd
//!
//! Loads and validates portd configuration from TOML files.
//! Default location: /etc/sonic/portd.conf

use crate::error::{PortdError, Result};
use crate::netlink::DEFAULT_RECV_BUFFER_SIZE;
use crate::tables::{DEFAULT_CONFIG_PATH, DEFAULT_SNAPSHOT_PATH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Smallest accepted netlink receive buffer
pub const MIN_RECV_BUFFER_SIZE: usize = 4096;

/// Netlink socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetlinkConfig {
    /// Receive buffer size for dump and notification datagrams
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,

    /// How often queued kernel notifications are drained, in milliseconds
    #[serde(default = "default_notification_poll_ms")]
    pub notification_poll_ms: u64,
}

/// Desired-state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot holding VRFs, ports, routes and next-hops
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Enable kernel IPv4/IPv6 forwarding at startup
    #[serde(default = "default_ip_forwarding")]
    pub ip_forwarding: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Complete portd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortdConfig {
    #[serde(default)]
    pub netlink: NetlinkConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_recv_buffer_size() -> usize {
    DEFAULT_RECV_BUFFER_SIZE
}

fn default_notification_poll_ms() -> u64 {
    1000
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT_PATH)
}

fn default_ip_forwarding() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetlinkConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: default_recv_buffer_size(),
            notification_poll_ms: default_notification_poll_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            ip_forwarding: default_ip_forwarding(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PortdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                PortdError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(PortdError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PortdError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Notification drain interval as Duration
    pub fn notification_poll_interval(&self) -> Duration {
        Duration::from_millis(self.netlink.notification_poll_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.netlink.recv_buffer_size < MIN_RECV_BUFFER_SIZE {
            return Err(PortdError::Config(format!(
                "recv_buffer_size must be >= {}, got {}",
                MIN_RECV_BUFFER_SIZE, self.netlink.recv_buffer_size
            )));
        }

        if self.netlink.notification_poll_ms == 0 {
            return Err(PortdError::Config(
                "notification_poll_ms must be > 0".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(PortdError::Config(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}
