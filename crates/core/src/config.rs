//! Configuration management for the keyserver.
//!
//! The field names of [`FleetConfig`] match the historical `config.json`
//! layout (`user`, `key`, `interval`, `keychain`, `ntp`, `devices`), so an
//! existing JSON config loads unchanged. TOML is accepted as well.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SECS_PER_HOUR: u64 = 3600;

/// Fleet-wide rotation configuration, loaded once per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Principal used to log into every device
    pub user: String,
    /// Private key file for SSH public-key authentication
    pub key: PathBuf,
    /// Rotation interval in hours; one key becomes active per interval
    pub interval: u32,
    /// Name of the key-chain to rotate
    pub keychain: String,
    /// Refuse to rotate unless every device is NTP-synchronized
    #[serde(default)]
    pub ntp: bool,
    /// Ordered device addresses; order drives commit and rollback order
    pub devices: Vec<String>,

    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_cycle_period_hours")]
    pub cycle_period_hours: u64,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,
    #[serde(default)]
    pub log: LogConfig,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Optional file receiving a copy of every log line
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    #[default]
    Json,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_cycle_period_hours() -> u64 {
    24
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8799))
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("keyserver.log"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FleetConfig {
    /// Load a config file. `.toml` files are parsed as TOML, everything
    /// else as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Parse a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parse a TOML document.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    #[cfg(not(feature = "toml"))]
    pub fn from_toml_str(_content: &str) -> Result<Self> {
        Err(ConfigError::Invalid(
            "TOML support is not compiled in".to_string(),
        ))
    }

    /// Check the constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() {
            return Err(ConfigError::Invalid("user must not be empty".to_string()));
        }
        if self.interval == 0 {
            return Err(ConfigError::Invalid(
                "interval must be at least one hour".to_string(),
            ));
        }
        if self.keychain.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "keychain must not be empty".to_string(),
            ));
        }
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one device is required".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_secs must be at least one".to_string(),
            ));
        }
        if self.cycle_period_hours == 0 {
            return Err(ConfigError::Invalid(
                "cycle_period_hours must be at least one".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.devices.len());
        for device in &self.devices {
            if device.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "device address must not be empty".to_string(),
                ));
            }
            if !seen.insert(device.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "device {device} is listed more than once"
                )));
            }
        }

        Ok(())
    }

    /// Number of configured devices
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Time between two consecutive key activations
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval) * SECS_PER_HOUR)
    }

    /// Sleep between two rotation cycles
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(self.cycle_period_hours.saturating_mul(SECS_PER_HOUR))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
