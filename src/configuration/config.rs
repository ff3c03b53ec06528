use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use super::types::*;
use crate::error_handling::types::ConfigError;

/// Environment variable overriding `report.spool_path`.
pub const SPOOL_PATH_ENV: &str = "BWR_SPOOL_PATH";

/// Complete runtime configuration, read from a TOML file.
///
/// Every section is optional and falls back to its documented defaults, so an
/// empty file is a valid configuration:
///
/// ```toml
/// [capture]
/// filter = "udp or tcp"
/// interfaces = ["eth0"]
///
/// [report]
/// queue_capacity = 500
/// spool_path = "/var/lib/bandwidth-reporter/report.log"
///
/// [collector]
/// address = "10.1.0.20:9400"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub store: StoreConfig,
    pub report: ReportConfig,
    pub collector: CollectorConfig,
    pub web: WebConfig,
}

impl Config {
    /// Reads, parses and validates the configuration at `path`, then applies
    /// environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(SPOOL_PATH_ENV) {
            if !path.trim().is_empty() {
                info!("Spool path overridden by {}: {}", SPOOL_PATH_ENV, path);
                self.report.spool_path = path.into();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("store.capacity", self.store.capacity as u64),
            ("store.harvest_interval_secs", self.store.harvest_interval_secs),
            ("report.queue_capacity", self.report.queue_capacity as u64),
            ("report.report_interval_secs", self.report.report_interval_secs),
            ("report.retry_backoff_secs", self.report.retry_backoff_secs),
            ("report.poll_interval_secs", self.report.poll_interval_secs),
            ("capture.read_timeout_ms", self.capture.read_timeout_ms),
            ("capture.snapshot_len", self.capture.snapshot_len as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{} must be > 0", name)));
            }
        }

        if self.report.spool_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "report.spool_path must not be empty".to_string(),
            ));
        }

        self.collector_address()?;
        if self.web.enabled {
            self.web_bind_address()?;
        }
        Ok(())
    }

    pub fn collector_address(&self) -> Result<SocketAddr, ConfigError> {
        self.collector.address.parse().map_err(|_| {
            ConfigError::InvalidValue(format!(
                "collector.address '{}' is not a socket address",
                self.collector.address
            ))
        })
    }

    pub fn web_bind_address(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.web.bind_address.parse().map_err(|_| {
            ConfigError::InvalidValue(format!(
                "web.bind_address '{}' is not an IP address",
                self.web.bind_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.web.port))
    }
}
