use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::data_capture::capture_filter::DEFAULT_FILTER;
use crate::storage::durable_log::DEFAULT_COMPACT_THRESHOLD;

/// Live capture settings shared by every collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Filter expression applied to every decoded frame
    pub filter: String,
    /// Interfaces to capture on. Empty means every eligible interface
    pub interfaces: Vec<String>,
    /// Upper bound on a single blocking packet read
    pub read_timeout_ms: u64,
    /// Largest frame copied out of the kernel
    pub snapshot_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            interfaces: Vec::new(),
            read_timeout_ms: 1000,
            snapshot_len: 65535,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub capacity: usize,
    pub harvest_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 4000,
            harvest_interval_secs: 5,
        }
    }
}

/// Delivery pipeline and per-session task settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub queue_capacity: usize,
    pub report_interval_secs: u64,
    pub retry_backoff_secs: u64,
    pub poll_interval_secs: u64,
    pub spool_path: PathBuf,
    pub compact_threshold_bytes: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 500,
            report_interval_secs: 10,
            retry_backoff_secs: 2,
            poll_interval_secs: 3,
            spool_path: PathBuf::from("/var/lib/bandwidth-reporter/report.log"),
            compact_threshold_bytes: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

/// Remote collector the reports are shipped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub address: String,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9400".to_string(),
            connect_timeout_secs: 5,
            io_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8088,
        }
    }
}
