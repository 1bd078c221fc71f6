//! Auto-recovery monitor and logging configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::default_true;

/// Auto-recovery monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Dispatch recoveries from health checks and error events.
    #[serde(default = "default_true")]
    pub auto_recovery: bool,

    /// Run the snapshot integrity check alongside health checks.
    #[serde(default = "default_true")]
    pub integrity_check: bool,

    /// Health check interval (in seconds).
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,

    /// Backup interval (in seconds).
    #[serde(default = "default_backup_interval")]
    pub backup_interval_secs: u64,

    /// Number of backups kept per agent and for coordination state.
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,

    /// Metrics logging interval (in seconds).
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_health_interval() -> u64 {
    30
}

fn default_backup_interval() -> u64 {
    300 // 5 minutes
}

fn default_backup_retention() -> usize {
    5
}

fn default_metrics_interval() -> u64 {
    60
}

impl MonitorConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_secs)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            auto_recovery: default_true(),
            integrity_check: default_true(),
            health_check_interval_secs: default_health_interval(),
            backup_interval_secs: default_backup_interval(),
            backup_retention: default_backup_retention(),
            metrics_interval_secs: default_metrics_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily rolling log files. Console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            directory: None,
        }
    }
}
