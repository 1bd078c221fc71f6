//! Checkpoint store and recovery engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::default_true;

/// Checkpoint store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Whether large checkpoints are gzip-compressed.
    #[serde(default = "default_true")]
    pub compression_enabled: bool,

    /// Serialized size (bytes) above which a checkpoint is compressed.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,

    /// Maximum number of indexed checkpoints kept by cleanup.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,

    /// Checkpoints older than this are removed by cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Reject structurally invalid checkpoints on save.
    #[serde(default = "default_true")]
    pub validation_enabled: bool,

    /// Checkpoint types that fire the version-control hook.
    #[serde(default = "default_hook_types")]
    pub hook_types: Vec<String>,

    /// Shell command run by the version-control hook.
    #[serde(default)]
    pub hook_command: Option<String>,
}

fn default_compression_threshold() -> usize {
    1024
}

fn default_max_checkpoints() -> usize {
    100
}

fn default_retention_days() -> u64 {
    30
}

fn default_hook_types() -> Vec<String> {
    vec![
        "session_end".to_string(),
        "milestone".to_string(),
        "decision_point".to_string(),
    ]
}

impl CheckpointConfig {
    /// Retention window as a duration.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            compression_enabled: default_true(),
            compression_threshold: default_compression_threshold(),
            max_checkpoints: default_max_checkpoints(),
            retention_days: default_retention_days(),
            validation_enabled: default_true(),
            hook_types: default_hook_types(),
            hook_command: None,
        }
    }
}

/// Recovery engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Time budget for a single recovery strategy (in seconds).
    #[serde(default = "default_recovery_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of attempts kept in the in-memory history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_recovery_timeout() -> u64 {
    30
}

fn default_history_limit() -> usize {
    1000
}

impl RecoveryConfig {
    /// Strategy timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_recovery_timeout(),
            history_limit: default_history_limit(),
        }
    }
}
