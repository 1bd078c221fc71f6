//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod schema_engine;
mod schema_monitor;

pub use schema_engine::*;
pub use schema_monitor::*;

/// Shared default helper used by submodules.
pub(crate) fn default_true() -> bool {
    true
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// On-disk layout.
///
/// ```text
/// {checkpoint_dir}/<type>_<id>.json
/// {checkpoint_dir}/compressed/<type>_<id>.json.gz
/// {checkpoint_dir}/archived/session_<session>_<ts>.json
/// {memory_dir}/sessions/<session>/session_memory.json
/// {memory_dir}/recovery/<agent>_backup.json
/// {coordination_dir}/backup/backup_<ts>.json
/// {recovery_log}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for checkpoint files.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Root directory for agent, shared and global memory.
    #[serde(default = "default_memory_dir")]
    pub memory_dir: PathBuf,

    /// Root directory for coordination state.
    #[serde(default = "default_coordination_dir")]
    pub coordination_dir: PathBuf,

    /// Append-only NDJSON recovery audit log.
    #[serde(default = "default_recovery_log")]
    pub recovery_log: PathBuf,
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".waypoint"))
        .unwrap_or_else(|| PathBuf::from("/tmp/waypoint"))
}

fn default_checkpoint_dir() -> PathBuf {
    base_dir().join("checkpoints")
}

fn default_memory_dir() -> PathBuf {
    base_dir().join("memory")
}

fn default_coordination_dir() -> PathBuf {
    base_dir().join("coordination")
}

fn default_recovery_log() -> PathBuf {
    base_dir().join("logs").join("recovery.log")
}

impl StorageConfig {
    /// Lay every directory out under a single root.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            checkpoint_dir: root.join("checkpoints"),
            memory_dir: root.join("memory"),
            coordination_dir: root.join("coordination"),
            recovery_log: root.join("logs").join("recovery.log"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            memory_dir: default_memory_dir(),
            coordination_dir: default_coordination_dir(),
            recovery_log: default_recovery_log(),
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
