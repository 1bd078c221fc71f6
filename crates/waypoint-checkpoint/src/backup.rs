//! Agent and coordination backups.
//!
//! ```text
//! {memory_dir}/recovery/{agent}_backup.json            latest
//! {memory_dir}/recovery/{agent}_backup_{stamp}.json    history
//! {coordination_dir}/backup/backup_{stamp}.json
//! ```
//! Only the newest `retention` history files are kept per agent and for
//! coordination.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::CheckpointError;
use crate::state::{StateStore, read_json, remove_if_exists, encode_id, write_json};

/// Backed-up memory of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBackup {
    pub agent_id: String,
    pub memory: Value,
    pub backed_up_at: DateTime<Utc>,
}

/// Backed-up coordination state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationBackup {
    pub state: BTreeMap<String, Value>,
    pub backed_up_at: DateTime<Utc>,
}

/// Outcome of a backup cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupReport {
    pub agents: Vec<String>,
    pub coordination: bool,
    pub failures: Vec<String>,
}

pub struct BackupManager {
    state: Arc<dyn StateStore>,
    agent_dir: PathBuf,
    coordination_dir: PathBuf,
    retention: usize,
    last_stamp: AtomicI64,
}

impl BackupManager {
    pub fn new(
        state: Arc<dyn StateStore>,
        memory_dir: impl AsRef<Path>,
        coordination_dir: impl AsRef<Path>,
        retention: usize,
    ) -> Self {
        Self {
            state,
            agent_dir: memory_dir.as_ref().join("recovery"),
            coordination_dir: coordination_dir.as_ref().join("backup"),
            retention: retention.max(1),
            last_stamp: AtomicI64::new(0),
        }
    }

    /// Strictly increasing microsecond stamp for history file names.
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let mut last = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_stamp
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    fn latest_agent_path(&self, agent_id: &str) -> PathBuf {
        self.agent_dir
            .join(format!("{}_backup.json", encode_id(agent_id)))
    }

    /// Back up one agent. Returns `None` when the agent has no memory.
    pub async fn backup_agent(&self, agent_id: &str) -> Result<Option<PathBuf>, CheckpointError> {
        let Some(memory) = self.state.agent_memory(agent_id).await? else {
            return Ok(None);
        };

        let backup = AgentBackup {
            agent_id: agent_id.to_string(),
            memory,
            backed_up_at: Utc::now(),
        };
        let prefix = format!("{}_backup_", encode_id(agent_id));
        let history = self
            .agent_dir
            .join(format!("{}{}.json", prefix, self.next_stamp()));

        write_json(&history, &backup).await?;
        let latest = self.latest_agent_path(agent_id);
        write_json(&latest, &backup).await?;
        self.prune(&self.agent_dir, &prefix).await?;

        debug!("Backed up agent {} to {:?}", agent_id, latest);
        Ok(Some(latest))
    }

    /// Back up every agent known to the state store.
    pub async fn backup_agents(&self) -> BackupReport {
        let mut report = BackupReport::default();
        for agent_id in self.state.agent_ids().await {
            match self.backup_agent(&agent_id).await {
                Ok(Some(_)) => report.agents.push(agent_id),
                Ok(None) => {}
                Err(e) => {
                    warn!("Backup of agent {} failed: {}", agent_id, e);
                    report.failures.push(format!("agent {}: {}", agent_id, e));
                }
            }
        }
        report
    }

    /// Back up the coordination state.
    pub async fn backup_coordination(&self) -> Result<PathBuf, CheckpointError> {
        let backup = CoordinationBackup {
            state: self.state.coordination_state().await?,
            backed_up_at: Utc::now(),
        };
        let path = self
            .coordination_dir
            .join(format!("backup_{}.json", self.next_stamp()));
        write_json(&path, &backup).await?;
        self.prune(&self.coordination_dir, "backup_").await?;

        debug!("Backed up coordination state to {:?}", path);
        Ok(path)
    }

    /// Back up all agents and the coordination state.
    pub async fn run_backup_cycle(&self) -> BackupReport {
        let mut report = self.backup_agents().await;
        match self.backup_coordination().await {
            Ok(_) => report.coordination = true,
            Err(e) => {
                warn!("Coordination backup failed: {}", e);
                report.failures.push(format!("coordination: {}", e));
            }
        }
        info!(
            "Backup cycle: {} agents, coordination {}, {} failures",
            report.agents.len(),
            if report.coordination { "ok" } else { "failed" },
            report.failures.len()
        );
        report
    }

    /// Newest readable backup of an agent, preferring the latest file.
    pub async fn latest_agent_backup(&self, agent_id: &str) -> Option<AgentBackup> {
        let prefix = format!("{}_backup_", encode_id(agent_id));
        let mut candidates = vec![self.latest_agent_path(agent_id)];
        candidates.extend(
            stamped_files(&self.agent_dir, &prefix)
                .await
                .into_iter()
                .map(|(_, path)| path),
        );

        for path in candidates {
            match read_json::<AgentBackup>(&path).await {
                Ok(Some(backup)) => return Some(backup),
                Ok(None) => {}
                Err(e) => warn!("Ignoring unreadable agent backup: {}", e),
            }
        }
        None
    }

    /// Restore an agent from its newest backup. Returns whether one was found.
    pub async fn restore_agent(&self, agent_id: &str) -> Result<bool, CheckpointError> {
        match self.latest_agent_backup(agent_id).await {
            Some(backup) => {
                self.state.write_agent_memory(agent_id, &backup.memory).await?;
                info!(
                    "Restored agent {} from backup taken at {}",
                    agent_id, backup.backed_up_at
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Newest readable coordination backup.
    pub async fn latest_coordination_backup(&self) -> Option<CoordinationBackup> {
        for (_, path) in stamped_files(&self.coordination_dir, "backup_").await {
            match read_json::<CoordinationBackup>(&path).await {
                Ok(Some(backup)) => return Some(backup),
                Ok(None) => {}
                Err(e) => warn!("Ignoring unreadable coordination backup: {}", e),
            }
        }
        None
    }

    /// Restore coordination state from the newest backup. Returns whether one was found.
    pub async fn restore_coordination(&self) -> Result<bool, CheckpointError> {
        match self.latest_coordination_backup().await {
            Some(backup) => {
                self.state.write_coordination_state(&backup.state).await?;
                info!("Restored coordination state from backup taken at {}", backup.backed_up_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn prune(&self, dir: &Path, prefix: &str) -> Result<(), CheckpointError> {
        for (_, path) in stamped_files(dir, prefix).await.into_iter().skip(self.retention) {
            remove_if_exists(&path).await?;
        }
        Ok(())
    }
}

/// Files named `{prefix}{stamp}.json` in `dir`, newest first.
async fn stamped_files(dir: &Path, prefix: &str) -> Vec<(i64, PathBuf)> {
    let mut files = Vec::new();
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return files;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let stamp = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix))
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|stamp| stamp.parse::<i64>().ok());
        if let Some(stamp) = stamp {
            files.push((stamp, path));
        }
    }
    files.sort_by(|a, b| b.0.cmp(&a.0));
    files
}
