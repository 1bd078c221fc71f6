//! Checkpoint storage.
//!
//! Checkpoints are stored as individual JSON files, gzip-compressed above the
//! configured size threshold:
//! ```text
//! {checkpoint_dir}/
//! ├── {type}_{id}.json
//! ├── compressed/
//! │   └── {type}_{id}.json.gz
//! └── archived/
//!     └── session_{session_id}_{ts}.json
//! ```
//! An in-memory index mirrors the directory and is rebuilt on open.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::fs;
use tracing::{debug, info, warn};

use waypoint_config::CheckpointConfig;

use crate::checkpoint::{Checkpoint, CheckpointType};
use crate::error::CheckpointError;
use crate::events::{EngineEvent, ErrorKind, EventBus, context};
use crate::state::remove_if_exists;
use crate::validation::Validator;

const COMPRESSED_DIR: &str = "compressed";
const ARCHIVED_DIR: &str = "archived";
const MAX_FAILED_OPERATIONS: usize = 100;

/// Selection criteria for [`FileCheckpointStore::list`].
#[derive(Debug, Clone, Default)]
pub struct CheckpointFilter {
    pub session_id: Option<String>,
    pub checkpoint_type: Option<CheckpointType>,
    pub limit: Option<usize>,
}

impl CheckpointFilter {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn of_type(checkpoint_type: CheckpointType) -> Self {
        Self {
            checkpoint_type: Some(checkpoint_type),
            ..Self::default()
        }
    }

    fn matches(&self, checkpoint: &Checkpoint) -> bool {
        if let Some(session_id) = &self.session_id {
            if checkpoint.session_id.as_deref() != Some(session_id.as_str()) {
                return false;
            }
        }
        if let Some(checkpoint_type) = self.checkpoint_type {
            if checkpoint.checkpoint_type != checkpoint_type {
                return false;
            }
        }
        true
    }
}

/// A store operation that failed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedOperation {
    pub operation: String,
    pub checkpoint_id: Option<String>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of a retention pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Ids removed because they exceeded the retention age.
    pub expired: Vec<String>,
    /// Ids removed because the store exceeded its maximum count.
    pub evicted: Vec<String>,
    /// Unindexed files removed by modification time.
    pub stale_files: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.expired.len() + self.evicted.len() + self.stale_files
    }
}

/// Store health summary.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub total: usize,
    pub compressed: usize,
    pub by_type: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub failed_operations: Vec<FailedOperation>,
    pub warnings: Vec<String>,
}

impl StoreHealth {
    pub fn is_healthy(&self) -> bool {
        self.warnings.is_empty()
    }
}

struct IndexEntry {
    checkpoint: Checkpoint,
    seq: u64,
}

/// File system based checkpoint store.
pub struct FileCheckpointStore {
    root: PathBuf,
    config: CheckpointConfig,
    validator: Arc<Validator>,
    events: EventBus,
    index: RwLock<HashMap<String, IndexEntry>>,
    next_seq: AtomicU64,
    cleanup_lock: tokio::sync::Mutex<()>,
    failed: Mutex<Vec<FailedOperation>>,
}

impl FileCheckpointStore {
    /// Open a store rooted at `root`, creating its directories and
    /// rebuilding the index from existing files.
    pub async fn open(
        root: impl Into<PathBuf>,
        config: CheckpointConfig,
        validator: Arc<Validator>,
        events: EventBus,
    ) -> Result<Self, CheckpointError> {
        let root = root.into();
        for dir in [root.clone(), root.join(COMPRESSED_DIR), root.join(ARCHIVED_DIR)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| CheckpointError::persistence(&dir, e))?;
        }

        let store = Self {
            root,
            config,
            validator,
            events,
            index: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            cleanup_lock: tokio::sync::Mutex::new(()),
            failed: Mutex::new(Vec::new()),
        };
        store.rebuild_index().await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVED_DIR)
    }

    fn compressed_dir(&self) -> PathBuf {
        self.root.join(COMPRESSED_DIR)
    }

    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    /// Run the validator against a checkpoint.
    pub fn validate(&self, checkpoint: &Checkpoint) -> bool {
        self.validator.is_valid(checkpoint)
    }

    async fn rebuild_index(&self) -> Result<(), CheckpointError> {
        let mut loaded = Vec::new();
        for path in self.checkpoint_files().await? {
            match read_checkpoint_file(&path).await {
                Ok(checkpoint) => {
                    if self.config.validation_enabled {
                        if let Err(reason) = self.validator.check(&checkpoint) {
                            warn!("Skipping invalid checkpoint {:?}: {}", path, reason);
                            continue;
                        }
                    }
                    loaded.push(checkpoint);
                }
                Err(e) => warn!("Skipping unreadable checkpoint: {}", e),
            }
        }

        loaded.sort_by_key(|cp| cp.timestamp);
        let count = loaded.len();
        for checkpoint in loaded {
            self.insert_index(checkpoint);
        }
        info!("Checkpoint index rebuilt with {} entries from {:?}", count, self.root);
        Ok(())
    }

    /// Every checkpoint file in the plain and compressed directories.
    async fn checkpoint_files(&self) -> Result<Vec<PathBuf>, CheckpointError> {
        let mut files = Vec::new();
        for dir in [self.root.clone(), self.compressed_dir()] {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CheckpointError::persistence(&dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CheckpointError::persistence(&dir, e))?
            {
                let path = entry.path();
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                if path.is_file() && (name.ends_with(".json") || name.ends_with(".json.gz")) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    fn insert_index(&self, checkpoint: Checkpoint) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.index
            .write()
            .insert(checkpoint.id.clone(), IndexEntry { checkpoint, seq });
    }

    /// Persist a checkpoint and return its id.
    ///
    /// Failures are returned, published as a `checkpoint_save` error event and
    /// recorded in the failed-operation history.
    pub async fn save(&self, mut checkpoint: Checkpoint) -> Result<String, CheckpointError> {
        if let Err(e) = self.persist(&mut checkpoint).await {
            self.record_failure("save", Some(&checkpoint.id), &e);
            self.events.error(
                ErrorKind::CheckpointSave,
                e.to_string(),
                context([
                    ("checkpoint_id", json!(checkpoint.id)),
                    ("checkpoint_type", json!(checkpoint.checkpoint_type)),
                ]),
            );
            return Err(e);
        }

        let id = checkpoint.id.clone();
        let checkpoint_type = checkpoint.checkpoint_type;
        let session_id = checkpoint.session_id.clone();
        self.insert_index(checkpoint);
        debug!("Checkpoint {} saved", id);

        if let Err(e) = self.cleanup().await {
            warn!("Checkpoint cleanup after save failed: {}", e);
        }

        self.events.emit(EngineEvent::CheckpointCreated {
            id: id.clone(),
            checkpoint_type,
            session_id: session_id.clone(),
        });
        if self
            .config
            .hook_types
            .iter()
            .any(|t| t == checkpoint_type.as_str())
        {
            self.events.emit(EngineEvent::VersionControl {
                id: id.clone(),
                checkpoint_type,
                session_id,
            });
        }

        Ok(id)
    }

    async fn persist(&self, checkpoint: &mut Checkpoint) -> Result<(), CheckpointError> {
        if self.config.validation_enabled {
            self.validator.validate(checkpoint)?;
        }

        checkpoint.compressed = false;
        let mut content = serde_json::to_vec_pretty(&*checkpoint)?;

        let path = if self.config.compression_enabled
            && content.len() > self.config.compression_threshold
        {
            checkpoint.compressed = true;
            content = gzip(&serde_json::to_vec(&*checkpoint)?)
                .map_err(|e| CheckpointError::InvalidData(format!("compression failed: {}", e)))?;
            self.compressed_dir()
                .join(format!("{}.gz", checkpoint.file_name()))
        } else {
            self.root.join(checkpoint.file_name())
        };

        fs::write(&path, &content)
            .await
            .map_err(|e| CheckpointError::persistence(&path, e))?;
        checkpoint.file_path = Some(path);
        Ok(())
    }

    /// Load a checkpoint by id, falling back to a directory scan on an index miss.
    pub async fn load(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let cached = self.index.read().get(id).map(|entry| entry.checkpoint.clone());
        if cached.is_some() {
            return Ok(cached);
        }

        let plain = format!("{}.json", id);
        let compressed = format!("{}.json.gz", id);
        for path in self.checkpoint_files().await? {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !name.ends_with(&plain) && !name.ends_with(&compressed) {
                continue;
            }

            let checkpoint = read_checkpoint_file(&path).await?;
            if checkpoint.id != id {
                continue;
            }
            if self.config.validation_enabled {
                self.validator
                    .check(&checkpoint)
                    .map_err(|reason| CheckpointError::corrupt(&path, reason))?;
            }

            debug!("Checkpoint {} re-indexed from {:?}", id, path);
            self.insert_index(checkpoint.clone());
            return Ok(Some(checkpoint));
        }

        Ok(None)
    }

    /// Indexed checkpoints matching `filter`, newest first.
    pub fn list(&self, filter: &CheckpointFilter) -> Vec<Checkpoint> {
        let index = self.index.read();
        let mut entries: Vec<&IndexEntry> = index
            .values()
            .filter(|entry| filter.matches(&entry.checkpoint))
            .collect();
        entries.sort_by_key(|entry| newest_first(entry));

        let limit = filter.limit.unwrap_or(usize::MAX);
        entries
            .into_iter()
            .take(limit)
            .map(|entry| entry.checkpoint.clone())
            .collect()
    }

    /// Newest checkpoint that passes validation.
    pub fn latest_valid(&self) -> Option<Checkpoint> {
        self.list(&CheckpointFilter::default())
            .into_iter()
            .find(|cp| self.validator.is_valid(cp))
    }

    pub fn count(&self) -> usize {
        self.index.read().len()
    }

    /// Remove a checkpoint from the index and disk. Returns whether it was indexed.
    pub async fn delete(&self, id: &str) -> Result<bool, CheckpointError> {
        let removed = self.index.write().remove(id);
        match removed {
            Some(entry) => {
                if let Some(path) = &entry.checkpoint.file_path {
                    remove_if_exists(path).await?;
                }
                debug!("Checkpoint {} deleted", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply the retention policy.
    ///
    /// Runs an age pass over the index and the files on disk, then a count pass
    /// that keeps the newest `max_checkpoints`. Calls are serialized.
    pub async fn cleanup(&self) -> Result<CleanupReport, CheckpointError> {
        let _guard = self.cleanup_lock.lock().await;
        let mut report = CleanupReport::default();

        let retention = self.config.retention();
        let cutoff_ms = Utc::now().timestamp_millis() - retention.as_millis() as i64;
        let cutoff_time = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let expired: Vec<(String, Option<PathBuf>)> = self
            .index
            .read()
            .values()
            .filter(|entry| entry.checkpoint.timestamp < cutoff_ms)
            .map(|entry| (entry.checkpoint.id.clone(), entry.checkpoint.file_path.clone()))
            .collect();
        for (id, path) in expired {
            self.evict(&id, path.as_deref()).await?;
            report.expired.push(id);
        }

        for path in self.checkpoint_files().await? {
            let modified = match fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if modified < cutoff_time {
                let indexed: Vec<String> = self
                    .index
                    .read()
                    .values()
                    .filter(|entry| entry.checkpoint.file_path.as_deref() == Some(path.as_path()))
                    .map(|entry| entry.checkpoint.id.clone())
                    .collect();
                remove_if_exists(&path).await?;
                if indexed.is_empty() {
                    report.stale_files += 1;
                }
                for id in indexed {
                    self.index.write().remove(&id);
                    report.expired.push(id);
                }
            }
        }

        let overflow: Vec<(String, Option<PathBuf>)> = {
            let index = self.index.read();
            let mut entries: Vec<&IndexEntry> = index.values().collect();
            entries.sort_by_key(|entry| newest_first(entry));
            entries
                .into_iter()
                .skip(self.config.max_checkpoints)
                .map(|entry| (entry.checkpoint.id.clone(), entry.checkpoint.file_path.clone()))
                .collect()
        };
        for (id, path) in overflow {
            self.evict(&id, path.as_deref()).await?;
            report.evicted.push(id);
        }

        if report.removed() > 0 {
            info!(
                "Checkpoint cleanup removed {} expired, {} over limit, {} stale files",
                report.expired.len(),
                report.evicted.len(),
                report.stale_files
            );
            let ids: Vec<String> = report
                .expired
                .iter()
                .chain(report.evicted.iter())
                .cloned()
                .collect();
            if !ids.is_empty() {
                self.events.emit(EngineEvent::CheckpointsEvicted { ids });
            }
        }

        Ok(report)
    }

    async fn evict(&self, id: &str, path: Option<&Path>) -> Result<(), CheckpointError> {
        self.index.write().remove(id);
        if let Some(path) = path {
            remove_if_exists(path).await?;
        }
        Ok(())
    }

    /// Store health summary.
    pub fn health(&self) -> StoreHealth {
        let index = self.index.read();
        let mut by_type = BTreeMap::new();
        let mut compressed = 0;
        let mut oldest: Option<i64> = None;
        let mut newest: Option<i64> = None;
        for entry in index.values() {
            let cp = &entry.checkpoint;
            *by_type.entry(cp.checkpoint_type.to_string()).or_insert(0) += 1;
            if cp.compressed {
                compressed += 1;
            }
            oldest = Some(oldest.map_or(cp.timestamp, |t| t.min(cp.timestamp)));
            newest = Some(newest.map_or(cp.timestamp, |t| t.max(cp.timestamp)));
        }
        let total = index.len();
        drop(index);

        let failed_operations = self.failed_operations();
        let mut warnings = Vec::new();
        if total == 0 {
            warnings.push("no active checkpoints".to_string());
        }
        if !failed_operations.is_empty() {
            warnings.push(format!("{} failed operations", failed_operations.len()));
        }

        StoreHealth {
            total,
            compressed,
            by_type,
            oldest: oldest.and_then(DateTime::<Utc>::from_timestamp_millis),
            newest: newest.and_then(DateTime::<Utc>::from_timestamp_millis),
            failed_operations,
            warnings,
        }
    }

    pub(crate) fn record_failure(&self, operation: &str, checkpoint_id: Option<&str>, error: &CheckpointError) {
        warn!("Checkpoint {} failed: {}", operation, error);
        let mut failed = self.failed.lock();
        failed.push(FailedOperation {
            operation: operation.to_string(),
            checkpoint_id: checkpoint_id.map(str::to_string),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        if failed.len() > MAX_FAILED_OPERATIONS {
            let excess = failed.len() - MAX_FAILED_OPERATIONS;
            failed.drain(..excess);
        }
    }

    pub fn failed_operations(&self) -> Vec<FailedOperation> {
        self.failed.lock().clone()
    }

    pub fn clear_failed_operations(&self) {
        self.failed.lock().clear();
    }
}

/// Sort key ordering by timestamp, then insertion order, both descending.
fn newest_first(entry: &IndexEntry) -> (Reverse<i64>, Reverse<u64>) {
    (Reverse(entry.checkpoint.timestamp), Reverse(entry.seq))
}

async fn read_checkpoint_file(path: &Path) -> Result<Checkpoint, CheckpointError> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| CheckpointError::persistence(path, e))?;

    let is_gzip = path.extension().is_some_and(|ext| ext == "gz");
    let content = if is_gzip {
        gunzip(&bytes).map_err(|e| CheckpointError::corrupt(path, e))?
    } else {
        bytes
    };

    let mut checkpoint: Checkpoint =
        serde_json::from_slice(&content).map_err(|e| CheckpointError::corrupt(path, e))?;
    checkpoint.compressed = is_gzip;
    checkpoint.file_path = Some(path.to_path_buf());
    Ok(checkpoint)
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
