//! Live state access.
//!
//! The engine never owns the caller's memory; it reads and writes it through
//! a [`StateStore`]. Capture is infallible: unreadable sources degrade to
//! empty scopes with a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::CheckpointError;
use crate::snapshot::MemorySnapshot;

/// Access to the caller's live memory state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Snapshot every scope.
    async fn capture(&self) -> MemorySnapshot;

    /// Replace the live state with a snapshot.
    async fn restore(&self, snapshot: &MemorySnapshot) -> Result<(), CheckpointError>;

    /// Ids of every agent with stored memory.
    async fn agent_ids(&self) -> Vec<String>;

    /// Memory of one agent.
    async fn agent_memory(&self, agent_id: &str) -> Result<Option<Value>, CheckpointError>;

    /// Overwrite the memory of one agent.
    async fn write_agent_memory(&self, agent_id: &str, memory: &Value) -> Result<(), CheckpointError>;

    /// Current coordination state.
    async fn coordination_state(&self) -> Result<BTreeMap<String, Value>, CheckpointError>;

    /// Overwrite the coordination state.
    async fn write_coordination_state(
        &self,
        state: &BTreeMap<String, Value>,
    ) -> Result<(), CheckpointError>;
}

/// In-memory state store for testing and embedding.
#[derive(Default)]
pub struct MemoryStateStore {
    state: RwLock<MemorySnapshot>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a snapshot.
    pub fn with_snapshot(snapshot: MemorySnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Set a shared-scope entry.
    pub fn set_shared(&self, key: impl Into<String>, value: Value) {
        self.state.write().shared.insert(key.into(), value);
    }

    /// Set a global-scope entry.
    pub fn set_global(&self, key: impl Into<String>, value: Value) {
        self.state.write().global.insert(key.into(), value);
    }

    /// Direct read access for assertions.
    pub fn snapshot(&self) -> MemorySnapshot {
        self.state.read().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn capture(&self) -> MemorySnapshot {
        self.state.read().clone()
    }

    async fn restore(&self, snapshot: &MemorySnapshot) -> Result<(), CheckpointError> {
        *self.state.write() = snapshot.clone();
        Ok(())
    }

    async fn agent_ids(&self) -> Vec<String> {
        self.state.read().agents.keys().cloned().collect()
    }

    async fn agent_memory(&self, agent_id: &str) -> Result<Option<Value>, CheckpointError> {
        Ok(self.state.read().agents.get(agent_id).cloned())
    }

    async fn write_agent_memory(&self, agent_id: &str, memory: &Value) -> Result<(), CheckpointError> {
        self.state
            .write()
            .agents
            .insert(agent_id.to_string(), memory.clone());
        Ok(())
    }

    async fn coordination_state(&self) -> Result<BTreeMap<String, Value>, CheckpointError> {
        Ok(self.state.read().coordination.clone())
    }

    async fn write_coordination_state(
        &self,
        state: &BTreeMap<String, Value>,
    ) -> Result<(), CheckpointError> {
        self.state.write().coordination = state.clone();
        Ok(())
    }
}

/// File-backed state store.
///
/// ```text
/// {memory_dir}/
/// ├── agents/{agent_id}.json
/// ├── shared.json
/// └── global.json
/// {coordination_dir}/
/// └── state.json
/// ```
pub struct FileStateStore {
    memory_dir: PathBuf,
    coordination_dir: PathBuf,
}

impl FileStateStore {
    pub fn new(memory_dir: impl Into<PathBuf>, coordination_dir: impl Into<PathBuf>) -> Self {
        Self {
            memory_dir: memory_dir.into(),
            coordination_dir: coordination_dir.into(),
        }
    }

    fn agents_dir(&self) -> PathBuf {
        self.memory_dir.join("agents")
    }

    fn agent_path(&self, agent_id: &str) -> PathBuf {
        self.agents_dir()
            .join(format!("{}.json", encode_id(agent_id)))
    }

    fn coordination_path(&self) -> PathBuf {
        self.coordination_dir.join("state.json")
    }

    async fn read_scope(&self, name: &str) -> BTreeMap<String, Value> {
        let path = self.memory_dir.join(format!("{}.json", name));
        match read_json::<BTreeMap<String, Value>>(&path).await {
            Ok(Some(scope)) => scope,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("Unreadable {} state, capturing empty scope: {}", name, e);
                BTreeMap::new()
            }
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn capture(&self) -> MemorySnapshot {
        let mut agents = BTreeMap::new();
        for agent_id in self.agent_ids().await {
            match self.agent_memory(&agent_id).await {
                Ok(Some(memory)) => {
                    agents.insert(agent_id, memory);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping agent '{}' in snapshot: {}", agent_id, e),
            }
        }

        let coordination = match self.coordination_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Unreadable coordination state, capturing empty scope: {}", e);
                BTreeMap::new()
            }
        };

        MemorySnapshot {
            agents,
            shared: self.read_scope("shared").await,
            global: self.read_scope("global").await,
            coordination,
        }
    }

    async fn restore(&self, snapshot: &MemorySnapshot) -> Result<(), CheckpointError> {
        for agent_id in self.agent_ids().await {
            if !snapshot.agents.contains_key(&agent_id) {
                remove_if_exists(&self.agent_path(&agent_id)).await?;
            }
        }

        for (agent_id, memory) in &snapshot.agents {
            self.write_agent_memory(agent_id, memory).await?;
        }
        write_json(&self.memory_dir.join("shared.json"), &snapshot.shared).await?;
        write_json(&self.memory_dir.join("global.json"), &snapshot.global).await?;
        self.write_coordination_state(&snapshot.coordination).await?;

        debug!(
            "Restored {} agents into {:?}",
            snapshot.agents.len(),
            self.memory_dir
        );
        Ok(())
    }

    async fn agent_ids(&self) -> Vec<String> {
        let dir = self.agents_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut ids = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.extension().is_some_and(|ext| ext == "json") {
                        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                        match decode_id(stem) {
                            Some(agent_id) => ids.push(agent_id),
                            None => warn!("Ignoring agent file with undecodable name {:?}", path),
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to list agents in {:?}: {}", dir, e);
                    break;
                }
            }
        }
        ids.sort();
        ids
    }

    async fn agent_memory(&self, agent_id: &str) -> Result<Option<Value>, CheckpointError> {
        read_json(&self.agent_path(agent_id)).await
    }

    async fn write_agent_memory(&self, agent_id: &str, memory: &Value) -> Result<(), CheckpointError> {
        write_json(&self.agent_path(agent_id), memory).await
    }

    async fn coordination_state(&self) -> Result<BTreeMap<String, Value>, CheckpointError> {
        Ok(read_json(&self.coordination_path()).await?.unwrap_or_default())
    }

    async fn write_coordination_state(
        &self,
        state: &BTreeMap<String, Value>,
    ) -> Result<(), CheckpointError> {
        write_json(&self.coordination_path(), state).await
    }
}

fn is_file_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

/// Encode an id for use as a file name.
///
/// Bytes outside `[A-Za-z0-9_-]` become `%XX`, so distinct ids never share a
/// file and `decode_id` recovers the original.
pub(crate) fn encode_id(id: &str) -> String {
    let mut encoded = String::with_capacity(id.len());
    for &byte in id.as_bytes() {
        if is_file_safe(byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

/// Inverse of `encode_id`. `None` for names it could not have produced.
pub(crate) fn decode_id(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = name.get(i + 1..i + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            byte if is_file_safe(byte) => {
                decoded.push(byte);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(decoded).ok()
}

/// Read and parse a JSON file; a missing file is `Ok(None)`.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, CheckpointError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CheckpointError::persistence(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| CheckpointError::corrupt(path, e))
}

/// Pretty-print a value to a JSON file, creating parent directories.
pub(crate) async fn write_json<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| CheckpointError::persistence(parent, e))?;
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)
        .await
        .map_err(|e| CheckpointError::persistence(path, e))
}

/// Remove a file, treating an absent file as success.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<(), CheckpointError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CheckpointError::persistence(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn file_store(temp: &TempDir) -> FileStateStore {
        FileStateStore::new(temp.path().join("memory"), temp.path().join("coordination"))
    }

    #[tokio::test]
    async fn test_capture_empty_directories() {
        let temp = TempDir::new().unwrap();
        let store = file_store(&temp);
        let snapshot = store.capture().await;
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_restore_then_capture() {
        let temp = TempDir::new().unwrap();
        let store = file_store(&temp);

        let mut snapshot = MemorySnapshot::default();
        snapshot.agents.insert("planner".to_string(), json!({"goal": "ship"}));
        snapshot.shared.insert("phase".to_string(), json!(2));
        snapshot.global.insert("mode".to_string(), json!("active"));
        snapshot.coordination.insert("leader".to_string(), json!("planner"));

        store.restore(&snapshot).await.unwrap();
        assert_eq!(store.capture().await, snapshot);
    }

    #[tokio::test]
    async fn test_restore_removes_unknown_agents() {
        let temp = TempDir::new().unwrap();
        let store = file_store(&temp);
        store.write_agent_memory("stale", &json!({})).await.unwrap();

        let mut snapshot = MemorySnapshot::default();
        snapshot.agents.insert("fresh".to_string(), json!({}));
        store.restore(&snapshot).await.unwrap();

        assert_eq!(store.agent_ids().await, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_capture_degrades_on_corrupt_scope() {
        let temp = TempDir::new().unwrap();
        let store = file_store(&temp);
        std::fs::create_dir_all(temp.path().join("memory")).unwrap();
        std::fs::write(temp.path().join("memory/shared.json"), "{not json").unwrap();
        store.write_agent_memory("a1", &json!({"k": 1})).await.unwrap();

        let snapshot = store.capture().await;
        assert!(snapshot.shared.is_empty());
        assert_eq!(snapshot.agents.len(), 1);
    }

    #[tokio::test]
    async fn test_agent_memory_missing() {
        let temp = TempDir::new().unwrap();
        let store = file_store(&temp);
        assert!(store.agent_memory("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_agent_id_stays_inside_agents_dir() {
        let temp = TempDir::new().unwrap();
        let store = file_store(&temp);
        store.write_agent_memory("../escape", &json!({})).await.unwrap();

        assert!(temp.path().join("memory/agents/%2E%2E%2Fescape.json").exists());
        assert!(!temp.path().join("memory/escape.json").exists());
        assert_eq!(store.agent_ids().await, vec!["../escape".to_string()]);
    }

    #[tokio::test]
    async fn test_agent_ids_with_separators_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = file_store(&temp);

        let mut snapshot = MemorySnapshot::default();
        snapshot.agents.insert("planner.v2".to_string(), json!({"rev": 2}));
        snapshot.agents.insert("planner_v2".to_string(), json!({"rev": 3}));
        snapshot.agents.insert("team/scout".to_string(), json!({"seen": 1}));
        store.restore(&snapshot).await.unwrap();

        let captured = store.capture().await;
        assert_eq!(captured, snapshot);
        assert_eq!(
            store.agent_memory("team/scout").await.unwrap(),
            Some(json!({"seen": 1}))
        );

        let mut reduced = snapshot.clone();
        reduced.agents.remove("planner.v2");
        store.restore(&reduced).await.unwrap();
        assert_eq!(store.capture().await, reduced);
    }

    #[test]
    fn test_encode_decode_id() {
        for id in ["scout", "planner.v2", "team/scout", "a%b", "ünïcode", "with space", ""] {
            let encoded = encode_id(id);
            assert!(encoded.bytes().all(|b| b.is_ascii_alphanumeric() || b"-_%".contains(&b)));
            assert_eq!(decode_id(&encoded).as_deref(), Some(id));
        }
        assert_ne!(encode_id("planner.v2"), encode_id("planner_v2"));
        assert_eq!(decode_id("bad.name"), None);
        assert_eq!(decode_id("trunc%2"), None);
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStateStore::new();
        store.set_shared("k", json!(1));
        let snapshot = store.capture().await;

        store.set_shared("k", json!(2));
        store.restore(&snapshot).await.unwrap();
        assert_eq!(store.snapshot().shared["k"], json!(1));
    }

    #[tokio::test]
    async fn test_memory_store_coordination() {
        let store = MemoryStateStore::new();
        let mut state = BTreeMap::new();
        state.insert("leader".to_string(), json!("a1"));
        store.write_coordination_state(&state).await.unwrap();
        assert_eq!(store.coordination_state().await.unwrap(), state);
    }
}
