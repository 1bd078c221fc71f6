//! Memory snapshots and process metrics captured with every checkpoint.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static PROCESS_START: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Captured value of every tracked state scope.
///
/// Scopes are sorted maps, so two snapshots with the same content compare
/// and serialize identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Per-agent memory, keyed by agent id.
    #[serde(default)]
    pub agents: BTreeMap<String, Value>,
    /// State shared between agents.
    #[serde(default)]
    pub shared: BTreeMap<String, Value>,
    /// Process-wide state.
    #[serde(default)]
    pub global: BTreeMap<String, Value>,
    /// Coordination state.
    #[serde(default)]
    pub coordination: BTreeMap<String, Value>,
}

impl MemorySnapshot {
    /// Whether every scope is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
            && self.shared.is_empty()
            && self.global.is_empty()
            && self.coordination.is_empty()
    }

    /// Total number of entries across all scopes.
    pub fn len(&self) -> usize {
        self.agents.len() + self.shared.len() + self.global.len() + self.coordination.len()
    }

    /// Structural check used by integrity monitoring.
    ///
    /// Agent memories must be JSON objects and no scope may hold an empty key.
    pub fn validate(&self) -> Result<(), String> {
        for (agent_id, memory) in &self.agents {
            if agent_id.is_empty() {
                return Err("agent memory with empty id".to_string());
            }
            if !memory.is_object() {
                return Err(format!("agent '{}' memory is not an object", agent_id));
            }
        }

        for (scope, entries) in [
            ("shared", &self.shared),
            ("global", &self.global),
            ("coordination", &self.coordination),
        ] {
            if entries.contains_key("") {
                return Err(format!("{} scope contains an empty key", scope));
            }
        }

        Ok(())
    }

    /// JSON representation with a fixed scope layout.
    pub fn to_value(&self) -> Value {
        let scope = |entries: &BTreeMap<String, Value>| {
            Value::Object(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Map<_, _>>())
        };

        let mut root = Map::new();
        root.insert("agents".to_string(), scope(&self.agents));
        root.insert("coordination".to_string(), scope(&self.coordination));
        root.insert("global".to_string(), scope(&self.global));
        root.insert("shared".to_string(), scope(&self.shared));
        Value::Object(root)
    }
}

/// Lightweight process metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub pid: u32,
    pub platform: String,
    pub arch: String,
    pub uptime_secs: u64,
    /// Resident set size in bytes, when the platform exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_bytes: Option<u64>,
    pub captured_at: DateTime<Utc>,
}

impl SystemState {
    /// Capture metrics for the current process.
    pub fn capture() -> Self {
        Self {
            pid: std::process::id(),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            uptime_secs: PROCESS_START.elapsed().as_secs(),
            resident_bytes: resident_bytes(),
            captured_at: Utc::now(),
        }
    }
}

#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> Option<u64> {
    None
}
