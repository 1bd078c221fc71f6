//! Checkpoint data structures.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CheckpointError;
use crate::snapshot::{MemorySnapshot, SystemState};

/// Kind of checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    SessionStart,
    SessionBoundary,
    SessionEnd,
    DecisionPoint,
    PreOperation,
    Milestone,
    Rollback,
    Safety,
    Recovery,
}

impl CheckpointType {
    /// Every checkpoint type.
    pub const ALL: [CheckpointType; 9] = [
        CheckpointType::SessionStart,
        CheckpointType::SessionBoundary,
        CheckpointType::SessionEnd,
        CheckpointType::DecisionPoint,
        CheckpointType::PreOperation,
        CheckpointType::Milestone,
        CheckpointType::Rollback,
        CheckpointType::Safety,
        CheckpointType::Recovery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointType::SessionStart => "session_start",
            CheckpointType::SessionBoundary => "session_boundary",
            CheckpointType::SessionEnd => "session_end",
            CheckpointType::DecisionPoint => "decision_point",
            CheckpointType::PreOperation => "pre_operation",
            CheckpointType::Milestone => "milestone",
            CheckpointType::Rollback => "rollback",
            CheckpointType::Safety => "safety",
            CheckpointType::Recovery => "recovery",
        }
    }
}

impl fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointType {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CheckpointError::InvalidData(format!("unknown checkpoint type '{}'", s)))
    }
}

/// A timestamped, typed snapshot record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// `<type>_<base36 millis>_<suffix>`.
    pub id: String,
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
    /// Type-specific data.
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub memory_state: MemorySnapshot,
    #[serde(default)]
    pub system_state: SystemState,
    /// Set by the store when the record is written gzip-compressed.
    #[serde(default)]
    pub compressed: bool,
    /// Resolved location of the backing file.
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl Checkpoint {
    /// Create a new checkpoint stamped with the current time and process metrics.
    pub fn new(checkpoint_type: CheckpointType, payload: Value) -> Self {
        let timestamp = Utc::now().timestamp_millis();
        Self {
            id: generate_id(checkpoint_type.as_str(), timestamp),
            checkpoint_type,
            session_id: None,
            timestamp,
            payload,
            memory_state: MemorySnapshot::default(),
            system_state: SystemState::capture(),
            compressed: false,
            file_path: None,
        }
    }

    /// Attach to a session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a memory snapshot.
    pub fn with_memory_state(mut self, memory_state: MemorySnapshot) -> Self {
        self.memory_state = memory_state;
        self
    }

    /// Creation time as a UTC datetime.
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_default()
    }

    /// Plaintext file name, `<type>_<id>.json`.
    pub fn file_name(&self) -> String {
        format!("{}_{}.json", self.checkpoint_type, self.id)
    }
}

/// Build an id of the form `<prefix>_<base36 timestamp>_<random suffix>`.
pub fn generate_id(prefix: &str, timestamp_ms: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        prefix,
        to_base36(timestamp_ms.max(0) as u64),
        &suffix[..9]
    )
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
