//! # Waypoint Checkpoint
//!
//! Durable checkpoints of process and session state, with rollback and
//! classified automatic recovery.
//!
//! ## Features
//!
//! - Typed, validated checkpoints with gzip compression above a size threshold
//! - Age and count based retention
//! - Session lifecycle with archival and cross-session reload
//! - Safety-first rollback
//! - Pluggable recovery strategies with a timeout and an NDJSON attempt log
//! - Agent and coordination backups

pub mod backup;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod hooks;
pub mod integrity;
pub mod recovery;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod strategies;
pub mod validation;

pub use backup::{BackupManager, BackupReport};
pub use checkpoint::{Checkpoint, CheckpointType};
pub use engine::CheckpointEngine;
pub use error::{CheckpointError, RecoveryError};
pub use events::{EngineEvent, ErrorEvent, ErrorKind, EventBus};
pub use hooks::{CommandHook, VersionControlHook, spawn_hook_listener};
pub use integrity::{IntegrityCache, hash_snapshot, hash_value};
pub use recovery::{
    FailureType, RecoveryAttempt, RecoveryContext, RecoveryEngine, RecoveryLog, RecoveryOutcome,
    RecoveryResources, RecoveryStats, RecoveryStrategy,
};
pub use session::{
    DecisionData, HealthReport, OperationData, RiskLevel, RollbackOutcome, Session, SessionArchive,
    SessionManager,
};
pub use snapshot::{MemorySnapshot, SystemState};
pub use state::{FileStateStore, MemoryStateStore, StateStore};
pub use store::{CheckpointFilter, CleanupReport, FailedOperation, FileCheckpointStore, StoreHealth};
pub use validation::Validator;
