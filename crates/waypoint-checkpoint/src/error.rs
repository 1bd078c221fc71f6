//! Checkpoint and recovery errors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Checkpoint error types.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Checkpoint not found.
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Checkpoint failed structural validation and was not written.
    #[error("Checkpoint '{id}' failed validation: {reason}")]
    Validation { id: String, reason: String },

    /// A stored checkpoint could not be decoded or failed validation on load.
    #[error("Corrupt checkpoint at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// I/O failure while reading or writing engine files.
    #[error("Persistence error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A session is already active.
    #[error("Session already active: {0}")]
    SessionActive(String),

    /// The operation needs an active session.
    #[error("No active session")]
    NoActiveSession,

    /// Invalid checkpoint data.
    #[error("Invalid checkpoint data: {0}")]
    InvalidData(String),

    /// Version-control hook failed.
    #[error("Hook '{hook}' failed: {reason}")]
    Hook { hook: String, reason: String },
}

impl CheckpointError {
    pub(crate) fn persistence(path: &Path, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Recovery engine error types.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// No strategy is registered for the failure type.
    #[error("Unknown failure type: {0}")]
    UnknownFailureType(String),

    /// The strategy exceeded its time budget.
    #[error("Recovery '{failure_type}' timed out after {timeout:?}")]
    Timeout {
        failure_type: String,
        timeout: Duration,
    },

    /// The recovery context is missing a required field.
    #[error("Invalid recovery context: {0}")]
    InvalidContext(String),

    /// Underlying checkpoint or state failure.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = CheckpointError::Validation {
            id: "decision_point_abc".to_string(),
            reason: "decision.selected is required".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("decision_point_abc"));
        assert!(msg.contains("decision.selected"));
    }

    #[test]
    fn test_persistence_error_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CheckpointError::persistence(Path::new("/tmp/cp.json"), io_err);
        assert!(err.to_string().contains("/tmp/cp.json"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_timeout_error_display() {
        let err = RecoveryError::Timeout {
            failure_type: "memory_corruption".to_string(),
            timeout: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("memory_corruption"));
        assert!(msg.contains("30s"));
    }

    #[test]
    fn test_checkpoint_error_is_transparent_in_recovery() {
        let err: RecoveryError = CheckpointError::NotFound("safety_x".to_string()).into();
        assert_eq!(err.to_string(), "Checkpoint not found: safety_x");
    }
}
