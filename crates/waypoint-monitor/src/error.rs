//! Monitor errors.

use thiserror::Error;
use waypoint_checkpoint::{CheckpointError, RecoveryError};

/// Monitor error types.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A dispatched recovery failed.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    /// A checkpoint operation issued by the monitor failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
