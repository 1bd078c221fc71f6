//! Health assessment and recovery planning.

use serde::Serialize;
use waypoint_checkpoint::{FailureType, HealthReport};

const NO_CHECKPOINTS: &str = "no active checkpoints";
const NO_SESSION: &str = "no active session";

/// Overall engine health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No warnings.
    Healthy,
    /// Missing checkpoints or session, still functioning.
    Degraded,
    /// Store operations are failing.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Classify a health report.
pub fn assess(report: &HealthReport) -> HealthStatus {
    if !report.store.failed_operations.is_empty() {
        HealthStatus::Unhealthy
    } else if report.warnings.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

/// An action the monitor takes in response to a health warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryTrigger {
    /// The store is empty; write a safety checkpoint instead of recovering.
    EmergencyCheckpoint,
    /// No session is active.
    SessionFailure,
    /// Store operations failed or live memory failed validation after drifting.
    CorruptionDetected { reason: String },
}

impl RecoveryTrigger {
    /// The recovery this trigger dispatches, if any.
    pub fn failure_type(&self) -> Option<FailureType> {
        match self {
            RecoveryTrigger::EmergencyCheckpoint => None,
            RecoveryTrigger::SessionFailure => Some(FailureType::SessionFailure),
            RecoveryTrigger::CorruptionDetected { .. } => Some(FailureType::MemoryCorruption),
        }
    }
}

/// Map a health report to actions, in the order its warnings were raised.
pub fn plan_actions(report: &HealthReport) -> Vec<RecoveryTrigger> {
    let mut actions = Vec::new();

    for warning in &report.warnings {
        if warning.contains(NO_CHECKPOINTS) {
            actions.push(RecoveryTrigger::EmergencyCheckpoint);
        } else if warning.contains(NO_SESSION) {
            actions.push(RecoveryTrigger::SessionFailure);
        }
    }

    let failed = report.store.failed_operations.len();
    if failed > 0 {
        let reason = format!("{} failed store operations", failed);
        let position = actions
            .iter()
            .position(|a| *a == RecoveryTrigger::SessionFailure)
            .unwrap_or(actions.len());
        actions.insert(position, RecoveryTrigger::CorruptionDetected { reason });
    }

    actions
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
