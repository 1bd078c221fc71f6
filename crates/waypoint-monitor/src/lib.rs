//! # Waypoint Monitor
//!
//! Automatic recovery for the Waypoint checkpoint engine.
//!
//! ## Features
//!
//! - Periodic health checks mapped to recovery actions
//! - Integrity checks over the live state
//! - Scheduled agent and coordination backups
//! - Prometheus format metrics, logged on an interval
//! - Error event listener dispatching classified recoveries

pub mod auto_recovery;
pub mod error;
pub mod health;
pub mod metrics;

pub use auto_recovery::AutoRecoveryMonitor;
pub use error::MonitorError;
pub use health::{HealthStatus, RecoveryTrigger, assess, plan_actions};
pub use metrics::MetricsRegistry;
