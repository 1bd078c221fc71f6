//! Auto-recovery monitor.
//!
//! Periodic health, integrity, backup and metrics loops, plus a listener that
//! turns engine error events into recovery invocations.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use waypoint_checkpoint::{
    BackupReport, CheckpointEngine, EngineEvent, ErrorEvent, ErrorKind, FailureType,
    IntegrityCache, RecoveryContext, RecoveryOutcome, hash_snapshot,
};
use waypoint_config::MonitorConfig;

use crate::error::MonitorError;
use crate::health::{RecoveryTrigger, assess, plan_actions};
use crate::metrics::{self, MetricsRegistry};

const LIVE_STATE_KEY: &str = "live_state";

/// Watches one engine and triggers recoveries on its behalf.
pub struct AutoRecoveryMonitor {
    engine: Arc<CheckpointEngine>,
    config: MonitorConfig,
    integrity: IntegrityCache,
    metrics: Arc<MetricsRegistry>,
}

impl AutoRecoveryMonitor {
    /// Create a monitor using the engine's `[monitor]` settings.
    pub fn new(engine: Arc<CheckpointEngine>) -> Result<Self, MonitorError> {
        let config = engine.config().monitor.clone();
        for (name, secs) in [
            ("health_check_interval_secs", config.health_check_interval_secs),
            ("backup_interval_secs", config.backup_interval_secs),
            ("metrics_interval_secs", config.metrics_interval_secs),
        ] {
            if secs == 0 {
                return Err(MonitorError::InvalidConfig(format!("{} must be positive", name)));
            }
        }

        Ok(Self {
            engine,
            config,
            integrity: IntegrityCache::new(),
            metrics: Arc::new(MetricsRegistry::for_engine()),
        })
    }

    pub fn engine(&self) -> &Arc<CheckpointEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Check engine health and act on its warnings.
    ///
    /// Returns the actions taken. Nothing runs while a recovery or restore is
    /// in progress, or when auto recovery is disabled.
    pub async fn run_health_check(&self) -> Vec<RecoveryTrigger> {
        if self.engine.is_busy() {
            debug!("Recovery in progress, skipping health check");
            return Vec::new();
        }

        self.metrics.inc_counter(metrics::HEALTH_CHECKS);
        let report = self.engine.sessions().health_report();
        let status = assess(&report);
        debug!("Health check: {} ({:?})", status, report.warnings);

        if !self.config.auto_recovery {
            if !report.is_healthy() {
                warn!("Engine {}: {:?}", status, report.warnings);
            }
            return Vec::new();
        }

        let actions = plan_actions(&report);
        for action in &actions {
            if let Err(e) = self.dispatch(action).await {
                error!("Health action {:?} failed: {}", action, e);
            }
            if matches!(action, RecoveryTrigger::CorruptionDetected { .. }) {
                self.engine.store().clear_failed_operations();
            }
        }
        actions
    }

    async fn dispatch(&self, trigger: &RecoveryTrigger) -> Result<(), MonitorError> {
        match trigger {
            RecoveryTrigger::EmergencyCheckpoint => {
                let id = self
                    .engine
                    .sessions()
                    .create_emergency_checkpoint("health check: no active checkpoints")
                    .await?;
                info!("Wrote emergency checkpoint {}", id);
            }
            RecoveryTrigger::SessionFailure => {
                let mut context = RecoveryContext::new();
                context.insert("source".to_string(), json!("health_check"));
                self.recover(FailureType::SessionFailure, context).await?;
            }
            RecoveryTrigger::CorruptionDetected { reason } => {
                let mut context = RecoveryContext::new();
                context.insert("source".to_string(), json!("health_check"));
                context.insert("reason".to_string(), json!(reason));
                self.recover(FailureType::MemoryCorruption, context).await?;
            }
        }
        Ok(())
    }

    /// Hash the live state and trigger `memory_corruption` when it drifted
    /// into a structurally invalid shape.
    ///
    /// The new hash is cached regardless of the outcome. Returns whether
    /// corruption was detected.
    pub async fn run_integrity_check(&self) -> bool {
        if self.engine.is_busy() {
            debug!("Recovery in progress, skipping integrity check");
            return false;
        }

        let snapshot = self.engine.state().capture().await;
        let digest = hash_snapshot(&snapshot);
        if !self.integrity.update(LIVE_STATE_KEY, digest.clone()) {
            return false;
        }

        let Err(reason) = snapshot.validate() else {
            debug!("Live state changed, digest {}", digest);
            return false;
        };

        warn!("Integrity violation: {}", reason);
        self.metrics.inc_counter(metrics::INTEGRITY_VIOLATIONS);
        if self.config.auto_recovery {
            let mut context = RecoveryContext::new();
            context.insert("source".to_string(), json!("integrity_check"));
            context.insert("reason".to_string(), json!(reason));
            context.insert("hash".to_string(), json!(digest));
            if let Err(e) = self.recover(FailureType::MemoryCorruption, context).await {
                error!("Corruption recovery failed: {}", e);
            }
        }
        true
    }

    pub async fn run_backup_cycle(&self) -> BackupReport {
        let report = self.engine.backups().run_backup_cycle().await;
        self.metrics.inc_counter(metrics::BACKUPS);
        report
    }

    /// Refresh gauges from the engine.
    pub fn collect_metrics(&self) {
        let health = self.engine.store().health();
        self.metrics.set_gauge(metrics::CHECKPOINTS, health.total as u64);
        self.metrics
            .set_gauge(metrics::CHECKPOINTS_COMPRESSED, health.compressed as u64);
        self.metrics
            .set_gauge(metrics::FAILED_OPERATIONS, health.failed_operations.len() as u64);
        let active = self.engine.sessions().active_session().is_some();
        self.metrics.set_gauge(metrics::ACTIVE_SESSION, u64::from(active));
    }

    /// The recovery an error event calls for.
    ///
    /// Events raised while a recovery was running map to nothing.
    pub fn map_error_event(event: &ErrorEvent) -> Option<(FailureType, RecoveryContext)> {
        if event.during_recovery {
            return None;
        }

        let failure_type = match event.kind {
            ErrorKind::CheckpointSave | ErrorKind::CheckpointRestore => {
                FailureType::MemoryCorruption
            }
            ErrorKind::MemoryRestore => {
                if event.context.get("agent_id").and_then(Value::as_str).is_some() {
                    FailureType::AgentMemoryFailure
                } else {
                    FailureType::CoordinationFailure
                }
            }
            ErrorKind::SessionLoad => FailureType::SessionFailure,
        };

        let mut context = event.context.clone();
        context.insert(
            "source_event".to_string(),
            json!({
                "kind": event.kind.as_str(),
                "message": event.message,
                "timestamp": event.timestamp,
            }),
        );
        Some((failure_type, context))
    }

    /// Run the recovery an error event calls for, if any.
    pub async fn handle_error_event(
        &self,
        event: &ErrorEvent,
    ) -> Option<Result<RecoveryOutcome, MonitorError>> {
        let Some((failure_type, context)) = Self::map_error_event(event) else {
            debug!("Ignoring {} raised during recovery", event.kind.as_str());
            return None;
        };

        info!(
            "Error event {} triggers {} recovery",
            event.kind.as_str(),
            failure_type
        );
        Some(self.recover(failure_type, context).await)
    }

    async fn recover(
        &self,
        failure_type: FailureType,
        context: RecoveryContext,
    ) -> Result<RecoveryOutcome, MonitorError> {
        self.metrics.inc_counter(metrics::RECOVERIES);
        let result = self
            .engine
            .recovery()
            .perform_recovery(failure_type, context)
            .await;
        if !result.as_ref().is_ok_and(|o| o.success) {
            self.metrics.inc_counter(metrics::RECOVERIES_FAILED);
        }
        Ok(result?)
    }

    /// Spawn the monitor loops. Each exits when `shutdown` fires.
    pub fn start(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.clone().spawn_health_loop(shutdown.resubscribe()),
            self.clone().spawn_backup_loop(shutdown.resubscribe()),
            self.clone().spawn_metrics_loop(shutdown.resubscribe()),
        ];
        if self.config.auto_recovery {
            handles.push(self.spawn_event_listener(shutdown));
        }
        handles
    }

    fn spawn_health_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.health_check_interval();
            info!("Starting health check loop (interval: {:?})", interval);

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        self.run_health_check().await;
                        if self.config.integrity_check {
                            self.run_integrity_check().await;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Health check loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_backup_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.backup_interval();
            info!("Starting backup loop (interval: {:?})", interval);

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let report = self.run_backup_cycle().await;
                        if !report.failures.is_empty() {
                            warn!("Backup failures: {:?}", report.failures);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Backup loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_metrics_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.metrics_interval();

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        self.collect_metrics();
                        info!("Engine metrics:\n{}", self.metrics.export());
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Metrics loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_event_listener(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut events = self.engine.events().subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(EngineEvent::Error(event)) => {
                            if let Some(Err(e)) = self.handle_error_event(&event).await {
                                error!("Recovery for {} failed: {}", event.kind.as_str(), e);
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Error listener lagged, {} events skipped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.recv() => {
                        info!("Error listener shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "auto_recovery_tests.rs"]
mod tests;
