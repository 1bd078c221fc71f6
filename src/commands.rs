//! Subcommand handlers for Waypoint.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{info, warn};

use waypoint_checkpoint::{
    CheckpointEngine, CheckpointFilter, CheckpointType, FailureType, OperationData,
    RecoveryContext, RecoveryLog, RecoveryStats,
};
use waypoint_config::{ConfigLoader, ConfigValidator};
use waypoint_monitor::{AutoRecoveryMonitor, assess};

use crate::cli::{CreateKind, OutputFormat};

/// Create a checkpoint and print its id.
pub(crate) async fn create(engine: &CheckpointEngine, kind: CreateKind, label: String) -> Result<()> {
    let sessions = engine.sessions();
    let id = match kind {
        CreateKind::Safety => sessions.create_emergency_checkpoint(&label).await?,
        CreateKind::Milestone => {
            sessions
                .create_session_checkpoint(CheckpointType::Milestone, json!({ "milestone": label }))
                .await?
        }
        CreateKind::Boundary => {
            sessions
                .create_session_checkpoint(CheckpointType::SessionBoundary, json!({ "label": label }))
                .await?
        }
        CreateKind::Operation => {
            sessions
                .create_operation_checkpoint(OperationData::new(label))
                .await?
        }
    };
    println!("{}", id);
    Ok(())
}

pub(crate) fn list(
    engine: &CheckpointEngine,
    session: Option<String>,
    checkpoint_type: Option<String>,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let filter = CheckpointFilter {
        session_id: session,
        checkpoint_type: checkpoint_type
            .map(|t| t.parse::<CheckpointType>())
            .transpose()?,
        limit,
    };
    let checkpoints = engine.store().list(&filter);

    if format == OutputFormat::Json {
        let rows: Vec<Value> = checkpoints
            .iter()
            .map(|cp| {
                json!({
                    "id": cp.id,
                    "type": cp.checkpoint_type,
                    "session_id": cp.session_id,
                    "created_at": cp.created_at(),
                    "compressed": cp.compressed,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!("No checkpoints found.");
        return Ok(());
    }

    println!("{:<48} {:<18} {:<26} {}", "ID", "TYPE", "CREATED", "SESSION");
    println!("{}", "-".repeat(110));
    for cp in &checkpoints {
        println!(
            "{:<48} {:<18} {:<26} {}{}",
            cp.id,
            cp.checkpoint_type,
            cp.created_at().format("%Y-%m-%d %H:%M:%S%.3f"),
            cp.session_id.as_deref().unwrap_or("-"),
            if cp.compressed { " (gz)" } else { "" }
        );
    }
    println!("\nTotal: {} checkpoints", checkpoints.len());
    Ok(())
}

pub(crate) async fn show(engine: &CheckpointEngine, id: &str) -> Result<()> {
    let checkpoint = engine
        .store()
        .load(id)
        .await?
        .with_context(|| format!("checkpoint {} not found", id))?;
    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    if !engine.store().validate(&checkpoint) {
        warn!("Checkpoint {} does not pass validation", id);
    }
    Ok(())
}

pub(crate) async fn restore(engine: &CheckpointEngine, id: &str) -> Result<()> {
    let checkpoint = engine.sessions().restore_from_checkpoint(id).await?;
    println!(
        "Restored {} ({} memory entries)",
        checkpoint.id,
        checkpoint.memory_state.len()
    );
    Ok(())
}

pub(crate) async fn rollback(engine: &CheckpointEngine, id: &str) -> Result<()> {
    let outcome = engine.sessions().rollback_to_point(id).await?;
    println!("Rolled back to {}", outcome.target_checkpoint);
    println!("  safety checkpoint:   {}", outcome.safety_checkpoint);
    println!("  rollback checkpoint: {}", outcome.rollback_checkpoint);
    Ok(())
}

pub(crate) async fn cleanup(engine: &CheckpointEngine) -> Result<()> {
    let report = engine.store().cleanup().await?;
    println!(
        "Removed {} checkpoints ({} expired, {} evicted, {} stale files)",
        report.removed(),
        report.expired.len(),
        report.evicted.len(),
        report.stale_files
    );
    Ok(())
}

pub(crate) async fn status(engine: &CheckpointEngine, format: OutputFormat) -> Result<()> {
    let report = engine.sessions().health_report();
    let status = assess(&report);
    let stats = read_stats(&engine.config().storage.recovery_log).await;

    if format == OutputFormat::Json {
        let body = json!({
            "status": status,
            "health": report,
            "recovery": stats,
            "state_hash": engine.live_state_hash().await,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let store = &report.store;
    println!("Status:       {}", status);
    println!("Checkpoints:  {} ({} compressed)", store.total, store.compressed);
    for (checkpoint_type, count) in &store.by_type {
        println!("  {:<18} {}", checkpoint_type, count);
    }
    if let (Some(oldest), Some(newest)) = (store.oldest, store.newest) {
        println!("Range:        {} .. {}", oldest, newest);
    }
    println!(
        "Recoveries:   {} ({} ok, {:.0}% success)",
        stats.total,
        stats.successful,
        stats.success_rate() * 100.0
    );
    println!("State hash:   {}", engine.live_state_hash().await);
    for warning in &report.warnings {
        println!("Warning:      {}", warning);
    }
    Ok(())
}

pub(crate) async fn recover(
    engine: &CheckpointEngine,
    failure_type: &str,
    agent_id: Option<String>,
    session_id: Option<String>,
    extra: Option<String>,
) -> Result<()> {
    let mut context = match extra {
        Some(raw) => match serde_json::from_str::<Value>(&raw).context("--context is not JSON")? {
            Value::Object(map) => map,
            _ => bail!("--context must be a JSON object"),
        },
        None => RecoveryContext::new(),
    };
    if let Some(agent_id) = agent_id {
        context.insert("agent_id".to_string(), json!(agent_id));
    }
    if let Some(session_id) = session_id {
        context.insert("session_id".to_string(), json!(session_id));
    }

    let failure_type: FailureType = failure_type.parse()?;
    let outcome = engine
        .recovery()
        .perform_recovery(failure_type, context)
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.success {
        bail!("recovery strategy '{}' did not succeed", outcome.strategy);
    }
    Ok(())
}

pub(crate) async fn history(engine: &CheckpointEngine, limit: usize) -> Result<()> {
    let attempts = RecoveryLog::read_attempts(&engine.config().storage.recovery_log).await?;
    if attempts.is_empty() {
        println!("No recovery attempts recorded.");
        return Ok(());
    }

    let skip = attempts.len().saturating_sub(limit);
    for attempt in &attempts[skip..] {
        let strategy = attempt
            .result
            .as_ref()
            .map(|r| r.strategy.as_str())
            .unwrap_or("-");
        println!(
            "{} {:<22} {:<30} {:>6}ms {}",
            attempt.timestamp.format("%Y-%m-%d %H:%M:%S"),
            attempt.failure_type,
            strategy,
            attempt.duration_ms,
            if attempt.success { "ok" } else { "FAILED" }
        );
        if let Some(error) = &attempt.error {
            println!("    {}", error);
        }
    }

    let stats = RecoveryStats::from_attempts(attempts.iter());
    println!(
        "\n{} attempts, {:.0}% success, {}ms average",
        stats.total,
        stats.success_rate() * 100.0,
        stats.average_duration_ms
    );
    Ok(())
}

pub(crate) async fn backup(engine: &CheckpointEngine) -> Result<()> {
    let report = engine.backups().run_backup_cycle().await;
    println!(
        "Backed up {} agents, coordination {}",
        report.agents.len(),
        if report.coordination { "ok" } else { "failed" }
    );
    for failure in &report.failures {
        println!("  failed: {}", failure);
    }
    if !report.failures.is_empty() {
        bail!("{} backups failed", report.failures.len());
    }
    Ok(())
}

/// Validate the configuration file without opening the engine.
pub(crate) fn check_config(path: &Path) -> Result<()> {
    let config = ConfigLoader::load_or_default(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let result = ConfigValidator::validate(&config)?;

    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }
    if !result.is_valid() {
        bail!("{} configuration errors", result.errors.len());
    }
    println!("Configuration OK");
    Ok(())
}

/// Run the monitor loops until ctrl-c.
pub(crate) async fn monitor(
    engine: Arc<CheckpointEngine>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let monitor = Arc::new(AutoRecoveryMonitor::new(engine)?);
    let handles = monitor.clone().start(shutdown_tx.subscribe());
    info!("Monitor running, press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Monitor task ended abnormally: {}", e);
        }
    }

    monitor.collect_metrics();
    info!("Final metrics:\n{}", monitor.metrics().export());
    Ok(())
}

async fn read_stats(path: &Path) -> RecoveryStats {
    match RecoveryLog::read_attempts(path).await {
        Ok(attempts) => RecoveryStats::from_attempts(attempts.iter()),
        Err(e) => {
            warn!("Recovery log unreadable: {}", e);
            RecoveryStats::default()
        }
    }
}
