//! Waypoint - checkpoint and recovery engine
//!
//! Administration CLI over the checkpoint store, session manager and
//! recovery engine.

mod cli;
mod commands;

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use waypoint_checkpoint::{CheckpointEngine, CommandHook, spawn_hook_listener};
use waypoint_config::{ConfigLoader, LoggingConfig};

use crate::cli::{Cli, Commands};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize tracing from the `[logging]` section.
///
/// `RUST_LOG` overrides the configured level. When a directory is set, logs
/// are also written there with daily rotation.
fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_writer = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("waypoint")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    match (config.json, file_writer) {
        (true, Some(writer)) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(fmt::layer().json().with_writer(writer))
            .init(),
        (true, None) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (false, Some(writer)) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .init(),
        (false, None) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::CheckConfig) {
        return commands::check_config(&cli.config);
    }

    let config = ConfigLoader::load_or_default(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    init_tracing(&config.logging)?;
    debug!("Loaded configuration from {}", cli.config.display());

    let engine = Arc::new(CheckpointEngine::open_with_files(&config).await?);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let hook = config.checkpoint.hook_command.as_ref().map(|command| {
        info!("Version-control hook enabled for {:?}", config.checkpoint.hook_types);
        spawn_hook_listener(
            engine.events(),
            Arc::new(CommandHook::new(command.clone())),
            shutdown_tx.subscribe(),
        )
    });

    let result = match cli.command {
        Commands::Create { kind, label } => commands::create(&engine, kind, label).await,
        Commands::List {
            session,
            checkpoint_type,
            limit,
            format,
        } => commands::list(&engine, session, checkpoint_type, limit, format),
        Commands::Show { id } => commands::show(&engine, &id).await,
        Commands::Restore { id } => commands::restore(&engine, &id).await,
        Commands::Rollback { id } => commands::rollback(&engine, &id).await,
        Commands::Cleanup => commands::cleanup(&engine).await,
        Commands::Status { format } => commands::status(&engine, format).await,
        Commands::Recover {
            failure_type,
            agent_id,
            session_id,
            context,
        } => commands::recover(&engine, &failure_type, agent_id, session_id, context).await,
        Commands::History { limit } => commands::history(&engine, limit).await,
        Commands::Backup => commands::backup(&engine).await,
        Commands::Monitor => commands::monitor(engine.clone(), shutdown_tx.clone()).await,
        Commands::CheckConfig => Ok(()),
    };

    let _ = shutdown_tx.send(());
    if let Some(handle) = hook {
        let _ = handle.await;
    }

    result
}
