//! CLI definitions for Waypoint.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Waypoint CLI.
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(about = "Checkpoint and recovery engine")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/waypoint.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Create a checkpoint of the current state
    Create {
        /// Checkpoint kind
        #[arg(long, value_enum, default_value_t = CreateKind::Safety)]
        kind: CreateKind,

        /// Reason, milestone name or operation name
        label: String,
    },

    /// List checkpoints, newest first
    List {
        /// Only checkpoints of this session
        #[arg(long)]
        session: Option<String>,

        /// Only checkpoints of this type (e.g. milestone, safety)
        #[arg(long = "type")]
        checkpoint_type: Option<String>,

        /// Maximum number of checkpoints
        #[arg(long)]
        limit: Option<usize>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Print one checkpoint as JSON
    Show {
        /// Checkpoint ID
        id: String,
    },

    /// Restore the live state from a checkpoint
    Restore {
        /// Checkpoint ID
        id: String,
    },

    /// Roll back to a checkpoint, saving the current state first
    Rollback {
        /// Checkpoint ID
        id: String,
    },

    /// Apply the retention policy now
    Cleanup,

    /// Show store, session and recovery health
    Status {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Run a recovery strategy
    Recover {
        /// Failure type (memory_corruption, session_failure, agent_memory_failure,
        /// coordination_failure, system_failure)
        failure_type: String,

        /// Agent to recover
        #[arg(long)]
        agent_id: Option<String>,

        /// Session to reload
        #[arg(long)]
        session_id: Option<String>,

        /// Extra context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },

    /// Show recorded recovery attempts
    History {
        /// Number of most recent attempts to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Back up agent memory and coordination state once
    Backup,

    /// Validate the configuration file
    CheckConfig,

    /// Run the auto-recovery monitor until interrupted
    Monitor,
}

#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum CreateKind {
    Safety,
    Milestone,
    Boundary,
    Operation,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}
