//! Version-control hook.
//!
//! Hooks are invoked best-effort after checkpoints of the configured types
//! are written. A failing hook is logged and never affects the checkpoint.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointType;
use crate::error::CheckpointError;
use crate::events::{EngineEvent, EventBus};

const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives notifications for hook-enabled checkpoints.
#[async_trait]
pub trait VersionControlHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_checkpoint(
        &self,
        checkpoint_id: &str,
        checkpoint_type: CheckpointType,
        session_id: Option<&str>,
    ) -> Result<(), CheckpointError>;
}

/// Runs a shell command for every hook-enabled checkpoint.
///
/// The command sees `WAYPOINT_CHECKPOINT_ID`, `WAYPOINT_CHECKPOINT_TYPE` and,
/// when set, `WAYPOINT_SESSION_ID`.
pub struct CommandHook {
    command: String,
}

impl CommandHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl VersionControlHook for CommandHook {
    fn name(&self) -> &str {
        "command"
    }

    async fn on_checkpoint(
        &self,
        checkpoint_id: &str,
        checkpoint_type: CheckpointType,
        session_id: Option<&str>,
    ) -> Result<(), CheckpointError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .env("WAYPOINT_CHECKPOINT_ID", checkpoint_id)
            .env("WAYPOINT_CHECKPOINT_TYPE", checkpoint_type.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(session_id) = session_id {
            cmd.env("WAYPOINT_SESSION_ID", session_id);
        }

        let hook_error = |reason: String| CheckpointError::Hook {
            hook: self.command.clone(),
            reason,
        };

        let output = timeout(HOOK_TIMEOUT, cmd.output())
            .await
            .map_err(|_| hook_error(format!("timed out after {:?}", HOOK_TIMEOUT)))?
            .map_err(|e| hook_error(e.to_string()))?;

        if output.status.success() {
            debug!("Hook succeeded for checkpoint {}", checkpoint_id);
            Ok(())
        } else {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(hook_error(format!(
                "exit code {}: {}",
                code,
                stderr.trim()
            )))
        }
    }
}

/// Forward `VersionControl` events to a hook until shutdown.
pub fn spawn_hook_listener(
    events: &EventBus,
    hook: Arc<dyn VersionControlHook>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        info!("Version-control hook '{}' listening", hook.name());
        loop {
            tokio::select! {
                // Pending events are drained before shutdown is honored.
                biased;
                event = rx.recv() => match event {
                    Ok(EngineEvent::VersionControl { id, checkpoint_type, session_id }) => {
                        if let Err(e) = hook
                            .on_checkpoint(&id, checkpoint_type, session_id.as_deref())
                            .await
                        {
                            warn!("Version-control hook failed: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Hook listener lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown_rx.recv() => {
                    info!("Hook listener shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingHook {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VersionControlHook for RecordingHook {
        fn name(&self) -> &str {
            "recording"
        }

        async fn on_checkpoint(
            &self,
            checkpoint_id: &str,
            _checkpoint_type: CheckpointType,
            _session_id: Option<&str>,
        ) -> Result<(), CheckpointError> {
            self.seen.lock().push(checkpoint_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_listener_forwards_version_control_events() {
        let bus = EventBus::new();
        let hook = Arc::new(RecordingHook {
            seen: Mutex::new(Vec::new()),
        });
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_hook_listener(&bus, hook.clone(), shutdown_rx);

        bus.emit(EngineEvent::CheckpointRestored { id: "ignored".to_string() });
        bus.emit(EngineEvent::VersionControl {
            id: "milestone_1".to_string(),
            checkpoint_type: CheckpointType::Milestone,
            session_id: None,
        });

        for _ in 0..50 {
            if !hook.seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*hook.seen.lock(), vec!["milestone_1".to_string()]);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_hook_env() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("hook.txt");
        let hook = CommandHook::new(format!(
            "echo \"$WAYPOINT_CHECKPOINT_ID $WAYPOINT_CHECKPOINT_TYPE $WAYPOINT_SESSION_ID\" > {}",
            out.display()
        ));

        hook.on_checkpoint("milestone_1", CheckpointType::Milestone, Some("session_1"))
            .await
            .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "milestone_1 milestone session_1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_hook_failure() {
        let hook = CommandHook::new("exit 3");
        let err = hook
            .on_checkpoint("milestone_1", CheckpointType::Milestone, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit code 3"));
    }
}
