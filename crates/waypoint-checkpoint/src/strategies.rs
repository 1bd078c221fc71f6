//! Built-in recovery strategies.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::backup::BackupManager;
use crate::error::RecoveryError;
use crate::recovery::{RecoveryContext, RecoveryOutcome, RecoveryStrategy};
use crate::session::SessionManager;
use crate::state::StateStore;
use crate::store::CheckpointFilter;

/// Restore the newest checkpoint whose record and memory are both sound.
pub struct MemoryCorruptionStrategy {
    sessions: Arc<SessionManager>,
}

impl MemoryCorruptionStrategy {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl RecoveryStrategy for MemoryCorruptionStrategy {
    fn name(&self) -> &str {
        "checkpoint_restore"
    }

    async fn recover(&self, _context: &RecoveryContext) -> Result<RecoveryOutcome, RecoveryError> {
        let store = self.sessions.store();
        let candidate = store
            .list(&CheckpointFilter::default())
            .into_iter()
            .find(|cp| store.validate(cp) && cp.memory_state.validate().is_ok());

        let Some(checkpoint) = candidate else {
            warn!("No valid checkpoint available for memory recovery");
            return Ok(RecoveryOutcome::failed(
                "checkpoint_restore",
                json!({ "reason": "no valid checkpoint" }),
            ));
        };

        self.sessions.restore_from_checkpoint(&checkpoint.id).await?;
        Ok(RecoveryOutcome::succeeded(
            "checkpoint_restore",
            json!({
                "checkpoint_id": checkpoint.id,
                "checkpoint_type": checkpoint.checkpoint_type,
                "checkpoint_timestamp": checkpoint.timestamp,
            }),
        ))
    }
}

/// Reload the failed session from its archive, or start a fresh one.
pub struct SessionFailureStrategy {
    sessions: Arc<SessionManager>,
}

impl SessionFailureStrategy {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl RecoveryStrategy for SessionFailureStrategy {
    fn name(&self) -> &str {
        "session_recovery"
    }

    async fn recover(&self, context: &RecoveryContext) -> Result<RecoveryOutcome, RecoveryError> {
        let session_id = context
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.sessions.active_session().map(|s| s.id));

        if let Some(session_id) = &session_id {
            if !self.sessions.session_bundles(session_id).await.is_empty() {
                self.sessions.abandon_active();
                match self.sessions.load_persisted_session(session_id).await {
                    Ok(session) => {
                        return Ok(RecoveryOutcome::succeeded(
                            "session_reload",
                            json!({
                                "session_id": session.id,
                                "checkpoint_count": session.checkpoint_count,
                            }),
                        ));
                    }
                    Err(e) => warn!("Reloading session {} failed: {}", session_id, e),
                }
            }
        }

        self.sessions.abandon_active();
        let new_session = self
            .sessions
            .start(json!({
                "recovered": true,
                "previous_session": session_id,
                "recovered_at": Utc::now(),
            }))
            .await?;
        info!("Started replacement session {}", new_session);

        Ok(RecoveryOutcome::succeeded(
            "new_session",
            json!({
                "session_id": new_session,
                "previous_session": session_id,
            }),
        ))
    }
}

/// Restore one agent from backup, or reset it to minimal memory.
pub struct AgentMemoryFailureStrategy {
    backups: Arc<BackupManager>,
    state: Arc<dyn StateStore>,
}

impl AgentMemoryFailureStrategy {
    pub fn new(backups: Arc<BackupManager>, state: Arc<dyn StateStore>) -> Self {
        Self { backups, state }
    }
}

#[async_trait]
impl RecoveryStrategy for AgentMemoryFailureStrategy {
    fn name(&self) -> &str {
        "agent_memory_recovery"
    }

    async fn recover(&self, context: &RecoveryContext) -> Result<RecoveryOutcome, RecoveryError> {
        let agent_id = context
            .get("agent_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RecoveryError::InvalidContext("agent_id is required".to_string()))?;

        if self.backups.restore_agent(agent_id).await? {
            return Ok(RecoveryOutcome::succeeded(
                "backup_restore",
                json!({ "agent_id": agent_id }),
            ));
        }

        let minimal = json!({
            "agent_id": agent_id,
            "recovered": true,
            "recovered_at": Utc::now(),
            "knowledge": {},
            "context": {},
        });
        self.state.write_agent_memory(agent_id, &minimal).await?;
        warn!("No backup for agent {}, wrote minimal memory", agent_id);

        Ok(RecoveryOutcome::succeeded(
            "minimal_agent_recovery",
            json!({ "agent_id": agent_id }),
        ))
    }
}

/// Restore coordination state from backup, or reset it.
pub struct CoordinationFailureStrategy {
    backups: Arc<BackupManager>,
    state: Arc<dyn StateStore>,
}

impl CoordinationFailureStrategy {
    pub fn new(backups: Arc<BackupManager>, state: Arc<dyn StateStore>) -> Self {
        Self { backups, state }
    }
}

#[async_trait]
impl RecoveryStrategy for CoordinationFailureStrategy {
    fn name(&self) -> &str {
        "coordination_recovery"
    }

    async fn recover(&self, _context: &RecoveryContext) -> Result<RecoveryOutcome, RecoveryError> {
        if self.backups.restore_coordination().await? {
            return Ok(RecoveryOutcome::succeeded("backup_restore", json!({})));
        }

        let mut minimal = BTreeMap::new();
        minimal.insert("recovered".to_string(), json!(true));
        minimal.insert("recovered_at".to_string(), json!(Utc::now()));
        minimal.insert("active_agents".to_string(), json!([]));
        self.state.write_coordination_state(&minimal).await?;
        warn!("No coordination backup, wrote minimal coordination state");

        Ok(RecoveryOutcome::succeeded(
            "minimal_coordination_recovery",
            json!({}),
        ))
    }
}

/// Recover coordination, then every agent, then the session.
pub struct SystemFailureStrategy {
    coordination: Arc<CoordinationFailureStrategy>,
    agent: Arc<AgentMemoryFailureStrategy>,
    session: Arc<SessionFailureStrategy>,
    state: Arc<dyn StateStore>,
}

impl SystemFailureStrategy {
    pub fn new(
        coordination: Arc<CoordinationFailureStrategy>,
        agent: Arc<AgentMemoryFailureStrategy>,
        session: Arc<SessionFailureStrategy>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            coordination,
            agent,
            session,
            state,
        }
    }
}

fn step(target: &str, result: Result<RecoveryOutcome, RecoveryError>) -> (bool, Value) {
    match result {
        Ok(outcome) => (
            outcome.success,
            json!({ "target": target, "success": outcome.success, "result": outcome }),
        ),
        Err(e) => (
            false,
            json!({ "target": target, "success": false, "error": e.to_string() }),
        ),
    }
}

#[async_trait]
impl RecoveryStrategy for SystemFailureStrategy {
    fn name(&self) -> &str {
        "system_recovery"
    }

    async fn recover(&self, context: &RecoveryContext) -> Result<RecoveryOutcome, RecoveryError> {
        let mut steps = Vec::new();
        let mut success = true;

        let (ok, detail) = step("coordination", self.coordination.recover(context).await);
        success &= ok;
        steps.push(detail);

        for agent_id in self.state.agent_ids().await {
            let mut agent_context = context.clone();
            agent_context.insert("agent_id".to_string(), json!(agent_id));
            let (ok, detail) = step(
                &format!("agent:{}", agent_id),
                self.agent.recover(&agent_context).await,
            );
            success &= ok;
            steps.push(detail);
        }

        let (ok, detail) = step("session", self.session.recover(context).await);
        success &= ok;
        steps.push(detail);

        Ok(RecoveryOutcome {
            success,
            strategy: "system_recovery".to_string(),
            details: json!({ "steps": steps }),
        })
    }
}
