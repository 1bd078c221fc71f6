//! Session lifecycle.
//!
//! A session is opened by a `session_start` checkpoint, accumulates
//! checkpoints while active, and is closed by a `session_end` checkpoint
//! followed by an archive bundle. Archived bundles can be reloaded into a
//! new active session flagged as restored.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointType, generate_id};
use crate::error::CheckpointError;
use crate::events::{EngineEvent, ErrorKind, EventBus, RecoveryGuard, context};
use crate::snapshot::MemorySnapshot;
use crate::state::{StateStore, read_json, encode_id, write_json};
use crate::store::{CheckpointFilter, FileCheckpointStore, StoreHealth};

const SESSION_BUNDLE: &str = "session_memory.json";

/// An active or archived session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Checkpoints written while the session was active, excluding the closing one.
    pub checkpoint_count: usize,
    /// Ids of decision checkpoints in creation order.
    pub decision_points: Vec<String>,
    /// Snapshot captured with the most recent checkpoint.
    pub memory_state: MemorySnapshot,
    /// Reloaded from an archive or a `session_start` checkpoint.
    pub restored: bool,
    /// Initial data supplied to `start`.
    pub metadata: Value,
}

impl Session {
    fn new(id: String, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            start_time: now,
            last_activity: now,
            checkpoint_count: 0,
            decision_points: Vec::new(),
            memory_state: MemorySnapshot::default(),
            restored: false,
            metadata,
        }
    }

    fn summary(&self) -> Value {
        json!({
            "id": self.id,
            "start_time": self.start_time,
            "last_activity": self.last_activity,
            "checkpoint_count": self.checkpoint_count,
            "decision_points": self.decision_points,
            "restored": self.restored,
        })
    }
}

/// Decision checkpoint input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionData {
    pub context: String,
    #[serde(default)]
    pub options: Vec<Value>,
    pub selected: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// How risky an operation is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Pre-operation checkpoint input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationData {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub risk: RiskLevel,
    #[serde(default)]
    pub parameters: Value,
}

impl OperationData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Archive bundle written when a session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionArchive {
    pub session: Session,
    /// The session's checkpoints, oldest first, excluding the closing one.
    pub checkpoints: Vec<Checkpoint>,
    /// Id of the closing `session_end` checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_checkpoint: Option<String>,
    pub memory_state: MemorySnapshot,
    pub archived_at: DateTime<Utc>,
}

/// Result of [`SessionManager::rollback_to_point`].
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub target_checkpoint: String,
    pub safety_checkpoint: String,
    pub rollback_checkpoint: String,
}

/// Combined store and session health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub store: StoreHealth,
    pub active_session: Option<String>,
    pub recovery_mode: bool,
    pub warnings: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Drives session lifecycle and checkpoint creation.
pub struct SessionManager {
    store: Arc<FileCheckpointStore>,
    state: Arc<dyn StateStore>,
    events: EventBus,
    sessions_dir: PathBuf,
    active: Mutex<Option<Session>>,
    recovery_depth: Arc<AtomicUsize>,
}

impl SessionManager {
    /// Create a session manager persisting reloadable bundles under
    /// `<memory_dir>/sessions`.
    pub fn new(
        store: Arc<FileCheckpointStore>,
        state: Arc<dyn StateStore>,
        events: EventBus,
        memory_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            store,
            state,
            events,
            sessions_dir: memory_dir.as_ref().join("sessions"),
            active: Mutex::new(None),
            recovery_depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<FileCheckpointStore> {
        &self.store
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    pub fn active_session(&self) -> Option<Session> {
        self.active.lock().clone()
    }

    /// Drop the active session without ending it.
    pub fn abandon_active(&self) -> Option<Session> {
        let abandoned = self.active.lock().take();
        if let Some(session) = &abandoned {
            warn!("Abandoning session {}", session.id);
        }
        abandoned
    }

    /// Whether a restore is in progress.
    pub fn is_recovery_mode(&self) -> bool {
        self.recovery_depth.load(Ordering::SeqCst) > 0
    }

    /// Open a new session and write its `session_start` checkpoint.
    pub async fn start(&self, initial_data: Value) -> Result<String, CheckpointError> {
        let session_id = generate_id("session", Utc::now().timestamp_millis());
        {
            let mut active = self.active.lock();
            if let Some(current) = active.as_ref() {
                return Err(CheckpointError::SessionActive(current.id.clone()));
            }
            *active = Some(Session::new(session_id.clone(), initial_data.clone()));
        }

        let payload = json!({
            "session": {
                "id": session_id,
                "metadata": initial_data,
            }
        });
        if let Err(e) = self.record(CheckpointType::SessionStart, payload).await {
            self.active.lock().take();
            return Err(e);
        }

        info!("Session {} started", session_id);
        self.events.emit(EngineEvent::SessionStarted {
            session_id: session_id.clone(),
            restored: false,
        });
        Ok(session_id)
    }

    /// Record a decision point.
    pub async fn create_decision_checkpoint(
        &self,
        decision: DecisionData,
    ) -> Result<String, CheckpointError> {
        let payload = json!({ "decision": decision });
        self.record(CheckpointType::DecisionPoint, payload).await
    }

    /// Record the state before a risky operation.
    pub async fn create_operation_checkpoint(
        &self,
        operation: OperationData,
    ) -> Result<String, CheckpointError> {
        let payload = json!({ "operation": operation });
        self.record(CheckpointType::PreOperation, payload).await
    }

    /// Record a session boundary, milestone or session end.
    ///
    /// A `session_end` checkpoint closes and archives the active session.
    pub async fn create_session_checkpoint(
        &self,
        checkpoint_type: CheckpointType,
        data: Value,
    ) -> Result<String, CheckpointError> {
        let payload = match checkpoint_type {
            CheckpointType::Milestone => match data.get("milestone") {
                Some(_) => data,
                None => json!({ "milestone": data }),
            },
            CheckpointType::SessionBoundary | CheckpointType::SessionEnd => {
                let session = self
                    .active_session()
                    .map(|s| s.summary())
                    .unwrap_or(Value::Null);
                json!({ "session": session, "data": data })
            }
            other => {
                return Err(CheckpointError::InvalidData(format!(
                    "'{}' is not a session checkpoint type",
                    other
                )));
            }
        };

        if checkpoint_type == CheckpointType::SessionEnd && self.active_session().is_none() {
            return Err(CheckpointError::NoActiveSession);
        }

        let id = self.record(checkpoint_type, payload).await?;

        if checkpoint_type == CheckpointType::SessionEnd {
            let ended = self.active.lock().take();
            if let Some(session) = ended {
                self.finish_session(session, &id).await;
            }
        }
        Ok(id)
    }

    async fn finish_session(&self, session: Session, end_checkpoint: &str) {
        if let Err(e) = self.archive(&session, Some(end_checkpoint)).await {
            error!("Failed to archive session {}: {}", session.id, e);
        }
        info!(
            "Session {} ended after {} checkpoints",
            session.id, session.checkpoint_count
        );
        self.events.emit(EngineEvent::SessionEnded {
            session_id: session.id,
            checkpoint_count: session.checkpoint_count,
        });
    }

    /// End the active session. Returns its id.
    pub async fn end(&self) -> Result<String, CheckpointError> {
        let session_id = self
            .active_session()
            .map(|s| s.id)
            .ok_or(CheckpointError::NoActiveSession)?;
        self.create_session_checkpoint(CheckpointType::SessionEnd, json!({ "reason": "end" }))
            .await?;
        Ok(session_id)
    }

    /// Safety checkpoint written outside the normal flow.
    pub async fn create_emergency_checkpoint(&self, reason: &str) -> Result<String, CheckpointError> {
        warn!("Creating emergency checkpoint: {}", reason);
        self.record(CheckpointType::Safety, json!({ "reason": reason, "emergency": true }))
            .await
    }

    /// Checkpoint recording a completed recovery.
    pub async fn create_recovery_checkpoint(&self, details: Value) -> Result<String, CheckpointError> {
        self.record(CheckpointType::Recovery, json!({ "recovery": details }))
            .await
    }

    /// Capture, save and account a checkpoint against the active session.
    async fn record(
        &self,
        checkpoint_type: CheckpointType,
        payload: Value,
    ) -> Result<String, CheckpointError> {
        let session_id = self.active.lock().as_ref().map(|s| s.id.clone());
        let snapshot = self.state.capture().await;

        let mut checkpoint = Checkpoint::new(checkpoint_type, payload).with_memory_state(snapshot.clone());
        if let Some(session_id) = &session_id {
            checkpoint = checkpoint.with_session(session_id.clone());
        }
        let id = self.store.save(checkpoint).await?;

        if let Some(session_id) = session_id {
            let mut active = self.active.lock();
            if let Some(session) = active.as_mut().filter(|s| s.id == session_id) {
                session.last_activity = Utc::now();
                session.memory_state = snapshot;
                if checkpoint_type != CheckpointType::SessionEnd {
                    session.checkpoint_count += 1;
                }
                if checkpoint_type == CheckpointType::DecisionPoint {
                    session.decision_points.push(id.clone());
                }
            }
        }

        debug!("Recorded {} checkpoint {}", checkpoint_type, id);
        Ok(id)
    }

    /// Write the archive bundle for a session. Returns the archive path.
    pub async fn archive(
        &self,
        session: &Session,
        end_checkpoint: Option<&str>,
    ) -> Result<PathBuf, CheckpointError> {
        let mut checkpoints: Vec<Checkpoint> = self
            .store
            .list(&CheckpointFilter::session(&session.id))
            .into_iter()
            .filter(|cp| Some(cp.id.as_str()) != end_checkpoint)
            .collect();
        // list() is newest first, ties broken by latest insert
        checkpoints.reverse();

        let bundle = SessionArchive {
            session: session.clone(),
            checkpoints,
            end_checkpoint: end_checkpoint.map(str::to_string),
            memory_state: self.state.capture().await,
            archived_at: Utc::now(),
        };

        let archive_path = self.store.archive_dir().join(format!(
            "session_{}_{}.json",
            encode_id(&session.id),
            bundle.archived_at.timestamp_millis()
        ));
        write_json(&archive_path, &bundle).await?;
        write_json(&self.bundle_path(&session.id), &bundle).await?;

        debug!(
            "Archived session {} with {} checkpoints to {:?}",
            session.id,
            bundle.checkpoints.len(),
            archive_path
        );
        Ok(archive_path)
    }

    fn bundle_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir
            .join(encode_id(session_id))
            .join(SESSION_BUNDLE)
    }

    /// Every readable bundle for a session, newest first.
    pub async fn session_bundles(&self, session_id: &str) -> Vec<SessionArchive> {
        let mut candidates = vec![self.bundle_path(session_id)];

        let archive_dir = self.store.archive_dir();
        let prefix = format!("session_{}_", encode_id(session_id));
        if let Ok(mut entries) = fs::read_dir(&archive_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"));
                if matches {
                    candidates.push(path);
                }
            }
        }

        let mut bundles = Vec::new();
        for path in candidates {
            match read_json::<SessionArchive>(&path).await {
                Ok(Some(bundle)) if bundle.session.id == session_id => bundles.push(bundle),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable session bundle: {}", e),
            }
        }
        bundles.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        bundles
    }

    /// Reload an archived session into a new active session.
    pub async fn load_persisted_session(&self, session_id: &str) -> Result<Session, CheckpointError> {
        match self.load_persisted_inner(session_id).await {
            Ok(session) => Ok(session),
            Err(e) => {
                self.events.error(
                    ErrorKind::SessionLoad,
                    e.to_string(),
                    context([("session_id", json!(session_id))]),
                );
                Err(e)
            }
        }
    }

    async fn load_persisted_inner(&self, session_id: &str) -> Result<Session, CheckpointError> {
        if let Some(current) = self.active_session() {
            return Err(CheckpointError::SessionActive(current.id));
        }

        let bundle = self
            .session_bundles(session_id)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| CheckpointError::NotFound(format!("session {}", session_id)))?;

        self.state.restore(&bundle.memory_state).await?;

        let mut session = bundle.session;
        session.restored = true;
        session.last_activity = Utc::now();
        session.memory_state = bundle.memory_state;
        self.activate(session.clone())?;

        info!("Session {} reloaded from archive", session_id);
        Ok(session)
    }

    fn activate(&self, session: Session) -> Result<(), CheckpointError> {
        let session_id = session.id.clone();
        {
            let mut active = self.active.lock();
            if let Some(current) = active.as_ref().filter(|s| s.id != session_id) {
                return Err(CheckpointError::SessionActive(current.id.clone()));
            }
            *active = Some(session);
        }
        self.events.emit(EngineEvent::SessionStarted {
            session_id,
            restored: true,
        });
        Ok(())
    }

    /// Restore the live state from a checkpoint.
    ///
    /// Restoring a `session_start` checkpoint also reconstructs its session,
    /// replacing any active one.
    pub async fn restore_from_checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint, CheckpointError> {
        let _guard = RecoveryGuard::enter(&self.recovery_depth);

        let checkpoint = match self.store.load(checkpoint_id).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                let e = CheckpointError::NotFound(checkpoint_id.to_string());
                self.emit_restore_error(checkpoint_id, &e);
                return Err(e);
            }
            Err(e) => {
                self.emit_restore_error(checkpoint_id, &e);
                return Err(e);
            }
        };

        if let Err(e) = self.state.restore(&checkpoint.memory_state).await {
            self.events.error(
                ErrorKind::MemoryRestore,
                e.to_string(),
                context([("checkpoint_id", json!(checkpoint_id))]),
            );
            return Err(e);
        }

        if checkpoint.checkpoint_type == CheckpointType::SessionStart {
            if let Some(session_id) = &checkpoint.session_id {
                let mut session = Session::new(
                    session_id.clone(),
                    checkpoint
                        .payload
                        .pointer("/session/metadata")
                        .cloned()
                        .unwrap_or(Value::Null),
                );
                session.start_time = checkpoint.created_at();
                session.checkpoint_count = 1;
                session.memory_state = checkpoint.memory_state.clone();
                session.restored = true;
                self.abandon_active();
                self.activate(session)?;
            }
        }

        info!("Restored state from checkpoint {}", checkpoint_id);
        self.events.emit(EngineEvent::CheckpointRestored {
            id: checkpoint_id.to_string(),
        });
        Ok(checkpoint)
    }

    fn emit_restore_error(&self, checkpoint_id: &str, error: &CheckpointError) {
        self.events.error(
            ErrorKind::CheckpointRestore,
            error.to_string(),
            context([("checkpoint_id", json!(checkpoint_id))]),
        );
    }

    /// Roll back to a checkpoint, protecting the current state first.
    ///
    /// Writes a `safety` checkpoint, restores the target, then writes a
    /// `rollback` checkpoint naming both.
    pub async fn rollback_to_point(&self, checkpoint_id: &str) -> Result<RollbackOutcome, CheckpointError> {
        let safety_checkpoint = self
            .record(
                CheckpointType::Safety,
                json!({ "reason": "pre_rollback", "rollback_target": checkpoint_id }),
            )
            .await?;

        self.restore_from_checkpoint(checkpoint_id).await?;

        let rollback_checkpoint = self
            .record(
                CheckpointType::Rollback,
                json!({
                    "target_checkpoint": checkpoint_id,
                    "safety_checkpoint": safety_checkpoint,
                }),
            )
            .await?;

        info!(
            "Rolled back to {} (safety checkpoint {})",
            checkpoint_id, safety_checkpoint
        );
        Ok(RollbackOutcome {
            target_checkpoint: checkpoint_id.to_string(),
            safety_checkpoint,
            rollback_checkpoint,
        })
    }

    /// Store health plus session warnings.
    pub fn health_report(&self) -> HealthReport {
        let store = self.store.health();
        let active_session = self.active_session().map(|s| s.id);

        let mut warnings = store.warnings.clone();
        if active_session.is_none() {
            warnings.push("no active session".to_string());
        }

        HealthReport {
            store,
            active_session,
            recovery_mode: self.is_recovery_mode(),
            warnings,
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
