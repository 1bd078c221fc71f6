//! Recovery engine.
//!
//! Failures are classified by [`FailureType`] and dispatched to the strategy
//! registered for that type. Every attempt is bounded by the configured
//! timeout, kept in a bounded in-memory history and appended to an NDJSON
//! recovery log.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use waypoint_config::RecoveryConfig;

use crate::backup::BackupManager;
use crate::checkpoint::generate_id;
use crate::error::{CheckpointError, RecoveryError};
use crate::events::{EngineEvent, EventBus};
use crate::session::SessionManager;
use crate::strategies::{
    AgentMemoryFailureStrategy, CoordinationFailureStrategy, MemoryCorruptionStrategy,
    SessionFailureStrategy, SystemFailureStrategy,
};

/// Free-form details describing a failure.
pub type RecoveryContext = Map<String, Value>;

/// Failure classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FailureType {
    MemoryCorruption,
    SessionFailure,
    AgentMemoryFailure,
    CoordinationFailure,
    SystemFailure,
    /// A caller-defined failure class.
    Custom(String),
}

impl FailureType {
    pub fn as_str(&self) -> &str {
        match self {
            FailureType::MemoryCorruption => "memory_corruption",
            FailureType::SessionFailure => "session_failure",
            FailureType::AgentMemoryFailure => "agent_memory_failure",
            FailureType::CoordinationFailure => "coordination_failure",
            FailureType::SystemFailure => "system_failure",
            FailureType::Custom(name) => name,
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for FailureType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "memory_corruption" => FailureType::MemoryCorruption,
            "session_failure" => FailureType::SessionFailure,
            "agent_memory_failure" => FailureType::AgentMemoryFailure,
            "coordination_failure" => FailureType::CoordinationFailure,
            "system_failure" => FailureType::SystemFailure,
            _ => FailureType::Custom(value),
        }
    }
}

impl From<FailureType> for String {
    fn from(value: FailureType) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for FailureType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FailureType::from(s.to_string()))
    }
}

/// What a strategy achieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub success: bool,
    /// Name of the path taken, e.g. `backup_restore`.
    pub strategy: String,
    #[serde(default)]
    pub details: Value,
}

impl RecoveryOutcome {
    pub fn succeeded(strategy: impl Into<String>, details: Value) -> Self {
        Self {
            success: true,
            strategy: strategy.into(),
            details,
        }
    }

    pub fn failed(strategy: impl Into<String>, details: Value) -> Self {
        Self {
            success: false,
            strategy: strategy.into(),
            details,
        }
    }
}

/// One recorded recovery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub id: String,
    pub failure_type: String,
    pub context: RecoveryContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RecoveryOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
}

/// A recovery procedure for one failure type.
///
/// Strategies may be cancelled at any `.await` when the engine's timeout
/// fires, so they must leave state consistent at every suspension point.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn recover(&self, context: &RecoveryContext) -> Result<RecoveryOutcome, RecoveryError>;
}

/// Collaborators needed by the built-in strategies.
#[derive(Clone)]
pub struct RecoveryResources {
    pub sessions: Arc<SessionManager>,
    pub backups: Arc<BackupManager>,
}

/// Append-only NDJSON recovery log.
pub struct RecoveryLog {
    path: PathBuf,
}

impl RecoveryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, line: &Value) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CheckpointError::persistence(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CheckpointError::persistence(&self.path, e))?;

        let mut text = serde_json::to_string(line)?;
        text.push('\n');
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| CheckpointError::persistence(&self.path, e))
    }

    /// Finished attempts recorded in a log file, oldest first.
    ///
    /// Malformed lines are skipped.
    pub async fn read_attempts(path: &Path) -> Result<Vec<RecoveryAttempt>, CheckpointError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::persistence(path, e)),
        };

        let mut attempts = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(mut value) = serde_json::from_str::<Value>(line) else {
                warn!("Skipping malformed recovery log line");
                continue;
            };
            if value.get("event").and_then(Value::as_str) != Some("attempt_finished") {
                continue;
            }
            if let Some(object) = value.as_object_mut() {
                object.remove("event");
            }
            match serde_json::from_value::<RecoveryAttempt>(value) {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => warn!("Skipping unreadable recovery attempt: {}", e),
            }
        }
        Ok(attempts)
    }
}

/// Per-type attempt counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeStats {
    pub attempts: usize,
    pub successes: usize,
}

/// Aggregate view of the attempt history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub by_type: BTreeMap<String, TypeStats>,
    pub average_duration_ms: u64,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl RecoveryStats {
    pub fn from_attempts<'a>(attempts: impl IntoIterator<Item = &'a RecoveryAttempt>) -> Self {
        let mut stats = RecoveryStats::default();
        let mut total_duration = 0u64;
        for attempt in attempts {
            stats.total += 1;
            total_duration += attempt.duration_ms;
            let entry = stats.by_type.entry(attempt.failure_type.clone()).or_default();
            entry.attempts += 1;
            if attempt.success {
                stats.successful += 1;
                entry.successes += 1;
            } else {
                stats.failed += 1;
            }
            stats.last_attempt = Some(
                stats
                    .last_attempt
                    .map_or(attempt.timestamp, |t| t.max(attempt.timestamp)),
            );
        }
        if stats.total > 0 {
            stats.average_duration_ms = total_duration / stats.total as u64;
        }
        stats
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }
}

/// Dispatches failures to registered strategies.
pub struct RecoveryEngine {
    strategies: RwLock<HashMap<FailureType, Arc<dyn RecoveryStrategy>>>,
    history: Mutex<VecDeque<RecoveryAttempt>>,
    history_limit: usize,
    timeout: Duration,
    log: Option<RecoveryLog>,
    events: EventBus,
    sessions: Option<Arc<SessionManager>>,
}

impl RecoveryEngine {
    /// Create an engine with no strategies registered.
    pub fn new(config: &RecoveryConfig, log_path: Option<PathBuf>, events: EventBus) -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_limit: config.history_limit.max(1),
            timeout: config.timeout(),
            log: log_path.map(RecoveryLog::new),
            events,
            sessions: None,
        }
    }

    /// Create an engine with the five built-in strategies.
    ///
    /// Successful recoveries are followed by a `recovery` checkpoint.
    pub fn with_builtin_strategies(
        config: &RecoveryConfig,
        log_path: Option<PathBuf>,
        events: EventBus,
        resources: RecoveryResources,
    ) -> Self {
        let mut engine = Self::new(config, log_path, events);
        engine.sessions = Some(resources.sessions.clone());

        let memory = Arc::new(MemoryCorruptionStrategy::new(resources.sessions.clone()));
        let session = Arc::new(SessionFailureStrategy::new(resources.sessions.clone()));
        let agent = Arc::new(AgentMemoryFailureStrategy::new(
            resources.backups.clone(),
            resources.sessions.state().clone(),
        ));
        let coordination = Arc::new(CoordinationFailureStrategy::new(
            resources.backups.clone(),
            resources.sessions.state().clone(),
        ));
        let system = Arc::new(SystemFailureStrategy::new(
            coordination.clone(),
            agent.clone(),
            session.clone(),
            resources.sessions.state().clone(),
        ));

        engine.register(FailureType::MemoryCorruption, memory);
        engine.register(FailureType::SessionFailure, session);
        engine.register(FailureType::AgentMemoryFailure, agent);
        engine.register(FailureType::CoordinationFailure, coordination);
        engine.register(FailureType::SystemFailure, system);
        engine
    }

    /// Register or replace the strategy for a failure type.
    pub fn register(&self, failure_type: FailureType, strategy: Arc<dyn RecoveryStrategy>) {
        debug!(
            "Registering recovery strategy '{}' for {}",
            strategy.name(),
            failure_type
        );
        self.strategies.write().insert(failure_type, strategy);
    }

    pub fn registered_types(&self) -> Vec<FailureType> {
        let mut types: Vec<FailureType> = self.strategies.read().keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether any recovery is running.
    pub fn is_recovering(&self) -> bool {
        self.events.is_recovering()
    }

    /// Run the strategy registered for `failure_type`.
    pub async fn perform_recovery(
        &self,
        failure_type: FailureType,
        context: RecoveryContext,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        let id = generate_id("recovery", Utc::now().timestamp_millis());
        let timestamp = Utc::now();
        let started = Instant::now();

        let strategy = self.strategies.read().get(&failure_type).cloned();
        let Some(strategy) = strategy else {
            let err = RecoveryError::UnknownFailureType(failure_type.to_string());
            warn!("{}", err);
            self.record(RecoveryAttempt {
                id,
                failure_type: failure_type.to_string(),
                context,
                result: None,
                error: Some(err.to_string()),
                timestamp,
                duration_ms: 0,
                success: false,
            })
            .await;
            return Err(err);
        };

        let _guard = self.events.recovery_guard();
        info!("Starting {} recovery ({})", failure_type, strategy.name());
        self.write_log(&json!({
            "event": "attempt_started",
            "id": id,
            "failure_type": failure_type.as_str(),
            "context": context,
            "timestamp": timestamp,
        }))
        .await;

        let result = match timeout(self.timeout, strategy.recover(&context)).await {
            Ok(result) => result,
            Err(_) => Err(RecoveryError::Timeout {
                failure_type: failure_type.to_string(),
                timeout: self.timeout,
            }),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, error) = match &result {
            Ok(outcome) => (Some(outcome.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let success = outcome.as_ref().is_some_and(|o| o.success);

        if success {
            info!("{} recovery succeeded in {}ms", failure_type, duration_ms);
        } else if let Some(e) = &error {
            error!("{} recovery failed: {}", failure_type, e);
        } else {
            warn!("{} recovery completed without success", failure_type);
        }

        self.record(RecoveryAttempt {
            id: id.clone(),
            failure_type: failure_type.to_string(),
            context,
            result: outcome.clone(),
            error,
            timestamp,
            duration_ms,
            success,
        })
        .await;

        self.events.emit(EngineEvent::RecoveryCompleted {
            failure_type: failure_type.to_string(),
            success,
        });

        if success {
            if let (Some(sessions), Some(outcome)) = (&self.sessions, &outcome) {
                let details = json!({
                    "attempt_id": id,
                    "failure_type": failure_type.as_str(),
                    "strategy": outcome.strategy,
                });
                if let Err(e) = sessions.create_recovery_checkpoint(details).await {
                    warn!("Failed to write recovery checkpoint: {}", e);
                }
            }
        }

        result
    }

    async fn record(&self, attempt: RecoveryAttempt) {
        let mut line = serde_json::to_value(&attempt).unwrap_or(Value::Null);
        if let Some(object) = line.as_object_mut() {
            object.insert("event".to_string(), json!("attempt_finished"));
        }
        self.write_log(&line).await;

        let mut history = self.history.lock();
        history.push_back(attempt);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    async fn write_log(&self, line: &Value) {
        if let Some(log) = &self.log {
            if let Err(e) = log.append(line).await {
                warn!("Failed to append to recovery log {:?}: {}", log.path(), e);
            }
        }
    }

    /// Attempts recorded by this engine, oldest first.
    pub fn history(&self) -> Vec<RecoveryAttempt> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats::from_attempts(self.history.lock().iter())
    }
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
