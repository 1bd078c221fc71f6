//! Engine events.
//!
//! Components publish on a shared broadcast bus instead of calling each
//! other; the monitor and the version-control hook are subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::trace;

use crate::checkpoint::CheckpointType;

const EVENT_CAPACITY: usize = 256;

/// Which engine operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CheckpointSave,
    CheckpointRestore,
    MemoryRestore,
    SessionLoad,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CheckpointSave => "checkpoint_save",
            ErrorKind::CheckpointRestore => "checkpoint_restore",
            ErrorKind::MemoryRestore => "memory_restore",
            ErrorKind::SessionLoad => "session_load",
        }
    }
}

/// A failed engine operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    /// Operation details such as `checkpoint_id`, `agent_id` or `session_id`.
    pub context: Map<String, Value>,
    /// Raised while a recovery was running.
    pub during_recovery: bool,
    pub timestamp: DateTime<Utc>,
}

/// Everything the engine publishes.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    CheckpointCreated {
        id: String,
        checkpoint_type: CheckpointType,
        session_id: Option<String>,
    },
    CheckpointRestored {
        id: String,
    },
    CheckpointsEvicted {
        ids: Vec<String>,
    },
    /// A checkpoint of a hook-enabled type was written.
    VersionControl {
        id: String,
        checkpoint_type: CheckpointType,
        session_id: Option<String>,
    },
    SessionStarted {
        session_id: String,
        restored: bool,
    },
    SessionEnded {
        session_id: String,
        checkpoint_count: usize,
    },
    RecoveryCompleted {
        failure_type: String,
        success: bool,
    },
    Error(ErrorEvent),
}

/// Broadcast bus shared by every engine component.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    recovering: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sender,
            recovering: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            trace!("Engine event dropped, no subscribers");
        }
    }

    /// Publish an [`ErrorEvent`], stamped with the current recovery state.
    pub fn error(&self, kind: ErrorKind, message: impl Into<String>, context: Map<String, Value>) {
        self.emit(EngineEvent::Error(ErrorEvent {
            kind,
            message: message.into(),
            context,
            during_recovery: self.is_recovering(),
            timestamp: Utc::now(),
        }));
    }

    /// Mark a recovery as running until the guard is dropped.
    pub fn recovery_guard(&self) -> RecoveryGuard {
        RecoveryGuard::enter(&self.recovering)
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst) > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the recovery flag on drop, including when the owning future is cancelled.
pub struct RecoveryGuard {
    counter: Arc<AtomicUsize>,
}

impl RecoveryGuard {
    pub(crate) fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build an event context from key/value pairs.
pub fn context<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::CheckpointRestored {
            id: "safety_1".to_string(),
        });

        match rx.recv().await.unwrap() {
            EngineEvent::CheckpointRestored { id } => assert_eq!(id, "safety_1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(EngineEvent::CheckpointsEvicted { ids: vec![] });
    }

    #[tokio::test]
    async fn test_error_stamped_with_recovery_state() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        {
            let _guard = bus.recovery_guard();
            assert!(bus.is_recovering());
            bus.error(
                ErrorKind::MemoryRestore,
                "disk full",
                context([("agent_id", json!("a1"))]),
            );
        }
        assert!(!bus.is_recovering());

        match rx.recv().await.unwrap() {
            EngineEvent::Error(event) => {
                assert_eq!(event.kind, ErrorKind::MemoryRestore);
                assert!(event.during_recovery);
                assert_eq!(event.context["agent_id"], "a1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_nested_guards() {
        let bus = EventBus::new();
        let outer = bus.recovery_guard();
        let inner = bus.clone().recovery_guard();
        drop(outer);
        assert!(bus.is_recovering());
        drop(inner);
        assert!(!bus.is_recovering());
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::CheckpointSave.as_str(), "checkpoint_save");
        assert_eq!(
            serde_json::to_value(ErrorKind::SessionLoad).unwrap(),
            json!("session_load")
        );
    }
}
