//! Engine wiring.

use std::sync::Arc;

use tracing::info;
use waypoint_config::Config;

use crate::backup::BackupManager;
use crate::error::CheckpointError;
use crate::events::EventBus;
use crate::integrity::hash_snapshot;
use crate::recovery::{RecoveryEngine, RecoveryResources};
use crate::session::SessionManager;
use crate::state::{FileStateStore, StateStore};
use crate::store::FileCheckpointStore;
use crate::validation::Validator;

/// Every engine component, built from one configuration and sharing one event bus.
pub struct CheckpointEngine {
    config: Config,
    events: EventBus,
    state: Arc<dyn StateStore>,
    store: Arc<FileCheckpointStore>,
    sessions: Arc<SessionManager>,
    backups: Arc<BackupManager>,
    recovery: Arc<RecoveryEngine>,
}

impl CheckpointEngine {
    /// Open the engine over a caller-supplied state store.
    pub async fn open(config: &Config, state: Arc<dyn StateStore>) -> Result<Self, CheckpointError> {
        let events = EventBus::new();
        let storage = &config.storage;

        let store = Arc::new(
            FileCheckpointStore::open(
                &storage.checkpoint_dir,
                config.checkpoint.clone(),
                Arc::new(Validator::new()),
                events.clone(),
            )
            .await?,
        );
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            state.clone(),
            events.clone(),
            &storage.memory_dir,
        ));
        let backups = Arc::new(BackupManager::new(
            state.clone(),
            &storage.memory_dir,
            &storage.coordination_dir,
            config.monitor.backup_retention,
        ));
        let recovery = Arc::new(RecoveryEngine::with_builtin_strategies(
            &config.recovery,
            Some(storage.recovery_log.clone()),
            events.clone(),
            RecoveryResources {
                sessions: sessions.clone(),
                backups: backups.clone(),
            },
        ));

        info!(
            "Checkpoint engine opened at {:?} with {} checkpoints",
            storage.checkpoint_dir,
            store.count()
        );

        Ok(Self {
            config: config.clone(),
            events,
            state,
            store,
            sessions,
            backups,
            recovery,
        })
    }

    /// Open the engine over the file-backed state store in the configured directories.
    pub async fn open_with_files(config: &Config) -> Result<Self, CheckpointError> {
        let state = Arc::new(FileStateStore::new(
            &config.storage.memory_dir,
            &config.storage.coordination_dir,
        ));
        Self::open(config, state).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    pub fn store(&self) -> &Arc<FileCheckpointStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    /// Integrity hash of the live state.
    pub async fn live_state_hash(&self) -> String {
        hash_snapshot(&self.state.capture().await)
    }

    /// Whether a recovery or restore is running.
    pub fn is_busy(&self) -> bool {
        self.recovery.is_recovering() || self.sessions.is_recovery_mode()
    }
}
