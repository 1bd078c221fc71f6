
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::{Map, json};
    use tempfile::TempDir;
    use waypoint_checkpoint::{DecisionData, MemorySnapshot, MemoryStateStore, StateStore};
    use waypoint_config::{Config, StorageConfig};

    use super::*;

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            storage: StorageConfig::rooted_at(temp_dir.path()),
            ..Config::default()
        }
    }

    async fn monitor_with(config: Config, state: Arc<dyn StateStore>) -> AutoRecoveryMonitor {
        let engine = CheckpointEngine::open(&config, state).await.unwrap();
        AutoRecoveryMonitor::new(Arc::new(engine)).unwrap()
    }

    async fn monitor(temp_dir: &TempDir) -> AutoRecoveryMonitor {
        monitor_with(test_config(temp_dir), Arc::new(MemoryStateStore::new())).await
    }

    fn error_event(kind: ErrorKind, context: Map<String, Value>) -> ErrorEvent {
        ErrorEvent {
            kind,
            message: "boom".to_string(),
            context,
            during_recovery: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.monitor.backup_interval_secs = 0;

        let engine = CheckpointEngine::open(&config, Arc::new(MemoryStateStore::new()))
            .await
            .unwrap();
        let result = AutoRecoveryMonitor::new(Arc::new(engine));
        assert!(matches!(result, Err(MonitorError::InvalidConfig(_))));
    }

    #[test]
    fn test_map_error_events() {
        let save = error_event(ErrorKind::CheckpointSave, Map::new());
        let restore = error_event(ErrorKind::CheckpointRestore, Map::new());
        let session = error_event(ErrorKind::SessionLoad, Map::new());

        let mut agent_context = Map::new();
        agent_context.insert("agent_id".to_string(), json!("scout"));
        let agent = error_event(ErrorKind::MemoryRestore, agent_context);
        let coordination = error_event(ErrorKind::MemoryRestore, Map::new());

        let mapped = |e: &ErrorEvent| AutoRecoveryMonitor::map_error_event(e).unwrap().0;
        assert_eq!(mapped(&save), FailureType::MemoryCorruption);
        assert_eq!(mapped(&restore), FailureType::MemoryCorruption);
        assert_eq!(mapped(&session), FailureType::SessionFailure);
        assert_eq!(mapped(&agent), FailureType::AgentMemoryFailure);
        assert_eq!(mapped(&coordination), FailureType::CoordinationFailure);
    }

    #[test]
    fn test_mapped_context_carries_source_event() {
        let mut context = Map::new();
        context.insert("checkpoint_id".to_string(), json!("safety_abc"));
        let event = error_event(ErrorKind::CheckpointSave, context);

        let (_, mapped) = AutoRecoveryMonitor::map_error_event(&event).unwrap();
        assert_eq!(mapped["checkpoint_id"], json!("safety_abc"));
        assert_eq!(mapped["source_event"]["kind"], json!("checkpoint_save"));
        assert_eq!(mapped["source_event"]["message"], json!("boom"));
    }

    #[test]
    fn test_events_during_recovery_are_ignored() {
        let mut event = error_event(ErrorKind::SessionLoad, Map::new());
        event.during_recovery = true;
        assert!(AutoRecoveryMonitor::map_error_event(&event).is_none());
    }

    #[tokio::test]
    async fn test_health_check_on_empty_engine() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = monitor(&temp_dir).await;

        let actions = monitor.run_health_check().await;

        assert_eq!(
            actions,
            vec![RecoveryTrigger::EmergencyCheckpoint, RecoveryTrigger::SessionFailure]
        );
        let engine = monitor.engine();
        assert!(engine.store().count() > 0);
        let session = engine.sessions().active_session().unwrap();
        assert_eq!(session.metadata["recovered"], json!(true));
        assert_eq!(monitor.metrics().get_counter(metrics::HEALTH_CHECKS), Some(1));
        assert_eq!(monitor.metrics().get_counter(metrics::RECOVERIES), Some(1));
    }

    #[tokio::test]
    async fn test_health_check_skipped_while_recovering() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = monitor(&temp_dir).await;

        let _guard = monitor.engine().events().recovery_guard();
        assert!(monitor.run_health_check().await.is_empty());
        assert_eq!(monitor.engine().store().count(), 0);
        assert_eq!(monitor.metrics().get_counter(metrics::HEALTH_CHECKS), Some(0));
    }

    #[tokio::test]
    async fn test_health_check_without_auto_recovery() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.monitor.auto_recovery = false;
        let monitor = monitor_with(config, Arc::new(MemoryStateStore::new())).await;

        assert!(monitor.run_health_check().await.is_empty());
        assert_eq!(monitor.engine().store().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_operations_trigger_memory_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = monitor(&temp_dir).await;
        let sessions = monitor.engine().sessions().clone();

        sessions.start(json!({"task": "index"})).await.unwrap();
        let rejected = sessions
            .create_decision_checkpoint(DecisionData::default())
            .await;
        assert!(rejected.is_err());
        assert_eq!(monitor.engine().store().failed_operations().len(), 1);

        let actions = monitor.run_health_check().await;

        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], RecoveryTrigger::CorruptionDetected { .. }));
        assert!(monitor.engine().store().failed_operations().is_empty());
        let history = monitor.engine().recovery().history();
        assert_eq!(history.last().unwrap().failure_type, "memory_corruption");
    }

    #[tokio::test]
    async fn test_integrity_check_detects_invalid_drift_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut agents = BTreeMap::new();
        agents.insert("scout".to_string(), json!(5));
        let state = Arc::new(MemoryStateStore::with_snapshot(MemorySnapshot {
            agents,
            ..MemorySnapshot::default()
        }));
        let monitor = monitor_with(test_config(&temp_dir), state).await;

        assert!(monitor.run_integrity_check().await);
        assert!(!monitor.run_integrity_check().await);

        assert_eq!(
            monitor.metrics().get_counter(metrics::INTEGRITY_VIOLATIONS),
            Some(1)
        );
        let history = monitor.engine().recovery().history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].failure_type, "memory_corruption");
    }

    #[tokio::test]
    async fn test_integrity_check_accepts_valid_changes() {
        let temp_dir = TempDir::new().unwrap();
        let state = Arc::new(MemoryStateStore::new());
        let monitor = monitor_with(test_config(&temp_dir), state.clone()).await;

        assert!(!monitor.run_integrity_check().await);
        state.set_shared("phase", json!("indexing"));
        assert!(!monitor.run_integrity_check().await);
        assert!(monitor.engine().recovery().history().is_empty());
    }

    #[tokio::test]
    async fn test_backup_cycle_and_metrics() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = monitor(&temp_dir).await;
        monitor
            .engine()
            .state()
            .write_agent_memory("scout", &json!({"seen": 3}))
            .await
            .unwrap();
        monitor
            .engine()
            .sessions()
            .create_emergency_checkpoint("metrics")
            .await
            .unwrap();

        let report = monitor.run_backup_cycle().await;
        assert_eq!(report.agents, vec!["scout".to_string()]);
        assert!(report.coordination);
        assert_eq!(monitor.metrics().get_counter(metrics::BACKUPS), Some(1));

        monitor.collect_metrics();
        assert_eq!(monitor.metrics().get_gauge(metrics::CHECKPOINTS), Some(1));
        assert_eq!(monitor.metrics().get_gauge(metrics::ACTIVE_SESSION), Some(0));
    }

    #[tokio::test]
    async fn test_listener_recovers_from_error_event() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = Arc::new(monitor(&temp_dir).await);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handles = monitor.clone().start(shutdown_rx);

        let mut context = Map::new();
        context.insert("session_id".to_string(), json!("gone"));
        monitor
            .engine()
            .events()
            .error(ErrorKind::SessionLoad, "archive unreadable", context);

        let mut history = Vec::new();
        for _ in 0..100 {
            history = monitor.engine().recovery().history();
            if !history.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].failure_type, "session_failure");
        assert!(history[0].success);
        assert_eq!(history[0].context["session_id"], json!("gone"));

        shutdown_tx.send(()).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
