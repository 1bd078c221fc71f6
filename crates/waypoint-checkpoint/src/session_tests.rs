
    use super::*;
    use crate::state::MemoryStateStore;
    use crate::validation::Validator;
    use tempfile::TempDir;
    use waypoint_config::CheckpointConfig;

    struct Fixture {
        _temp_dir: TempDir,
        state: Arc<MemoryStateStore>,
        events: EventBus,
        sessions: SessionManager,
    }

    async fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let events = EventBus::new();
        let store = FileCheckpointStore::open(
            temp_dir.path().join("checkpoints"),
            CheckpointConfig::default(),
            Arc::new(Validator::new()),
            events.clone(),
        )
        .await
        .unwrap();
        let state = Arc::new(MemoryStateStore::new());
        let sessions = SessionManager::new(
            Arc::new(store),
            state.clone(),
            events.clone(),
            temp_dir.path().join("memory"),
        );
        Fixture {
            _temp_dir: temp_dir,
            state,
            events,
            sessions,
        }
    }

    #[tokio::test]
    async fn test_start_writes_session_start() {
        let f = fixture().await;
        let session_id = f.sessions.start(json!({"task": "deploy"})).await.unwrap();

        let active = f.sessions.active_session().unwrap();
        assert_eq!(active.id, session_id);
        assert_eq!(active.checkpoint_count, 1);
        assert!(!active.restored);

        let starts = f
            .sessions
            .store()
            .list(&CheckpointFilter::of_type(CheckpointType::SessionStart));
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].session_id.as_deref(), Some(session_id.as_str()));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let f = fixture().await;
        f.sessions.start(Value::Null).await.unwrap();
        let err = f.sessions.start(Value::Null).await.unwrap_err();
        assert!(matches!(err, CheckpointError::SessionActive(_)));
    }

    #[tokio::test]
    async fn test_session_scenario_counts_and_archive() {
        let f = fixture().await;
        let session_id = f.sessions.start(json!({})).await.unwrap();
        f.sessions
            .create_operation_checkpoint(OperationData::new("migrate"))
            .await
            .unwrap();
        f.sessions
            .create_operation_checkpoint(OperationData::new("reindex"))
            .await
            .unwrap();

        let before_end = f.sessions.active_session().unwrap();
        assert_eq!(before_end.checkpoint_count, 3);

        assert_eq!(f.sessions.end().await.unwrap(), session_id);
        assert!(f.sessions.active_session().is_none());

        let bundles = f.sessions.session_bundles(&session_id).await;
        assert!(!bundles.is_empty());
        let archive = &bundles[0];
        assert_eq!(archive.session.checkpoint_count, 3);
        assert_eq!(archive.checkpoints.len(), 3);
        assert_eq!(archive.checkpoints[0].checkpoint_type, CheckpointType::SessionStart);
        assert!(archive.end_checkpoint.is_some());

        let archived_files: Vec<_> = std::fs::read_dir(f.sessions.store().archive_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(archived_files.len(), 1);
    }

    #[tokio::test]
    async fn test_end_without_session() {
        let f = fixture().await;
        assert!(matches!(
            f.sessions.end().await.unwrap_err(),
            CheckpointError::NoActiveSession
        ));
    }

    #[tokio::test]
    async fn test_decision_points_tracked() {
        let f = fixture().await;
        f.sessions.start(json!({})).await.unwrap();

        let id = f
            .sessions
            .create_decision_checkpoint(DecisionData {
                context: "route".to_string(),
                options: vec![json!("a"), json!("b")],
                selected: json!("b"),
                ..DecisionData::default()
            })
            .await
            .unwrap();

        let session = f.sessions.active_session().unwrap();
        assert_eq!(session.decision_points, vec![id]);
        assert_eq!(session.checkpoint_count, 2);
    }

    #[tokio::test]
    async fn test_decision_without_selection_rejected() {
        let f = fixture().await;
        let err = f
            .sessions
            .create_decision_checkpoint(DecisionData {
                context: "route".to_string(),
                ..DecisionData::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_milestone_wraps_plain_data() {
        let f = fixture().await;
        let id = f
            .sessions
            .create_session_checkpoint(CheckpointType::Milestone, json!("v1 shipped"))
            .await
            .unwrap();
        let cp = f.sessions.store().load(&id).await.unwrap().unwrap();
        assert_eq!(cp.payload["milestone"], "v1 shipped");
    }

    #[tokio::test]
    async fn test_non_session_type_rejected() {
        let f = fixture().await;
        let err = f
            .sessions
            .create_session_checkpoint(CheckpointType::Safety, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_restore_from_checkpoint() {
        let f = fixture().await;
        f.state.set_shared("phase", json!(1));
        let id = f.sessions.create_emergency_checkpoint("before change").await.unwrap();

        f.state.set_shared("phase", json!(2));
        let restored = f.sessions.restore_from_checkpoint(&id).await.unwrap();
        assert_eq!(restored.id, id);
        assert_eq!(f.state.snapshot().shared["phase"], json!(1));
        assert!(!f.sessions.is_recovery_mode());
    }

    #[tokio::test]
    async fn test_restore_missing_emits_error() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();

        let err = f.sessions.restore_from_checkpoint("safety_missing_x").await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
        assert!(!f.sessions.is_recovery_mode());

        match rx.recv().await.unwrap() {
            EngineEvent::Error(event) => {
                assert_eq!(event.kind, ErrorKind::CheckpointRestore);
                assert_eq!(event.context["checkpoint_id"], "safety_missing_x");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restore_session_start_reconstructs_session() {
        let f = fixture().await;
        let session_id = f.sessions.start(json!({"task": "t"})).await.unwrap();
        let start_id = f
            .sessions
            .store()
            .list(&CheckpointFilter::of_type(CheckpointType::SessionStart))[0]
            .id
            .clone();
        f.sessions.abandon_active();

        f.sessions.restore_from_checkpoint(&start_id).await.unwrap();
        let session = f.sessions.active_session().unwrap();
        assert_eq!(session.id, session_id);
        assert!(session.restored);
        assert_eq!(session.metadata["task"], "t");
    }

    #[tokio::test]
    async fn test_rollback_writes_safety_first() {
        let f = fixture().await;
        f.state.set_global("version", json!(1));
        f.state.set_shared("phase", json!("plan"));
        let target = f.sessions.create_emergency_checkpoint("baseline").await.unwrap();
        f.state.set_global("version", json!(2));
        f.state.set_shared("scratch", json!([1, 2]));

        let outcome = f.sessions.rollback_to_point(&target).await.unwrap();
        assert_eq!(outcome.target_checkpoint, target);
        assert_eq!(f.state.snapshot().global["version"], json!(1));

        let target_state = f.sessions.store().load(&target).await.unwrap().unwrap().memory_state;
        assert_eq!(f.state.snapshot(), target_state);
        assert!(!f.state.snapshot().shared.contains_key("scratch"));

        let safety = f.sessions.store().load(&outcome.safety_checkpoint).await.unwrap().unwrap();
        assert_eq!(safety.checkpoint_type, CheckpointType::Safety);
        assert_eq!(safety.memory_state.global["version"], json!(2));

        let rollback = f.sessions.store().load(&outcome.rollback_checkpoint).await.unwrap().unwrap();
        assert_eq!(rollback.payload["target_checkpoint"], target.as_str());
        assert_eq!(rollback.payload["safety_checkpoint"], outcome.safety_checkpoint.as_str());
    }

    #[tokio::test]
    async fn test_rollback_to_missing_keeps_safety() {
        let f = fixture().await;
        let err = f.sessions.rollback_to_point("safety_gone_x").await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));

        let safeties = f
            .sessions
            .store()
            .list(&CheckpointFilter::of_type(CheckpointType::Safety));
        assert_eq!(safeties.len(), 1);
        assert!(f
            .sessions
            .store()
            .list(&CheckpointFilter::of_type(CheckpointType::Rollback))
            .is_empty());
    }

    #[tokio::test]
    async fn test_load_persisted_session() {
        let f = fixture().await;
        f.state.set_shared("progress", json!(40));
        let session_id = f.sessions.start(json!({})).await.unwrap();
        f.sessions.end().await.unwrap();

        f.state.set_shared("progress", json!(0));
        let session = f.sessions.load_persisted_session(&session_id).await.unwrap();
        assert!(session.restored);
        assert_eq!(f.sessions.active_session().unwrap().id, session_id);
        assert_eq!(f.state.snapshot().shared["progress"], json!(40));
    }

    #[tokio::test]
    async fn test_load_unknown_session_emits_error() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();

        let err = f.sessions.load_persisted_session("session_nope").await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));

        match rx.recv().await.unwrap() {
            EngineEvent::Error(event) => assert_eq!(event.kind, ErrorKind::SessionLoad),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_health_report_warnings() {
        let f = fixture().await;
        let report = f.sessions.health_report();
        assert!(report.warnings.contains(&"no active session".to_string()));
        assert!(report.warnings.contains(&"no active checkpoints".to_string()));

        f.sessions.start(json!({})).await.unwrap();
        assert!(f.sessions.health_report().is_healthy());
    }
