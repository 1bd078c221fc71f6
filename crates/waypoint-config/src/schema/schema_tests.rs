use super::*;
use std::time::Duration;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.checkpoint.compression_threshold, 1024);
    assert!(config.checkpoint.compression_enabled);
    assert!(config.checkpoint.validation_enabled);
    assert_eq!(config.recovery.timeout_secs, 30);
    assert_eq!(config.monitor.health_check_interval_secs, 30);
    assert_eq!(config.monitor.backup_interval_secs, 300);
    assert_eq!(config.monitor.backup_retention, 5);
}

#[test]
fn test_storage_rooted_at() {
    let storage = StorageConfig::rooted_at("/var/lib/waypoint");
    assert_eq!(storage.checkpoint_dir, PathBuf::from("/var/lib/waypoint/checkpoints"));
    assert_eq!(storage.memory_dir, PathBuf::from("/var/lib/waypoint/memory"));
    assert_eq!(storage.coordination_dir, PathBuf::from("/var/lib/waypoint/coordination"));
    assert_eq!(storage.recovery_log, PathBuf::from("/var/lib/waypoint/logs/recovery.log"));
}

#[test]
fn test_default_hook_types() {
    let checkpoint = CheckpointConfig::default();
    assert!(checkpoint.hook_types.contains(&"session_end".to_string()));
    assert!(checkpoint.hook_command.is_none());
}

#[test]
fn test_durations() {
    let config = Config::default();
    assert_eq!(config.recovery.timeout(), Duration::from_secs(30));
    assert_eq!(config.monitor.backup_interval(), Duration::from_secs(300));
    assert_eq!(config.checkpoint.retention(), Duration::from_secs(30 * 86_400));
}

#[test]
fn test_logging_default() {
    let logging = LoggingConfig::default();
    assert_eq!(logging.level, "info");
    assert!(!logging.json);
    assert!(logging.directory.is_none());
}

#[test]
fn test_config_serialization() {
    let config = Config::default();
    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("compression_threshold"));
    assert!(json.contains("1024"));
}
