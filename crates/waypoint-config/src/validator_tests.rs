    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_validate_zero_max_checkpoints() {
        let mut config = Config::default();
        config.checkpoint.max_checkpoints = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "checkpoint.max_checkpoints"));
    }

    #[test]
    fn test_validate_zero_retention() {
        let mut config = Config::default();
        config.checkpoint.retention_days = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "checkpoint.retention_days"));
    }

    #[test]
    fn test_validate_unknown_hook_type() {
        let mut config = Config::default();
        config.checkpoint.hook_types.push("nightly".to_string());

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("nightly")));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.recovery.timeout_secs = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "recovery.timeout_secs"));
    }

    #[test]
    fn test_validate_high_timeout_warning() {
        let mut config = Config::default();
        config.recovery.timeout_secs = 3600;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "recovery.timeout_secs"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default();
        config.monitor.backup_interval_secs = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "monitor.backup_interval_secs"));
    }

    #[test]
    fn test_validate_zero_backup_retention() {
        let mut config = Config::default();
        config.monitor.backup_retention = 0;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "monitor.backup_retention"));
    }

    #[test]
    fn test_validate_empty_storage_path() {
        let mut config = Config::default();
        config.storage.memory_dir = PathBuf::new();

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.path == "storage.memory_dir"));
    }

    #[test]
    fn test_validation_disabled_warning() {
        let mut config = Config::default();
        config.checkpoint.validation_enabled = false;

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "checkpoint.validation_enabled"));
    }

    #[test]
    fn test_recovery_log_inside_checkpoint_dir_warning() {
        let mut config = Config::default();
        config.storage.recovery_log = config.storage.checkpoint_dir.join("recovery.log");

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.warnings.iter().any(|w| w.path == "storage.recovery_log"));
    }
