//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Checkpoint type names accepted in `checkpoint.hook_types`.
const CHECKPOINT_TYPES: [&str; 9] = [
    "session_start",
    "session_boundary",
    "session_end",
    "decision_point",
    "pre_operation",
    "milestone",
    "rollback",
    "safety",
    "recovery",
];

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_storage(config, &mut result);
        Self::validate_checkpoint(config, &mut result);
        Self::validate_recovery(config, &mut result);
        Self::validate_monitor(config, &mut result);

        Ok(result)
    }

    fn validate_storage(config: &Config, result: &mut ValidationResult) {
        let storage = &config.storage;
        for (path, value) in [
            ("storage.checkpoint_dir", &storage.checkpoint_dir),
            ("storage.memory_dir", &storage.memory_dir),
            ("storage.coordination_dir", &storage.coordination_dir),
            ("storage.recovery_log", &storage.recovery_log),
        ] {
            if value.as_os_str().is_empty() {
                result.add_error(ValidationError::new(path, "Path cannot be empty"));
            }
        }

        if storage.recovery_log.starts_with(&storage.checkpoint_dir) {
            result.add_warning(ValidationWarning::new(
                "storage.recovery_log",
                "Recovery log lives inside the checkpoint directory and will be scanned on load",
            ));
        }
    }

    fn validate_checkpoint(config: &Config, result: &mut ValidationResult) {
        let checkpoint = &config.checkpoint;

        if checkpoint.max_checkpoints == 0 {
            result.add_error(ValidationError::new(
                "checkpoint.max_checkpoints",
                "max_checkpoints must be greater than 0",
            ));
        }

        if checkpoint.retention_days == 0 {
            result.add_error(ValidationError::new(
                "checkpoint.retention_days",
                "retention_days must be greater than 0",
            ));
        }

        if checkpoint.compression_enabled && checkpoint.compression_threshold == 0 {
            result.add_warning(ValidationWarning::new(
                "checkpoint.compression_threshold",
                "compression_threshold is 0, every checkpoint will be compressed",
            ));
        }

        if !checkpoint.validation_enabled {
            result.add_warning(ValidationWarning::new(
                "checkpoint.validation_enabled",
                "Validation is disabled, malformed checkpoints will be persisted",
            ));
        }

        for name in &checkpoint.hook_types {
            if !CHECKPOINT_TYPES.contains(&name.as_str()) {
                result.add_error(ValidationError::new(
                    "checkpoint.hook_types",
                    format!("Unknown checkpoint type '{}', valid values: {:?}", name, CHECKPOINT_TYPES),
                ));
            }
        }
    }

    fn validate_recovery(config: &Config, result: &mut ValidationResult) {
        if config.recovery.timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "recovery.timeout_secs",
                "timeout_secs must be greater than 0",
            ));
        }

        if config.recovery.timeout_secs > 600 {
            result.add_warning(ValidationWarning::new(
                "recovery.timeout_secs",
                "timeout_secs is very high (>600), a stuck strategy will block recovery for a long time",
            ));
        }
    }

    fn validate_monitor(config: &Config, result: &mut ValidationResult) {
        let monitor = &config.monitor;
        for (path, value) in [
            ("monitor.health_check_interval_secs", monitor.health_check_interval_secs),
            ("monitor.backup_interval_secs", monitor.backup_interval_secs),
            ("monitor.metrics_interval_secs", monitor.metrics_interval_secs),
        ] {
            if value == 0 {
                result.add_error(ValidationError::new(path, "Interval must be greater than 0"));
            }
        }

        if monitor.backup_retention == 0 {
            result.add_error(ValidationError::new(
                "monitor.backup_retention",
                "backup_retention must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
