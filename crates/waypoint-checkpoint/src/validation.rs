//! Structural checkpoint validation.
//!
//! Every checkpoint must pass the baseline check. Rules registered for its
//! type are applied afterwards; new rules can be added without touching the
//! dispatch in [`Validator::check`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use crate::checkpoint::{Checkpoint, CheckpointType};
use crate::error::CheckpointError;

/// A type-specific validation rule.
pub type TypeRule = Arc<dyn Fn(&Checkpoint) -> Result<(), String> + Send + Sync>;

/// Checkpoint validator with a per-type rule table.
pub struct Validator {
    rules: RwLock<HashMap<CheckpointType, Vec<TypeRule>>>,
}

impl Validator {
    /// Create a validator with the built-in rules.
    pub fn new() -> Self {
        let validator = Self::baseline_only();

        validator.register(CheckpointType::DecisionPoint, |cp| {
            match cp.payload.pointer("/decision/selected") {
                Some(Value::Null) | None => Err("decision.selected is required".to_string()),
                Some(_) => Ok(()),
            }
        });
        validator.register(CheckpointType::PreOperation, |cp| {
            match cp.payload.pointer("/operation/name").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => Ok(()),
                _ => Err("operation.name is required".to_string()),
            }
        });
        validator.register(CheckpointType::SessionStart, require_session);
        validator.register(CheckpointType::SessionEnd, require_session);
        validator.register(CheckpointType::Rollback, |cp| {
            match cp.payload.get("target_checkpoint").and_then(Value::as_str) {
                Some(_) => Ok(()),
                None => Err("target_checkpoint is required".to_string()),
            }
        });
        validator.register(CheckpointType::Milestone, |cp| {
            match cp.payload.get("milestone") {
                Some(Value::Null) | None => Err("milestone is required".to_string()),
                Some(_) => Ok(()),
            }
        });

        validator
    }

    /// Create a validator that only applies the baseline check.
    pub fn baseline_only() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Register an additional rule for a checkpoint type.
    pub fn register<F>(&self, checkpoint_type: CheckpointType, rule: F)
    where
        F: Fn(&Checkpoint) -> Result<(), String> + Send + Sync + 'static,
    {
        self.rules
            .write()
            .entry(checkpoint_type)
            .or_default()
            .push(Arc::new(rule));
    }

    /// Run the baseline and type-specific checks, returning the first failure.
    pub fn check(&self, checkpoint: &Checkpoint) -> Result<(), String> {
        check_baseline(checkpoint, Utc::now().timestamp_millis())?;

        let rules = self.rules.read();
        if let Some(rules) = rules.get(&checkpoint.checkpoint_type) {
            for rule in rules {
                rule(checkpoint)?;
            }
        }
        Ok(())
    }

    /// Like [`Validator::check`], mapped into a [`CheckpointError::Validation`].
    pub fn validate(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.check(checkpoint).map_err(|reason| CheckpointError::Validation {
            id: checkpoint.id.clone(),
            reason,
        })
    }

    pub fn is_valid(&self, checkpoint: &Checkpoint) -> bool {
        self.check(checkpoint).is_ok()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_baseline(checkpoint: &Checkpoint, now_ms: i64) -> Result<(), String> {
    if checkpoint.id.is_empty() {
        return Err("id is required".to_string());
    }
    if !checkpoint.id.starts_with(checkpoint.checkpoint_type.as_str()) {
        return Err(format!(
            "id '{}' does not match type '{}'",
            checkpoint.id, checkpoint.checkpoint_type
        ));
    }
    if checkpoint.timestamp <= 0 {
        return Err("timestamp must be positive".to_string());
    }
    if checkpoint.timestamp > now_ms {
        return Err(format!(
            "timestamp {} is in the future (now {})",
            checkpoint.timestamp, now_ms
        ));
    }
    Ok(())
}

fn require_session(checkpoint: &Checkpoint) -> Result<(), String> {
    match checkpoint.session_id.as_deref() {
        Some(id) if !id.is_empty() => Ok(()),
        _ => Err("session_id is required".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decision(selected: Value) -> Checkpoint {
        Checkpoint::new(
            CheckpointType::DecisionPoint,
            json!({"decision": {"context": "route", "selected": selected}}),
        )
    }

    #[test]
    fn test_baseline_valid() {
        let validator = Validator::new();
        let cp = Checkpoint::new(CheckpointType::Safety, json!({}));
        assert!(validator.is_valid(&cp));
    }

    #[test]
    fn test_empty_id_rejected() {
        let validator = Validator::new();
        let mut cp = Checkpoint::new(CheckpointType::Safety, json!({}));
        cp.id.clear();
        assert!(!validator.is_valid(&cp));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let validator = Validator::new();
        let mut cp = Checkpoint::new(CheckpointType::Safety, json!({}));
        cp.timestamp = Utc::now().timestamp_millis() + 60_000;
        let err = validator.check(&cp).unwrap_err();
        assert!(err.contains("future"));
    }

    #[test]
    fn test_decision_requires_selected() {
        let validator = Validator::new();
        assert!(validator.is_valid(&decision(json!("option_b"))));
        assert!(!validator.is_valid(&decision(Value::Null)));

        let missing = Checkpoint::new(CheckpointType::DecisionPoint, json!({"decision": {}}));
        assert!(!validator.is_valid(&missing));
    }

    #[test]
    fn test_operation_requires_name() {
        let validator = Validator::new();
        let ok = Checkpoint::new(
            CheckpointType::PreOperation,
            json!({"operation": {"name": "migrate"}}),
        );
        let bad = Checkpoint::new(CheckpointType::PreOperation, json!({"operation": {}}));
        assert!(validator.is_valid(&ok));
        assert!(!validator.is_valid(&bad));
    }

    #[test]
    fn test_session_types_require_session() {
        let validator = Validator::new();
        let cp = Checkpoint::new(CheckpointType::SessionStart, json!({}));
        assert!(!validator.is_valid(&cp));
        assert!(validator.is_valid(&cp.with_session("session_1")));
    }

    #[test]
    fn test_validate_maps_error() {
        let validator = Validator::new();
        let err = validator.validate(&decision(Value::Null)).unwrap_err();
        assert!(matches!(err, CheckpointError::Validation { .. }));
    }

    #[test]
    fn test_custom_rule() {
        let validator = Validator::new();
        validator.register(CheckpointType::Safety, |cp| {
            if cp.payload.get("reason").is_some() {
                Ok(())
            } else {
                Err("reason is required".to_string())
            }
        });

        assert!(!validator.is_valid(&Checkpoint::new(CheckpointType::Safety, json!({}))));
        assert!(validator.is_valid(&Checkpoint::new(
            CheckpointType::Safety,
            json!({"reason": "manual"})
        )));
    }

    #[test]
    fn test_baseline_only_skips_type_rules() {
        let validator = Validator::baseline_only();
        assert!(validator.is_valid(&decision(Value::Null)));
    }
}
