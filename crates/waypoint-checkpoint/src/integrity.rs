//! Deterministic snapshot hashing and drift detection.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::snapshot::MemorySnapshot;

/// Rebuild a value with object keys sorted at every level.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with sorted keys.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// SHA-256 of the canonical JSON form, lowercase hex.
pub fn hash_value(value: &Value) -> String {
    let digest = Sha256::digest(canonical_json(value).as_bytes());
    hex::encode(digest)
}

/// Integrity hash of a memory snapshot.
pub fn hash_snapshot(snapshot: &MemorySnapshot) -> String {
    hash_value(&snapshot.to_value())
}

/// Process-lifetime cache of the last digest seen per key.
#[derive(Default)]
pub struct IntegrityCache {
    entries: Mutex<HashMap<String, String>>,
}

impl IntegrityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `digest` for `key`, returning whether it differs from the cached one.
    ///
    /// A key seen for the first time counts as changed.
    pub fn update(&self, key: &str, digest: String) -> bool {
        let mut entries = self.entries.lock();
        let changed = entries.get(key) != Some(&digest);
        entries.insert(key.to_string(), digest);
        changed
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn test_hash_nested_key_order() {
        let a = json!({"outer": {"x": [ {"k": 1, "j": 2} ], "y": null}});
        let b = json!({"outer": {"y": null, "x": [ {"j": 2, "k": 1} ]}});
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn test_hash_detects_change() {
        assert_ne!(hash_value(&json!({"a": 1})), hash_value(&json!({"a": 2})));
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        let digest = hash_value(&json!({}));
        assert_eq!(digest.len(), 64);
        // sha256("{}")
        assert_eq!(
            digest,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_canonical_json_sorted() {
        let value = json!({"b": 1, "a": {"d": 1, "c": 2}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":2,"d":1},"b":1}"#);
    }

    #[test]
    fn test_snapshot_hash_deterministic() {
        let mut a = MemorySnapshot::default();
        a.global.insert("mode".to_string(), json!("active"));
        a.agents.insert("planner".to_string(), json!({"goal": "ship", "step": 3}));
        let b = a.clone();
        assert_eq!(hash_snapshot(&a), hash_snapshot(&b));
    }

    #[test]
    fn test_integrity_cache_update() {
        let cache = IntegrityCache::new();
        assert!(cache.update("live", "abc".to_string()));
        assert!(!cache.update("live", "abc".to_string()));
        assert!(cache.update("live", "def".to_string()));
        assert_eq!(cache.get("live").as_deref(), Some("def"));

        cache.clear();
        assert!(cache.get("live").is_none());
    }
}
