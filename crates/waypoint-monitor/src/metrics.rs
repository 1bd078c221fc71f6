//! Prometheus-style metrics registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

pub const CHECKPOINTS: &str = "waypoint_checkpoints";
pub const CHECKPOINTS_COMPRESSED: &str = "waypoint_checkpoints_compressed";
pub const FAILED_OPERATIONS: &str = "waypoint_failed_operations";
pub const ACTIVE_SESSION: &str = "waypoint_active_session";
pub const HEALTH_CHECKS: &str = "waypoint_health_checks_total";
pub const INTEGRITY_VIOLATIONS: &str = "waypoint_integrity_violations_total";
pub const RECOVERIES: &str = "waypoint_recoveries_total";
pub const RECOVERIES_FAILED: &str = "waypoint_recoveries_failed_total";
pub const BACKUPS: &str = "waypoint_backups_total";

/// Metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// Monotonically increasing.
    Counter,
    /// Can go up and down.
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

struct Metric {
    metric_type: MetricType,
    help: String,
    value: Arc<AtomicU64>,
}

/// Metrics registry.
///
/// Updates on unregistered names are ignored. Export is sorted by name.
pub struct MetricsRegistry {
    metrics: RwLock<BTreeMap<String, Metric>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry with every engine metric registered.
    pub fn for_engine() -> Self {
        let registry = Self::new();
        registry.register_gauge(CHECKPOINTS, "Checkpoints currently indexed");
        registry.register_gauge(CHECKPOINTS_COMPRESSED, "Indexed checkpoints stored compressed");
        registry.register_gauge(FAILED_OPERATIONS, "Recorded failed store operations");
        registry.register_gauge(ACTIVE_SESSION, "Whether a session is active");
        registry.register_counter(HEALTH_CHECKS, "Health checks performed");
        registry.register_counter(INTEGRITY_VIOLATIONS, "Integrity checks that found invalid memory");
        registry.register_counter(RECOVERIES, "Recoveries dispatched by the monitor");
        registry.register_counter(RECOVERIES_FAILED, "Dispatched recoveries that failed");
        registry.register_counter(BACKUPS, "Backup cycles completed");
        registry
    }

    pub fn register_counter(&self, name: impl Into<String>, help: impl Into<String>) {
        self.register(name.into(), MetricType::Counter, help.into());
    }

    pub fn register_gauge(&self, name: impl Into<String>, help: impl Into<String>) {
        self.register(name.into(), MetricType::Gauge, help.into());
    }

    fn register(&self, name: String, metric_type: MetricType, help: String) {
        self.metrics.write().insert(
            name,
            Metric {
                metric_type,
                help,
                value: Arc::new(AtomicU64::new(0)),
            },
        );
    }

    pub fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1);
    }

    pub fn add_counter(&self, name: &str, value: u64) {
        if let Some(metric) = self.metric(name, MetricType::Counter) {
            metric.fetch_add(value, Ordering::SeqCst);
        }
    }

    pub fn set_gauge(&self, name: &str, value: u64) {
        if let Some(metric) = self.metric(name, MetricType::Gauge) {
            metric.store(value, Ordering::SeqCst);
        }
    }

    pub fn get_counter(&self, name: &str) -> Option<u64> {
        self.metric(name, MetricType::Counter)
            .map(|c| c.load(Ordering::SeqCst))
    }

    pub fn get_gauge(&self, name: &str) -> Option<u64> {
        self.metric(name, MetricType::Gauge)
            .map(|g| g.load(Ordering::SeqCst))
    }

    fn metric(&self, name: &str, metric_type: MetricType) -> Option<Arc<AtomicU64>> {
        self.metrics
            .read()
            .get(name)
            .filter(|m| m.metric_type == metric_type)
            .map(|m| m.value.clone())
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let metrics = self.metrics.read();
        let mut output = String::new();

        for (name, metric) in metrics.iter() {
            output.push_str(&format!("# HELP {} {}\n", name, metric.help));
            output.push_str(&format!("# TYPE {} {}\n", name, metric.metric_type.as_str()));
            output.push_str(&format!("{} {}\n", name, metric.value.load(Ordering::SeqCst)));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
