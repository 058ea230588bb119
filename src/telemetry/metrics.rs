//! Metrics
//!
//! Metrics collection interfaces and implementations for the access layer.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Metric labels.
pub type MetricLabels = HashMap<String, String>;

/// Access-layer metrics interface.
pub trait SessionMetrics: Send + Sync {
    /// Record a completed `request` call.
    fn record_request(&self, endpoint: &str, outcome: &str, duration: Duration);

    /// Record one upstream token acquisition (login or webhook round trip).
    fn record_token_acquisition(&self, identity: &str, success: bool);

    /// Record a forced re-authentication after an invalidation signal.
    fn record_reauthentication(&self, endpoint: &str);

    /// Record a cache lookup.
    fn record_cache_lookup(&self, hit: bool);

    /// Record the circuit breaker state after a call.
    fn record_circuit_state(&self, state: &str);

    /// Record time spent waiting on the rate limiter.
    fn record_rate_limit_wait(&self, waited: Duration);
}

/// No-op metrics implementation.
pub struct NoOpMetrics;

impl SessionMetrics for NoOpMetrics {
    fn record_request(&self, _endpoint: &str, _outcome: &str, _duration: Duration) {}
    fn record_token_acquisition(&self, _identity: &str, _success: bool) {}
    fn record_reauthentication(&self, _endpoint: &str) {}
    fn record_cache_lookup(&self, _hit: bool) {}
    fn record_circuit_state(&self, _state: &str) {}
    fn record_rate_limit_wait(&self, _waited: Duration) {}
}

/// No-op metrics singleton.
pub fn no_op_metrics() -> NoOpMetrics {
    NoOpMetrics
}

/// Metric entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub labels: MetricLabels,
}

/// In-memory metrics for testing.
#[derive(Default)]
pub struct InMemoryMetrics {
    entries: Mutex<Vec<MetricEntry>>,
}

impl InMemoryMetrics {
    /// Create new in-memory metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded entries.
    pub fn get_entries(&self) -> Vec<MetricEntry> {
        self.lock().clone()
    }

    /// Get entries by name.
    pub fn get_entries_by_name(&self, name: &str) -> Vec<MetricEntry> {
        self.lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Count entries by name.
    pub fn count(&self, name: &str) -> usize {
        self.lock().iter().filter(|e| e.name == name).count()
    }

    /// Count entries by name whose label `key` equals `value`.
    pub fn count_with_label(&self, name: &str, key: &str, value: &str) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.name == name && e.labels.get(key).map(String::as_str) == Some(value))
            .count()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MetricEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        self.lock().push(MetricEntry {
            name: name.to_string(),
            value,
            labels,
        });
    }
}

impl SessionMetrics for InMemoryMetrics {
    fn record_request(&self, endpoint: &str, outcome: &str, duration: Duration) {
        self.record(
            "session_requests_total",
            duration.as_secs_f64() * 1000.0,
            &[("endpoint", endpoint), ("outcome", outcome)],
        );
    }

    fn record_token_acquisition(&self, identity: &str, success: bool) {
        self.record(
            "session_token_acquisitions_total",
            1.0,
            &[
                ("identity", identity),
                ("success", if success { "true" } else { "false" }),
            ],
        );
    }

    fn record_reauthentication(&self, endpoint: &str) {
        self.record(
            "session_reauthentications_total",
            1.0,
            &[("endpoint", endpoint)],
        );
    }

    fn record_cache_lookup(&self, hit: bool) {
        self.record(
            "session_cache_lookups_total",
            1.0,
            &[("result", if hit { "hit" } else { "miss" })],
        );
    }

    fn record_circuit_state(&self, state: &str) {
        self.record("session_circuit_state", 1.0, &[("state", state)]);
    }

    fn record_rate_limit_wait(&self, waited: Duration) {
        self.record(
            "session_rate_limit_wait_ms",
            waited.as_secs_f64() * 1000.0,
            &[],
        );
    }
}

/// Create in-memory metrics.
pub fn create_in_memory_metrics() -> InMemoryMetrics {
    InMemoryMetrics::new()
}
