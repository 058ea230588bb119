//! Telemetry
//!
//! Observability components for the access layer.
//!
//! This module provides:
//!
//! - **Metrics**: Request, token, cache and breaker counters
//! - **Logging**: `tracing` subscriber setup

pub mod logging;
pub mod metrics;

// Metrics
pub use metrics::{
    create_in_memory_metrics, no_op_metrics, InMemoryMetrics, MetricEntry, MetricLabels,
    NoOpMetrics, SessionMetrics,
};

// Logging
pub use logging::{LogFormat, LogLevel, LoggingConfig};
