//! Metrics collection for the forward producer.
//!
//! Provides Prometheus-compatible metrics for request rates, failures,
//! latency, and pool usage.

pub mod prometheus;

pub use prometheus::ForwardMetrics;
