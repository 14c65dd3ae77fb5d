//! Prometheus metrics for the forward producer.
//!
//! Provides counters, histograms, and gauges for monitoring forwarded
//! broker requests and the client pool.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Forward producer metrics collection.
pub struct ForwardMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Total forwarded requests by operation.
    pub requests_total: IntCounterVec,

    /// Failed requests by operation and error type.
    pub errors_total: IntCounterVec,

    /// Request latency histogram by operation.
    pub request_duration_seconds: HistogramVec,

    /// Transaction id tokens handed out after prepared sends.
    pub transaction_ids_issued: IntCounter,

    /// Pooled clients created so far.
    pub pool_clients: IntGauge,
}

impl ForwardMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "forward_producer_requests_total",
                "Total number of forwarded requests by operation",
            ),
            &["operation"],
        )
        .expect("metric creation should succeed");

        let errors_total = IntCounterVec::new(
            Opts::new(
                "forward_producer_errors_total",
                "Total number of failed requests by operation and error type",
            ),
            &["operation", "error_type"],
        )
        .expect("metric creation should succeed");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "forward_producer_request_duration_seconds",
                "Forwarded request latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 3.0,
            ]),
            &["operation"],
        )
        .expect("metric creation should succeed");

        let transaction_ids_issued = IntCounter::new(
            "forward_producer_transaction_ids_issued_total",
            "Total number of transaction ids issued for prepared sends",
        )
        .expect("metric creation should succeed");

        let pool_clients = IntGauge::new(
            "forward_producer_pool_clients",
            "Number of pooled forward clients created",
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(transaction_ids_issued.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(pool_clients.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            requests_total,
            errors_total,
            request_duration_seconds,
            transaction_ids_issued,
            pool_clients,
        }
    }

    /// Record a request being forwarded.
    pub fn record_request(&self, operation: &str) {
        self.requests_total.with_label_values(&[operation]).inc();
    }

    /// Record a failed request.
    pub fn record_error(&self, operation: &str, error_type: &str) {
        self.errors_total
            .with_label_values(&[operation, error_type])
            .inc();
    }

    /// Record request duration.
    pub fn record_duration(&self, operation: &str, duration_seconds: f64) {
        self.request_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    /// Record a transaction id handed to a caller.
    pub fn record_transaction_id_issued(&self) {
        self.transaction_ids_issued.inc();
    }

    /// Set the number of pooled clients created.
    pub fn set_pool_clients(&self, count: usize) {
        self.pool_clients
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for ForwardMetrics {
    fn default() -> Self {
        Self::new()
    }
}
