//! Test harness for integration testing of the forward producer.
//!
//! Provides a complete test environment with:
//! - Mock broker
//! - Forward producer backed by remoting clients
//! - Helpers for inspecting the calls the broker received

use std::sync::Arc;
use std::time::Duration;

use crate::config::{BrokerConfig, ForwardConfig, ProxyConfig};
use crate::metrics::ForwardMetrics;
use crate::producer::ForwardProducer;

use super::mock_broker::{BrokerCall, MockBroker, ResponseGenerator};

/// Test harness for integration testing.
pub struct ForwardTestHarness {
    /// The mock broker
    mock_broker: MockBroker,
    /// The mock broker address
    mock_broker_addr: String,
    /// The producer under test
    pub producer: Arc<ForwardProducer>,
    /// Metrics recorded by the producer
    pub metrics: Arc<ForwardMetrics>,
    /// Test configuration
    pub config: Arc<ProxyConfig>,
}

impl ForwardTestHarness {
    /// Create a new test harness with a pool of two clients.
    pub async fn new() -> Self {
        Self::with_pool_size(2).await
    }

    /// Create a new test harness with `producer_num` pooled clients.
    ///
    /// # Panics
    ///
    /// Panics if the mock broker cannot bind a local port.
    pub async fn with_pool_size(producer_num: usize) -> Self {
        let mut mock_broker = MockBroker::new("127.0.0.1:0");
        let mock_broker_addr = mock_broker
            .start()
            .await
            .expect("Failed to start mock broker");

        let config = ProxyConfig {
            forward: ForwardConfig {
                producer_num,
                ..ForwardConfig::default()
            },
            broker: BrokerConfig {
                connection_timeout_ms: 1_000,
                ..BrokerConfig::default()
            },
            metrics: Default::default(),
            logging: Default::default(),
        };
        let config = Arc::new(config);

        let metrics = Arc::new(ForwardMetrics::new());
        let producer = Arc::new(
            ForwardProducer::new(&config, Some(Arc::clone(&metrics)))
                .expect("harness config is valid"),
        );

        Self {
            mock_broker,
            mock_broker_addr,
            producer,
            metrics,
            config,
        }
    }

    /// Get the mock broker address.
    #[must_use]
    pub fn broker_address(&self) -> &str {
        &self.mock_broker_addr
    }

    /// Register a custom response handler for a request code.
    pub async fn register_handler(&self, code: i32, handler: ResponseGenerator) {
        self.mock_broker.register_handler(code, handler).await;
    }

    /// Get all recorded broker calls.
    pub async fn get_broker_calls(&self) -> Vec<BrokerCall> {
        self.mock_broker.get_calls().await
    }

    /// Get broker calls filtered by request code.
    pub async fn get_broker_calls_for_code(&self, code: i32) -> Vec<BrokerCall> {
        self.mock_broker.get_calls_for_code(code).await
    }

    /// Wait for `count` calls with `code` to reach the broker.
    pub async fn wait_for_broker_calls(&self, code: i32, count: usize) -> Vec<BrokerCall> {
        self.mock_broker
            .wait_for_calls(code, count, Duration::from_secs(5))
            .await
    }

    /// Clear all recorded broker calls.
    pub async fn clear_broker_calls(&self) {
        self.mock_broker.clear_calls().await;
    }

    /// Get the last broker call.
    pub async fn last_broker_call(&self) -> Option<BrokerCall> {
        self.mock_broker.get_calls().await.pop()
    }

    /// Shutdown the test harness.
    pub async fn shutdown(&mut self) {
        self.producer.shutdown().await;
        self.mock_broker.stop().await;
    }
}
