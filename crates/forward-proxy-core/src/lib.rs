//! Forward Producer Proxy Core Library
//!
//! This library provides the transactional forwarding layer of a broker
//! proxy. Produce, heartbeat, end-transaction, and send-back requests are
//! spread over a fixed pool of broker clients, and transaction ids are
//! translated between the broker's coordinates and an opaque token handed
//! to proxy clients.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`protocol`] - Remoting commands, frame codec, and request headers
//! - [`transaction`] - Transaction id token codec
//! - [`broker`] - Broker channels, remoting clients, and the client pool
//! - [`producer`] - The forward producer operations
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use forward_proxy_core::{ForwardProducer, ProxyConfig};
//!
//! let config = ProxyConfig::from_file("config.yaml")?;
//! let producer = ForwardProducer::new(&config, None)?;
//!
//! let result = producer
//!     .send_message("10.0.0.1:10911", "broker-a", &message, &header, 3_000)
//!     .await?;
//! ```

#![forbid(unsafe_code)]

pub mod broker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod producer;
pub mod protocol;
pub mod transaction;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use broker::{ConnectionPool, ForwardClient, RemotingClient};
pub use config::ProxyConfig;
pub use error::{ConfigError, ProxyError, Result, TransactionIdError};
pub use metrics::ForwardMetrics;
pub use producer::ForwardProducer;
pub use transaction::TransactionId;
