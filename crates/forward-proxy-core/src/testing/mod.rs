//! Test utilities for the forward producer.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`MockBroker`] - A lightweight mock broker speaking the remoting protocol
//! - [`ForwardTestHarness`] - A forward producer wired to a mock broker
//!
//! # Example
//!
//! ```rust,ignore
//! use forward_proxy_core::protocol::request_code;
//! use forward_proxy_core::testing::ForwardTestHarness;
//!
//! #[tokio::test]
//! async fn test_heartbeat() {
//!     let harness = ForwardTestHarness::new().await;
//!
//!     harness
//!         .producer
//!         .heartbeat(harness.broker_address(), &Default::default(), 3_000)
//!         .await
//!         .unwrap();
//!
//!     let calls = harness.get_broker_calls_for_code(request_code::HEART_BEAT).await;
//!     assert_eq!(calls.len(), 1);
//! }
//! ```

pub mod harness;
pub mod mock_broker;

pub use harness::ForwardTestHarness;
pub use mock_broker::{responses, BrokerCall, MockBroker, ResponseGenerator};
