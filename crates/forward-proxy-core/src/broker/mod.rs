//! Broker connection management.
//!
//! This module provides:
//! - Single broker channels with request/response correlation
//! - Pooled remoting clients with bounded in-flight requests
//! - A fixed-size round-robin client pool
//! - The [`ForwardClient`] seam the forward producer talks through

pub mod channel;
pub mod client;
pub mod pool;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{
    ConsumerSendMsgBackRequestHeader, EndTransactionRequestHeader, HeartbeatData, Message,
    RemotingCommand, SendMessageRequestHeader, SendResult,
};

pub use channel::{BrokerChannel, RequestDeadline};
pub use client::RemotingClient;
pub use pool::{ClientFactory, ConnectionPool};

/// Broker operations the forward producer relies on.
///
/// Every address is a dialable `host:port`. Implementations must be safe to
/// share between concurrent callers.
#[async_trait]
pub trait ForwardClient: Send + Sync {
    /// Send a heartbeat and return the broker's response code.
    async fn send_heartbeat(
        &self,
        address: &str,
        heartbeat: &HeartbeatData,
        timeout_ms: u64,
    ) -> Result<i32>;

    /// Send a message synchronously.
    async fn send_message(
        &self,
        address: &str,
        broker_name: &str,
        message: &Message,
        header: &SendMessageRequestHeader,
        timeout_ms: u64,
    ) -> Result<SendResult>;

    /// Send an end-transaction request without waiting for a response.
    async fn end_transaction_oneway(
        &self,
        address: &str,
        header: &EndTransactionRequestHeader,
        remark: &str,
        timeout_ms: u64,
    ) -> Result<()>;

    /// Return a consumed message to the broker for redelivery.
    async fn send_message_back(
        &self,
        address: &str,
        header: &ConsumerSendMsgBackRequestHeader,
        timeout_ms: u64,
    ) -> Result<RemotingCommand>;
}
