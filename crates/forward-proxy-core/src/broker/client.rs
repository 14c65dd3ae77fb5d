//! Pooled remoting client.
//!
//! A `RemotingClient` is one named handle of the forward producer pool. It
//! keeps one [`BrokerChannel`] per broker address and bounds the number of
//! requests it has in flight by its worker count.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::time::timeout_at;
use tracing::{debug, info};

use crate::config::BrokerConfig;
use crate::error::{ProxyError, Result};
use crate::protocol::{
    request_code, CommandHeader, ConsumerSendMsgBackRequestHeader, EndTransactionRequestHeader,
    HeartbeatData, Message, RemotingCommand, SendMessageRequestHeader, SendResult, SendStatus,
};

use super::channel::{BrokerChannel, RequestDeadline};
use super::ForwardClient;

/// Connection handle shared by concurrent requests.
pub struct RemotingClient {
    name: String,
    worker_threads: usize,
    permits: Semaphore,
    /// Channels indexed by broker address.
    channels: DashMap<String, Arc<BrokerChannel>>,
    connect_timeout: Duration,
    max_frame_size: usize,
}

impl RemotingClient {
    /// Create a new client; no connection is opened until the first request.
    #[must_use]
    pub fn new(name: impl Into<String>, worker_threads: usize, config: &BrokerConfig) -> Self {
        let name = name.into();
        let worker_threads = worker_threads.max(1);
        info!(client = %name, worker_threads, "created forward client");

        Self {
            name,
            worker_threads,
            permits: Semaphore::new(worker_threads),
            channels: DashMap::new(),
            connect_timeout: Duration::from_millis(config.connection_timeout_ms),
            max_frame_size: config.max_frame_size,
        }
    }

    /// Get the client name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of requests in flight on this client.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Number of broker channels opened so far.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Get or create the channel for `address`.
    fn channel(&self, address: &str) -> Arc<BrokerChannel> {
        if let Some(channel) = self.channels.get(address) {
            return Arc::clone(channel.value());
        }

        let channel = self
            .channels
            .entry(address.to_string())
            .or_insert_with(|| {
                debug!(client = %self.name, address, "creating broker channel");
                Arc::new(BrokerChannel::with_settings(
                    address.to_string(),
                    self.connect_timeout,
                    self.max_frame_size,
                ))
            });
        Arc::clone(channel.value())
    }

    async fn invoke_sync(
        &self,
        address: &str,
        request: RemotingCommand,
        timeout_ms: u64,
    ) -> Result<RemotingCommand> {
        let deadline = RequestDeadline::after_millis(timeout_ms);
        let _permit = self.acquire(address, deadline).await?;
        self.channel(address).invoke_sync(request, deadline).await
    }

    async fn invoke_oneway(
        &self,
        address: &str,
        request: RemotingCommand,
        timeout_ms: u64,
    ) -> Result<()> {
        let deadline = RequestDeadline::after_millis(timeout_ms);
        let _permit = self.acquire(address, deadline).await?;
        self.channel(address).invoke_oneway(request, deadline).await
    }

    async fn acquire(
        &self,
        address: &str,
        deadline: RequestDeadline,
    ) -> Result<tokio::sync::SemaphorePermit<'_>> {
        match timeout_at(deadline.instant(), self.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ProxyError::ConnectionUnavailable {
                address: address.to_string(),
                message: format!("client {} is closed", self.name),
            }),
            Err(_) => Err(ProxyError::RemoteTimeout {
                address: address.to_string(),
                timeout_ms: deadline.timeout_ms(),
            }),
        }
    }

    /// Close the client: pending and future requests fail and all channels
    /// are dropped.
    pub async fn close(&self) {
        self.permits.close();
        let channels: Vec<Arc<BrokerChannel>> = self
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.channels.clear();
        for channel in channels {
            channel.disconnect().await;
        }
    }
}

#[async_trait]
impl ForwardClient for RemotingClient {
    async fn send_heartbeat(
        &self,
        address: &str,
        heartbeat: &HeartbeatData,
        timeout_ms: u64,
    ) -> Result<i32> {
        let request = RemotingCommand::request(request_code::HEART_BEAT, Default::default())
            .with_body(heartbeat.encode()?);

        let response = self.invoke_sync(address, request, timeout_ms).await?;
        Ok(response.code)
    }

    async fn send_message(
        &self,
        address: &str,
        broker_name: &str,
        message: &Message,
        header: &SendMessageRequestHeader,
        timeout_ms: u64,
    ) -> Result<SendResult> {
        let mut fields = header.to_ext_fields();
        if header.properties.is_none() && !message.properties.is_empty() {
            fields.insert("properties".to_string(), message.properties_string());
        }
        let request = RemotingCommand::request(request_code::SEND_MESSAGE, fields)
            .with_body(message.body.clone());

        let response = self.invoke_sync(address, request, timeout_ms).await?;

        let status = SendStatus::from_response_code(response.code).ok_or_else(|| {
            ProxyError::BrokerResponse {
                code: response.code,
                remark: response.remark_or_empty().to_string(),
            }
        })?;

        SendResult::from_response(
            status,
            &response.ext_fields,
            &message.topic,
            broker_name,
            message.uniq_key().map(str::to_string),
        )
    }

    async fn end_transaction_oneway(
        &self,
        address: &str,
        header: &EndTransactionRequestHeader,
        remark: &str,
        timeout_ms: u64,
    ) -> Result<()> {
        let mut request =
            RemotingCommand::request(request_code::END_TRANSACTION, header.to_ext_fields());
        request.remark = Some(remark.to_string());

        self.invoke_oneway(address, request, timeout_ms).await
    }

    async fn send_message_back(
        &self,
        address: &str,
        header: &ConsumerSendMsgBackRequestHeader,
        timeout_ms: u64,
    ) -> Result<RemotingCommand> {
        let request =
            RemotingCommand::request(request_code::CONSUMER_SEND_MSG_BACK, header.to_ext_fields());

        self.invoke_sync(address, request, timeout_ms).await
    }
}
