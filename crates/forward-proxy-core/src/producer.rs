//! Forward producer.
//!
//! Issues heartbeat, send, end-transaction, and send-back requests through a
//! pool of broker clients, translating transaction ids on the way out of a
//! prepared send and on the way back into an end-transaction.
//!
//! Callers only ever see the encoded [`TransactionId`] token. The broker's
//! own offsets and transaction id stay inside it until the token is
//! presented again.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};

use crate::broker::{ConnectionPool, ForwardClient, RemotingClient};
use crate::config::ProxyConfig;
use crate::error::{ConfigResult, Result};
use crate::metrics::ForwardMetrics;
use crate::protocol::{
    parse_socket_address_addr, sysflag, ConsumerSendMsgBackRequestHeader,
    EndTransactionRequestHeader, HeartbeatData, Message, RemotingCommand,
    SendMessageRequestHeader, SendResult, SendStatus,
};
use crate::transaction::TransactionId;

/// Name prefix of pooled producer clients.
pub const PRODUCER_NAME_PREFIX: &str = "PID_RMQ_PROXY_PUBLISH_MESSAGE_";

/// Remark attached to forwarded end-transaction requests.
pub const END_TRANSACTION_REMARK: &str = "end transaction from rmq proxy";

/// Metric labels for each operation.
mod operation {
    pub const HEARTBEAT: &str = "heartbeat";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const END_TRANSACTION: &str = "end_transaction";
    pub const SEND_MESSAGE_BACK: &str = "send_message_back";
}

/// Producer-side forwarding to brokers.
pub struct ForwardProducer<C = RemotingClient> {
    pool: ConnectionPool<C>,
    metrics: Option<Arc<ForwardMetrics>>,
}

impl ForwardProducer<RemotingClient> {
    /// Build a producer with a pool of remoting clients sized from `config`.
    ///
    /// Each client bounds its in-flight requests by the host parallelism
    /// scaled with `forward.producer_worker_factor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ProxyConfig, metrics: Option<Arc<ForwardMetrics>>) -> ConfigResult<Self> {
        config.validate()?;

        let worker_threads = config.forward.worker_threads_for_host();
        let broker = config.broker.clone();

        Ok(Self::with_factory(
            config.forward.producer_num,
            metrics,
            move |name: &str| Ok(RemotingClient::new(name, worker_threads, &broker)),
        ))
    }

    /// Close every pooled client created so far.
    pub async fn shutdown(&self) {
        for client in self.pool.clients() {
            client.close().await;
        }
    }
}

impl<C: ForwardClient> ForwardProducer<C> {
    /// Build a producer whose `pool_size` clients come from `factory`.
    pub fn with_factory<F>(pool_size: usize, metrics: Option<Arc<ForwardMetrics>>, factory: F) -> Self
    where
        F: Fn(&str) -> Result<C> + Send + Sync + 'static,
    {
        Self {
            pool: ConnectionPool::new(PRODUCER_NAME_PREFIX, pool_size, factory),
            metrics,
        }
    }

    /// The client pool.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Metrics recorded by this producer, if enabled.
    #[must_use]
    pub fn metrics(&self) -> Option<&Arc<ForwardMetrics>> {
        self.metrics.as_ref()
    }

    /// Send a heartbeat and return the broker's response code.
    ///
    /// # Errors
    ///
    /// Returns an error if no client is available or the request fails.
    pub async fn heartbeat(
        &self,
        address: &str,
        heartbeat: &HeartbeatData,
        timeout_ms: u64,
    ) -> Result<i32> {
        self.observe(operation::HEARTBEAT, async {
            let client = self.select()?;
            client.send_heartbeat(address, heartbeat, timeout_ms).await
        })
        .await
    }

    /// Send a message.
    ///
    /// When the broker stored the message with [`SendStatus::SendOk`] and the
    /// header marks it as a prepared transactional message, the result's
    /// transaction id is replaced by an encoded [`TransactionId`] pointing
    /// back at `address`. Any other result is returned as the broker sent it.
    ///
    /// # Errors
    ///
    /// Returns an error if no client is available, the request fails, or the
    /// transaction id cannot be built.
    #[instrument(skip(self, message, header), fields(topic = %message.topic, sys_flag = header.sys_flag))]
    pub async fn send_message(
        &self,
        address: &str,
        broker_name: &str,
        message: &Message,
        header: &SendMessageRequestHeader,
        timeout_ms: u64,
    ) -> Result<SendResult> {
        self.observe(operation::SEND_MESSAGE, async {
            let client = self.select()?;
            let result = client
                .send_message(address, broker_name, message, header, timeout_ms)
                .await?;
            self.translate_send_result(address, header, result)
        })
        .await
    }

    /// Swap the broker's transaction id of a stored prepared message for a
    /// proxy token.
    fn translate_send_result(
        &self,
        address: &str,
        header: &SendMessageRequestHeader,
        mut result: SendResult,
    ) -> Result<SendResult> {
        if result.send_status != SendStatus::SendOk || !sysflag::is_prepared(header.sys_flag) {
            return Ok(result);
        }

        let transaction_id = TransactionId::from_broker_result(address, &result)?;
        debug!(
            broker_addr = transaction_id.broker_addr(),
            tran_state_table_offset = transaction_id.tran_state_table_offset(),
            commit_log_offset = transaction_id.commit_log_offset(),
            "issued transaction id for prepared message"
        );
        result.transaction_id = Some(transaction_id.encode());
        if let Some(metrics) = &self.metrics {
            metrics.record_transaction_id_issued();
        }

        Ok(result)
    }

    /// Commit or roll back a prepared message.
    ///
    /// The header's transaction id must be a token issued by
    /// [`send_message`](Self::send_message). The request is rebuilt with the
    /// offsets and broker transaction id carried in the token and sent
    /// one-way to the broker the token names.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::MalformedTransactionId`](crate::ProxyError::MalformedTransactionId)
    /// before any network call if the token cannot be decoded, otherwise any
    /// error from writing the request.
    #[instrument(skip(self, header), fields(producer_group = %header.producer_group, msg_id = %header.msg_id))]
    pub async fn end_transaction(
        &self,
        header: &EndTransactionRequestHeader,
        timeout_ms: u64,
    ) -> Result<()> {
        self.observe(operation::END_TRANSACTION, async {
            let transaction_id =
                TransactionId::decode(header.transaction_id.as_deref().unwrap_or_default())?;

            let request = EndTransactionRequestHeader {
                producer_group: header.producer_group.clone(),
                tran_state_table_offset: transaction_id.tran_state_table_offset(),
                commit_log_offset: transaction_id.commit_log_offset(),
                commit_or_rollback: header.commit_or_rollback,
                from_transaction_check: header.from_transaction_check,
                msg_id: header.msg_id.clone(),
                transaction_id: Some(transaction_id.broker_transaction_id().to_string()),
            };
            let address = parse_socket_address_addr(transaction_id.broker_addr());

            let client = self.select()?;
            client
                .end_transaction_oneway(address, &request, END_TRANSACTION_REMARK, timeout_ms)
                .await
        })
        .await
    }

    /// Return a consumed message to `address` for redelivery.
    ///
    /// # Errors
    ///
    /// Returns an error if no client is available or the request fails.
    pub async fn send_message_back(
        &self,
        address: &str,
        header: &ConsumerSendMsgBackRequestHeader,
        timeout_ms: u64,
    ) -> Result<RemotingCommand> {
        self.observe(operation::SEND_MESSAGE_BACK, async {
            let client = self.select()?;
            client.send_message_back(address, header, timeout_ms).await
        })
        .await
    }

    fn select(&self) -> Result<Arc<C>> {
        let client = self.pool.select()?;
        if let Some(metrics) = &self.metrics {
            metrics.set_pool_clients(self.pool.created());
        }
        Ok(client)
    }

    async fn observe<T, Fut>(&self, operation: &'static str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let Some(metrics) = &self.metrics else {
            return fut.await;
        };

        metrics.record_request(operation);
        let start = Instant::now();
        let result = fut.await;
        metrics.record_duration(operation, start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            debug!(operation, error = %e, "forward request failed");
            metrics.record_error(operation, e.kind());
        }
        result
    }
}
