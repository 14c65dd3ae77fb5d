//! Mock broker for integration testing.
//!
//! A lightweight mock broker that:
//! - Accepts remoting protocol connections
//! - Records all requests received
//! - Answers with configurable responses per request code
//! - Never answers one-way requests

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_util::codec::Framed;

use crate::protocol::{
    request_code, response_code, Message, MessageId, RemotingCodec, RemotingCommand,
};

/// A recorded broker call.
#[derive(Debug, Clone)]
pub struct BrokerCall {
    /// The request code.
    pub code: i32,
    /// The opaque of the request.
    pub opaque: i32,
    /// Whether the request was sent one-way.
    pub oneway: bool,
    /// The request remark.
    pub remark: Option<String>,
    /// Header fields of the request.
    pub ext_fields: BTreeMap<String, String>,
    /// The request body.
    pub body: Bytes,
}

impl BrokerCall {
    /// Message properties carried in the `properties` header field.
    #[must_use]
    pub fn message_properties(&self) -> BTreeMap<String, String> {
        self.ext_fields
            .get("properties")
            .map(|raw| Message::parse_properties(raw))
            .unwrap_or_default()
    }
}

/// Response generator function type. `None` sends no response.
pub type ResponseGenerator = Arc<dyn Fn(&BrokerCall) -> Option<RemotingCommand> + Send + Sync>;

/// Mock broker for testing.
pub struct MockBroker {
    address: String,
    shutdown_tx: Option<broadcast::Sender<()>>,
    call_log: Arc<RwLock<Vec<BrokerCall>>>,
    response_handlers: Arc<RwLock<HashMap<i32, ResponseGenerator>>>,
}

impl MockBroker {
    /// Create a new mock broker that will bind to the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            shutdown_tx: None,
            call_log: Arc::new(RwLock::new(Vec::new())),
            response_handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the mock broker.
    ///
    /// Returns the actual address the broker is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let store_host = listener.local_addr()?;
        let actual_address = store_host.to_string();
        self.address = actual_address.clone();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let call_log = self.call_log.clone();
        let response_handlers = self.response_handlers.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _addr)) => {
                                let call_log = call_log.clone();
                                let response_handlers = response_handlers.clone();
                                let shutdown_rx = shutdown_tx.subscribe();

                                tokio::spawn(async move {
                                    Self::handle_connection(stream, store_host, call_log, response_handlers, shutdown_rx).await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(actual_address)
    }

    /// Stop the mock broker.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Register a response handler for a specific request code.
    pub async fn register_handler(&self, code: i32, handler: ResponseGenerator) {
        self.response_handlers.write().await.insert(code, handler);
    }

    /// Get all recorded calls.
    pub async fn get_calls(&self) -> Vec<BrokerCall> {
        self.call_log.read().await.clone()
    }

    /// Get calls filtered by request code.
    pub async fn get_calls_for_code(&self, code: i32) -> Vec<BrokerCall> {
        self.call_log
            .read()
            .await
            .iter()
            .filter(|c| c.code == code)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` calls with `code` were recorded, or
    /// `timeout` passes, and return the calls seen.
    ///
    /// One-way requests get no response, so this is how tests observe them.
    pub async fn wait_for_calls(&self, code: i32, count: usize, timeout: Duration) -> Vec<BrokerCall> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let calls = self.get_calls_for_code(code).await;
            if calls.len() >= count || tokio::time::Instant::now() >= deadline {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Clear the call log.
    pub async fn clear_calls(&self) {
        self.call_log.write().await.clear();
    }

    /// Get the broker address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Handle a single client connection.
    async fn handle_connection(
        stream: TcpStream,
        store_host: SocketAddr,
        call_log: Arc<RwLock<Vec<BrokerCall>>>,
        response_handlers: Arc<RwLock<HashMap<i32, ResponseGenerator>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut framed = Framed::new(stream, RemotingCodec::new());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                frame = framed.next() => {
                    let request = match frame {
                        Some(Ok(request)) => request,
                        // Connection closed or undecodable frame
                        _ => break,
                    };

                    let call = BrokerCall {
                        code: request.code,
                        opaque: request.opaque,
                        oneway: request.is_oneway(),
                        remark: request.remark.clone(),
                        ext_fields: request.ext_fields.clone(),
                        body: request.body.clone(),
                    };

                    let commit_log_offset = {
                        let mut log = call_log.write().await;
                        log.push(call.clone());
                        log.len() as u64 - 1
                    };

                    if call.oneway {
                        continue;
                    }

                    let response = {
                        let handlers = response_handlers.read().await;
                        match handlers.get(&call.code) {
                            Some(handler) => handler(&call),
                            None => Some(Self::default_response(
                                &call,
                                store_host,
                                commit_log_offset,
                            )),
                        }
                    };

                    if let Some(mut response) = response {
                        response.opaque = call.opaque;
                        if framed.send(response).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Generate a default response for a call.
    ///
    /// Sends are acknowledged as stored on this broker at queue offset 0,
    /// with the call's position in the log as commit log offset. Everything
    /// else gets a bare success.
    fn default_response(
        call: &BrokerCall,
        store_host: SocketAddr,
        commit_log_offset: u64,
    ) -> RemotingCommand {
        match call.code {
            request_code::SEND_MESSAGE => {
                let offset_msg_id = MessageId {
                    store_host,
                    commit_log_offset,
                }
                .encode();
                responses::stored(call, &offset_msg_id, 0, None)
            }
            _ => responses::code_only(call, response_code::SUCCESS),
        }
    }
}

/// Response generators for common request types.
pub mod responses {
    use super::*;

    /// A response carrying only a code.
    #[must_use]
    pub fn code_only(call: &BrokerCall, code: i32) -> RemotingCommand {
        let mut response = RemotingCommand::response(code, None);
        response.opaque = call.opaque;
        response
    }

    /// A send acknowledgment for a stored message.
    #[must_use]
    pub fn stored(
        call: &BrokerCall,
        offset_msg_id: &str,
        queue_offset: u64,
        transaction_id: Option<&str>,
    ) -> RemotingCommand {
        let queue_id = call
            .ext_fields
            .get("queueId")
            .cloned()
            .unwrap_or_else(|| "0".to_string());

        let mut response = code_only(call, response_code::SUCCESS)
            .with_ext_field("msgId", offset_msg_id)
            .with_ext_field("queueId", queue_id)
            .with_ext_field("queueOffset", queue_offset);
        if let Some(transaction_id) = transaction_id {
            response = response.with_ext_field("transactionId", transaction_id);
        }
        response
    }

    /// Acknowledge sends as stored with fixed coordinates.
    #[must_use]
    pub fn send_ok(offset_msg_id: &str, queue_offset: u64, transaction_id: Option<&str>) -> ResponseGenerator {
        let offset_msg_id = offset_msg_id.to_string();
        let transaction_id = transaction_id.map(str::to_string);

        Arc::new(move |call: &BrokerCall| {
            Some(stored(
                call,
                &offset_msg_id,
                queue_offset,
                transaction_id.as_deref(),
            ))
        })
    }

    /// Answer every request with `code`.
    #[must_use]
    pub fn with_code(code: i32) -> ResponseGenerator {
        Arc::new(move |call: &BrokerCall| Some(code_only(call, code)))
    }

    /// Never answer.
    #[must_use]
    pub fn no_reply() -> ResponseGenerator {
        Arc::new(|_: &BrokerCall| None)
    }
}
