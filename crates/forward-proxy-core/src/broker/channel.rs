//! Single broker channel.
//!
//! Manages a TCP connection to one broker address with opaque tracking for
//! request/response matching. The connection is opened on first use and
//! re-opened by the next request after it breaks.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

use crate::error::{ProxyError, Result};
use crate::protocol::{RemotingCodec, RemotingCommand};

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default frame limit (16 MB).
const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

type FramedStream = Framed<TcpStream, RemotingCodec>;

/// Deadline of one request, keeping the caller's timeout for error reports.
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline {
    at: Instant,
    timeout_ms: u64,
}

impl RequestDeadline {
    /// Deadline `timeout_ms` milliseconds from now.
    #[must_use]
    pub fn after_millis(timeout_ms: u64) -> Self {
        Self {
            at: Instant::now() + Duration::from_millis(timeout_ms),
            timeout_ms,
        }
    }

    #[must_use]
    pub fn instant(&self) -> Instant {
        self.at
    }

    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

/// A connection to a single broker address.
///
/// Requests on one channel are serialized: a request holds the channel
/// until its response (or, for one-way requests, its flush) completes.
pub struct BrokerChannel {
    address: String,
    stream: Mutex<Option<FramedStream>>,
    opaque: AtomicI32,
    connect_timeout: Duration,
    max_frame_size: usize,
}

impl BrokerChannel {
    /// Create a new channel (not yet connected).
    #[must_use]
    pub fn new(address: String) -> Self {
        Self::with_settings(address, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new channel with a custom connect timeout and frame limit.
    #[must_use]
    pub fn with_settings(address: String, connect_timeout: Duration, max_frame_size: usize) -> Self {
        Self {
            address,
            stream: Mutex::new(None),
            opaque: AtomicI32::new(0),
            connect_timeout,
            max_frame_size,
        }
    }

    /// Get the broker address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Check if the connection is established.
    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Generate a new opaque.
    #[must_use]
    pub fn next_opaque(&self) -> i32 {
        self.opaque.fetch_add(1, Ordering::Relaxed)
    }

    /// Disconnect from the broker.
    pub async fn disconnect(&self) {
        *self.stream.lock().await = None;
    }

    /// Send a request and wait for its response.
    ///
    /// Requests initiated by the broker that arrive while waiting are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The broker cannot be reached
    /// - Writing or reading fails
    /// - The response opaque doesn't match
    /// - The deadline passes
    #[instrument(skip(self, request), fields(address = %self.address, code = request.code))]
    pub async fn invoke_sync(
        &self,
        mut request: RemotingCommand,
        deadline: RequestDeadline,
    ) -> Result<RemotingCommand> {
        let opaque = self.next_opaque();
        request.opaque = opaque;

        let mut guard = timeout_at(deadline.instant(), self.stream.lock())
            .await
            .map_err(|_| self.timeout_error(deadline))?;
        self.ensure_connected(&mut guard, deadline).await?;

        let result = match guard.as_mut() {
            Some(stream) => {
                timeout_at(deadline.instant(), async {
                    stream.send(request).await?;
                    debug!(opaque, "sent request");
                    Self::read_response(stream, opaque).await
                })
                .await
            }
            None => return Err(self.unavailable("not connected")),
        };

        match result {
            Ok(Ok(response)) => {
                debug!(opaque, code = response.code, "received response");
                Ok(response)
            }
            Ok(Err(e)) => {
                // The stream state is unknown after a failure; reconnect next time.
                *guard = None;
                Err(e)
            }
            Err(_) => {
                *guard = None;
                Err(self.timeout_error(deadline))
            }
        }
    }

    /// Send a one-way request.
    ///
    /// Returns once the request is written and flushed; no response is
    /// read.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached, the write fails, or
    /// the deadline passes.
    #[instrument(skip(self, request), fields(address = %self.address, code = request.code))]
    pub async fn invoke_oneway(
        &self,
        mut request: RemotingCommand,
        deadline: RequestDeadline,
    ) -> Result<()> {
        request.mark_oneway();
        request.opaque = self.next_opaque();
        let opaque = request.opaque;

        let mut guard = timeout_at(deadline.instant(), self.stream.lock())
            .await
            .map_err(|_| self.timeout_error(deadline))?;
        self.ensure_connected(&mut guard, deadline).await?;

        let result = match guard.as_mut() {
            Some(stream) => timeout_at(deadline.instant(), stream.send(request)).await,
            None => return Err(self.unavailable("not connected")),
        };

        match result {
            Ok(Ok(())) => {
                debug!(opaque, "sent one-way request");
                Ok(())
            }
            Ok(Err(e)) => {
                *guard = None;
                Err(e)
            }
            Err(_) => {
                *guard = None;
                Err(self.timeout_error(deadline))
            }
        }
    }

    async fn ensure_connected(
        &self,
        guard: &mut Option<FramedStream>,
        deadline: RequestDeadline,
    ) -> Result<()> {
        if guard.is_some() {
            return Ok(());
        }

        let connect_timeout = self.connect_timeout.min(deadline.remaining());

        let tcp_stream = match timeout(connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(address = %self.address, error = %e, "failed to connect to broker");
                return Err(self.unavailable(&e.to_string()));
            }
            Err(_) => {
                warn!(address = %self.address, "connection timeout");
                return Err(self.unavailable("connection timeout"));
            }
        };

        if let Err(e) = tcp_stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        debug!(address = %self.address, "connected to broker");
        *guard = Some(Framed::new(
            tcp_stream,
            RemotingCodec::with_max_frame_size(self.max_frame_size),
        ));
        Ok(())
    }

    async fn read_response(stream: &mut FramedStream, opaque: i32) -> Result<RemotingCommand> {
        loop {
            let command = match stream.next().await {
                Some(frame) => frame?,
                None => {
                    return Err(ProxyError::Connection(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed by broker",
                    )));
                }
            };

            if !command.is_response() {
                debug!(
                    code = command.code,
                    opaque = command.opaque,
                    "skipping broker-initiated request"
                );
                continue;
            }

            if command.opaque != opaque {
                return Err(ProxyError::OpaqueMismatch {
                    expected: opaque,
                    actual: command.opaque,
                });
            }

            return Ok(command);
        }
    }

    fn unavailable(&self, message: &str) -> ProxyError {
        ProxyError::ConnectionUnavailable {
            address: self.address.clone(),
            message: message.to_string(),
        }
    }

    fn timeout_error(&self, deadline: RequestDeadline) -> ProxyError {
        warn!(address = %self.address, timeout_ms = deadline.timeout_ms(), "request timed out");
        ProxyError::RemoteTimeout {
            address: self.address.clone(),
            timeout_ms: deadline.timeout_ms(),
        }
    }
}
