//! Domain error types for the forward producer proxy.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use thiserror::Error;

/// Errors raised when a transaction id token cannot be encoded or decoded.
///
/// Decoding never yields a partially populated value: any of these errors
/// means the whole token was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionIdError {
    /// The token is not valid URL-safe base64.
    #[error("malformed transaction id: invalid encoding")]
    InvalidEncoding,

    /// The token ended before the named field was complete.
    #[error("malformed transaction id: truncated while reading {field}")]
    Truncated { field: &'static str },

    /// The leading format byte is not one this codec understands.
    #[error("malformed transaction id: unsupported format version {0}")]
    UnsupportedVersion(u8),

    /// Bytes remained after the last field.
    #[error("malformed transaction id: {0} trailing bytes")]
    TrailingBytes(usize),

    /// A string field is not valid UTF-8.
    #[error("malformed transaction id: {field} is not valid utf-8")]
    InvalidUtf8 { field: &'static str },

    /// A string field is too long for its length prefix.
    #[error("transaction id field {field} too long: {len} bytes")]
    FieldTooLong { field: &'static str, len: usize },
}

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The forward producer pool must hold at least one client.
    #[error("forward.producer_num must be at least 1, got {0}")]
    InvalidPoolSize(usize),

    /// The worker factor must be a positive finite number.
    #[error("forward.producer_worker_factor must be a positive number, got {0}")]
    InvalidWorkerFactor(f64),

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Errors that occur while forwarding requests to brokers.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The caller supplied a transaction id this proxy did not issue.
    #[error(transparent)]
    MalformedTransactionId(#[from] TransactionIdError),

    /// No usable connection to the broker could be obtained.
    #[error("connection to {address} unavailable: {message}")]
    ConnectionUnavailable { address: String, message: String },

    /// The broker did not answer within the caller's timeout.
    #[error("request to {address} timed out after {timeout_ms}ms")]
    RemoteTimeout { address: String, timeout_ms: u64 },

    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Failed to decode a remoting frame or header.
    #[error("protocol decode error: {message}")]
    ProtocolDecode { message: String },

    /// Failed to encode a remoting frame or header.
    #[error("protocol encode error: {message}")]
    ProtocolEncode { message: String },

    /// The broker answered with a response code the operation does not accept.
    #[error("broker responded with code {code}: {remark}")]
    BrokerResponse { code: i32, remark: String },

    /// Response opaque did not match the request.
    #[error("opaque mismatch: expected {expected}, got {actual}")]
    OpaqueMismatch { expected: i32, actual: i32 },
}

impl ProxyError {
    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedTransactionId(_) => "malformed_transaction_id",
            Self::ConnectionUnavailable { .. } => "connection_unavailable",
            Self::RemoteTimeout { .. } => "remote_timeout",
            Self::Connection(_) => "connection",
            Self::ProtocolDecode { .. } => "protocol_decode",
            Self::ProtocolEncode { .. } => "protocol_encode",
            Self::BrokerResponse { .. } => "broker_response",
            Self::OpaqueMismatch { .. } => "opaque_mismatch",
        }
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for transaction id encoding and decoding.
pub type TransactionIdResult<T> = std::result::Result<T, TransactionIdError>;
