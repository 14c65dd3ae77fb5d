//! Broker remoting protocol.
//!
//! This module provides:
//! - The remoting command model and its request/response codes
//! - A frame codec for reading and writing commands
//! - Typed request headers and data records
//! - Message system flag helpers and offset message id decoding

pub mod codec;
pub mod command;
pub mod header;
pub mod message_id;
pub mod sysflag;

pub use codec::RemotingCodec;
pub use command::{request_code, response_code, RemotingCommand};
pub use header::{
    CommandHeader, ConsumerData, ConsumerSendMsgBackRequestHeader, EndTransactionRequestHeader,
    HeartbeatData, Message, MessageQueue, ProducerData, SendMessageRequestHeader, SendResult,
    SendStatus, SubscriptionData,
};
pub use message_id::MessageId;

/// Normalize a socket address string into a dialable `host:port`.
///
/// Socket addresses rendered from resolved endpoints may carry a leading
/// `/` (or a `hostname/` prefix); only the part after the last `/` is kept.
#[must_use]
pub fn parse_socket_address_addr(addr: &str) -> &str {
    match addr.rfind('/') {
        Some(idx) => &addr[idx + 1..],
        None => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socket_address_addr() {
        assert_eq!(parse_socket_address_addr("/10.0.0.1:10911"), "10.0.0.1:10911");
        assert_eq!(
            parse_socket_address_addr("broker-a/10.0.0.1:10911"),
            "10.0.0.1:10911"
        );
        assert_eq!(parse_socket_address_addr("10.0.0.1:10911"), "10.0.0.1:10911");
    }
}
