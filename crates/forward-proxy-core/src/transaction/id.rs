//! Proxy-visible transaction id tokens.
//!
//! A token packs everything needed to finish a transaction on the broker
//! that holds it, so the proxy never stores transaction state.
//!
//! # Token layout
//!
//! The token is the unpadded URL-safe base64 form of:
//!
//! | field                      | encoding                      |
//! |----------------------------|-------------------------------|
//! | format version             | `u8`, currently `1`           |
//! | broker address             | `u16` length + UTF-8 bytes    |
//! | transaction state offset   | `u64` big-endian              |
//! | commit log offset          | `u64` big-endian              |
//! | broker transaction id      | `u16` length + UTF-8 bytes    |
//!
//! Length prefixes make the framing independent of the characters in the
//! address or broker id, and canonical base64 makes
//! `encode(decode(token)) == token` hold for every accepted token.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use tracing::warn;

use crate::error::{TransactionIdError, TransactionIdResult};
use crate::protocol::{MessageId, SendResult};

const FORMAT_VERSION: u8 = 1;

/// Coordinates of a prepared transaction on a broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId {
    broker_addr: PrefixedStr,
    tran_state_table_offset: u64,
    commit_log_offset: u64,
    broker_transaction_id: PrefixedStr,
}

impl TransactionId {
    /// Create a transaction id from its four fields.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionIdError::FieldTooLong`] if a string field does
    /// not fit its 16-bit length prefix.
    pub fn new(
        broker_addr: impl Into<String>,
        tran_state_table_offset: u64,
        commit_log_offset: u64,
        broker_transaction_id: impl Into<String>,
    ) -> TransactionIdResult<Self> {
        let broker_addr = PrefixedStr::new("broker_addr", broker_addr.into())?;
        let broker_transaction_id =
            PrefixedStr::new("broker_transaction_id", broker_transaction_id.into())?;

        Ok(Self {
            broker_addr,
            tran_state_table_offset,
            commit_log_offset,
            broker_transaction_id,
        })
    }

    /// Build the id for a prepared send acknowledged by `broker_addr`.
    ///
    /// The transaction state offset is the result's queue offset and the
    /// commit log offset comes from its offset message id. An offset message
    /// id that cannot be decoded yields a commit log offset of zero.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionIdError::FieldTooLong`] if the address or the
    /// broker transaction id is too long to encode.
    pub fn from_broker_result(broker_addr: &str, result: &SendResult) -> TransactionIdResult<Self> {
        let commit_log_offset = match MessageId::decode(&result.offset_msg_id) {
            Ok(id) => id.commit_log_offset,
            Err(e) => {
                warn!(
                    offset_msg_id = %result.offset_msg_id,
                    error = %e,
                    "cannot read commit log offset from send result"
                );
                0
            }
        };

        Self::new(
            broker_addr,
            result.queue_offset,
            commit_log_offset,
            result.transaction_id.clone().unwrap_or_default(),
        )
    }

    /// Address of the broker holding the transaction.
    #[must_use]
    pub fn broker_addr(&self) -> &str {
        &self.broker_addr.value
    }

    #[must_use]
    pub fn tran_state_table_offset(&self) -> u64 {
        self.tran_state_table_offset
    }

    #[must_use]
    pub fn commit_log_offset(&self) -> u64 {
        self.commit_log_offset
    }

    /// The broker's own transaction id.
    #[must_use]
    pub fn broker_transaction_id(&self) -> &str {
        &self.broker_transaction_id.value
    }

    /// Encode into the opaque token handed to proxy clients.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut buf = BytesMut::with_capacity(
            1 + 2
                + self.broker_addr.value.len()
                + 8
                + 8
                + 2
                + self.broker_transaction_id.value.len(),
        );
        buf.put_u8(FORMAT_VERSION);
        self.broker_addr.put(&mut buf);
        buf.put_u64(self.tran_state_table_offset);
        buf.put_u64(self.commit_log_offset);
        self.broker_transaction_id.put(&mut buf);
        URL_SAFE_NO_PAD.encode(&buf)
    }

    /// Decode a token produced by [`TransactionId::encode`].
    ///
    /// # Errors
    ///
    /// Returns a [`TransactionIdError`] if the token is not canonical
    /// base64, uses an unknown format version, is truncated, carries
    /// trailing bytes, or contains a string field that is not UTF-8.
    pub fn decode(token: &str) -> TransactionIdResult<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TransactionIdError::InvalidEncoding)?;
        let mut buf = &raw[..];

        if !buf.has_remaining() {
            return Err(TransactionIdError::Truncated { field: "version" });
        }
        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(TransactionIdError::UnsupportedVersion(version));
        }

        let broker_addr = PrefixedStr::get(&mut buf, "broker_addr")?;
        let tran_state_table_offset = get_u64(&mut buf, "tran_state_table_offset")?;
        let commit_log_offset = get_u64(&mut buf, "commit_log_offset")?;
        let broker_transaction_id = PrefixedStr::get(&mut buf, "broker_transaction_id")?;

        if buf.has_remaining() {
            return Err(TransactionIdError::TrailingBytes(buf.remaining()));
        }

        Ok(Self {
            broker_addr,
            tran_state_table_offset,
            commit_log_offset,
            broker_transaction_id,
        })
    }
}

impl FromStr for TransactionId {
    type Err = TransactionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// String field together with its `u16` length prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PrefixedStr {
    len: u16,
    value: String,
}

impl PrefixedStr {
    fn new(field: &'static str, value: String) -> TransactionIdResult<Self> {
        let len = u16::try_from(value.len()).map_err(|_| TransactionIdError::FieldTooLong {
            field,
            len: value.len(),
        })?;
        Ok(Self { len, value })
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.len);
        buf.put_slice(self.value.as_bytes());
    }

    fn get(buf: &mut &[u8], field: &'static str) -> TransactionIdResult<Self> {
        if buf.remaining() < 2 {
            return Err(TransactionIdError::Truncated { field });
        }
        let len = buf.get_u16();
        let n = usize::from(len);
        if buf.remaining() < n {
            return Err(TransactionIdError::Truncated { field });
        }
        let value = std::str::from_utf8(&buf[..n])
            .map_err(|_| TransactionIdError::InvalidUtf8 { field })?
            .to_string();
        buf.advance(n);
        Ok(Self { len, value })
    }
}

fn get_u64(buf: &mut &[u8], field: &'static str) -> TransactionIdResult<u64> {
    if buf.remaining() < 8 {
        return Err(TransactionIdError::Truncated { field });
    }
    Ok(buf.get_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageQueue, SendStatus};

    fn sample() -> TransactionId {
        TransactionId::new("10.0.0.1:10911", 42, 1000, "abc").unwrap()
    }

    fn send_result(offset_msg_id: &str) -> SendResult {
        SendResult {
            send_status: SendStatus::SendOk,
            msg_id: Some("UNIQ".to_string()),
            offset_msg_id: offset_msg_id.to_string(),
            message_queue: MessageQueue::default(),
            queue_offset: 42,
            transaction_id: Some("broker-tx".to_string()),
        }
    }

    #[test]
    fn test_round_trip() {
        let id = sample();
        let decoded = TransactionId::decode(&id.encode()).unwrap();

        assert_eq!(decoded, id);
        assert_eq!(decoded.broker_addr(), "10.0.0.1:10911");
        assert_eq!(decoded.tran_state_table_offset(), 42);
        assert_eq!(decoded.commit_log_offset(), 1000);
        assert_eq!(decoded.broker_transaction_id(), "abc");
    }

    #[test]
    fn test_token_is_stable() {
        let token = sample().encode();
        assert_eq!(TransactionId::decode(&token).unwrap().encode(), token);
        assert_eq!(sample().to_string(), token);
        assert_eq!(token.parse::<TransactionId>().unwrap(), sample());
    }

    #[test]
    fn test_separator_characters_do_not_collide() {
        let a = TransactionId::new("host:1;2", 1, 2, "x;y").unwrap();
        let b = TransactionId::new("host:1", 1, 2, "2;x;y").unwrap();

        assert_ne!(a.encode(), b.encode());
        assert_eq!(TransactionId::decode(&a.encode()).unwrap(), a);
        assert_eq!(TransactionId::decode(&b.encode()).unwrap(), b);
    }

    #[test]
    fn test_extreme_values() {
        let id = TransactionId::new("[::1]:10911", u64::MAX, 0, "").unwrap();
        assert_eq!(TransactionId::decode(&id.encode()).unwrap(), id);
    }

    #[test]
    fn test_field_too_long() {
        let long = "a".repeat(usize::from(u16::MAX) + 1);
        assert!(matches!(
            TransactionId::new(long.clone(), 0, 0, "tx"),
            Err(TransactionIdError::FieldTooLong {
                field: "broker_addr",
                ..
            })
        ));
        assert_eq!(
            TransactionId::new("10.0.0.1:10911", 0, 0, long),
            Err(TransactionIdError::FieldTooLong {
                field: "broker_transaction_id",
                len: usize::from(u16::MAX) + 1,
            })
        );
    }

    #[test]
    fn test_longest_field_fits() {
        let longest = "a".repeat(usize::from(u16::MAX));
        let id = TransactionId::new("10.0.0.1:10911", 1, 2, longest.as_str()).unwrap();

        let raw = URL_SAFE_NO_PAD.decode(id.encode()).unwrap();
        let prefix_at = raw.len() - longest.len() - 2;
        assert_eq!(&raw[prefix_at..prefix_at + 2], &[0xff, 0xff]);
        assert_eq!(TransactionId::decode(&id.encode()).unwrap(), id);
    }

    #[test]
    fn test_decode_invalid_base64() {
        assert_eq!(
            TransactionId::decode("not a token!"),
            Err(TransactionIdError::InvalidEncoding)
        );
        // Padded form is not the canonical encoding.
        assert_eq!(
            TransactionId::decode("AQ=="),
            Err(TransactionIdError::InvalidEncoding)
        );
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(
            TransactionId::decode(""),
            Err(TransactionIdError::Truncated { field: "version" })
        );
    }

    #[test]
    fn test_decode_unknown_version() {
        let token = URL_SAFE_NO_PAD.encode([9u8, 0, 0]);
        assert_eq!(
            TransactionId::decode(&token),
            Err(TransactionIdError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_decode_truncated() {
        let raw = URL_SAFE_NO_PAD.decode(sample().encode()).unwrap();
        let token = URL_SAFE_NO_PAD.encode(&raw[..raw.len() - 4]);

        assert_eq!(
            TransactionId::decode(&token),
            Err(TransactionIdError::Truncated {
                field: "broker_transaction_id"
            })
        );
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut raw = URL_SAFE_NO_PAD.decode(sample().encode()).unwrap();
        raw.extend_from_slice(&[0, 1]);
        let token = URL_SAFE_NO_PAD.encode(&raw);

        assert_eq!(
            TransactionId::decode(&token),
            Err(TransactionIdError::TrailingBytes(2))
        );
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let mut raw = vec![FORMAT_VERSION, 0, 2, 0xff, 0xfe];
        raw.extend_from_slice(&[0u8; 16]);
        raw.extend_from_slice(&[0, 0]);
        let token = URL_SAFE_NO_PAD.encode(&raw);

        assert_eq!(
            TransactionId::decode(&token),
            Err(TransactionIdError::InvalidUtf8 {
                field: "broker_addr"
            })
        );
    }

    #[test]
    fn test_from_broker_result() {
        // Store host 10.0.0.1:10911, commit log offset 1000.
        let result = send_result("0A00000100002A9F00000000000003E8");
        let id = TransactionId::from_broker_result("10.0.0.1:10911", &result).unwrap();

        assert_eq!(id.broker_addr(), "10.0.0.1:10911");
        assert_eq!(id.tran_state_table_offset(), 42);
        assert_eq!(id.commit_log_offset(), 1000);
        assert_eq!(id.broker_transaction_id(), "broker-tx");
    }

    #[test]
    fn test_from_broker_result_unreadable_offset_msg_id() {
        let result = send_result("garbage");
        let id = TransactionId::from_broker_result("10.0.0.1:10911", &result).unwrap();

        assert_eq!(id.commit_log_offset(), 0);
        assert_eq!(id.tran_state_table_offset(), 42);
    }

    #[test]
    fn test_from_broker_result_signed_offset_msg_id() {
        let result = send_result("+A00000100002A9F00000000000003E8");
        let id = TransactionId::from_broker_result("10.0.0.1:10911", &result).unwrap();

        assert_eq!(id.commit_log_offset(), 0);
    }
}
