//! Broker-generated ("offset") message ids.
//!
//! An offset message id is the upper-case hex form of
//! `store host ip (4 or 16 bytes) | store port (4 bytes) | commit log offset (8 bytes)`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{ProxyError, Result};

const IPV4_ID_LEN: usize = 4 + 4 + 8;
const IPV6_ID_LEN: usize = 16 + 4 + 8;

/// Decoded offset message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageId {
    pub store_host: SocketAddr,
    pub commit_log_offset: u64,
}

impl MessageId {
    /// Decode an offset message id.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ProtocolDecode`] if the id is not hex or has an
    /// unexpected length.
    pub fn decode(offset_msg_id: &str) -> Result<Self> {
        let bytes = hex::decode(offset_msg_id).map_err(|_| invalid(offset_msg_id))?;

        let (ip, rest): (IpAddr, &[u8]) = match bytes.len() {
            IPV4_ID_LEN => {
                let octets: [u8; 4] = bytes[..4].try_into().map_err(|_| invalid(offset_msg_id))?;
                (Ipv4Addr::from(octets).into(), &bytes[4..])
            }
            IPV6_ID_LEN => {
                let octets: [u8; 16] =
                    bytes[..16].try_into().map_err(|_| invalid(offset_msg_id))?;
                (Ipv6Addr::from(octets).into(), &bytes[16..])
            }
            _ => return Err(invalid(offset_msg_id)),
        };

        let port: [u8; 4] = rest[..4].try_into().map_err(|_| invalid(offset_msg_id))?;
        let offset: [u8; 8] = rest[4..12].try_into().map_err(|_| invalid(offset_msg_id))?;
        let port = u16::try_from(u32::from_be_bytes(port)).map_err(|_| invalid(offset_msg_id))?;

        Ok(Self {
            store_host: SocketAddr::new(ip, port),
            commit_log_offset: u64::from_be_bytes(offset),
        })
    }

    /// Encode in the broker's upper-case hex form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(IPV6_ID_LEN);
        match self.store_host.ip() {
            IpAddr::V4(ip) => bytes.extend_from_slice(&ip.octets()),
            IpAddr::V6(ip) => bytes.extend_from_slice(&ip.octets()),
        }
        bytes.extend_from_slice(&u32::from(self.store_host.port()).to_be_bytes());
        bytes.extend_from_slice(&self.commit_log_offset.to_be_bytes());
        hex::encode_upper(bytes)
    }
}

fn invalid(id: &str) -> ProxyError {
    ProxyError::ProtocolDecode {
        message: format!("invalid offset message id '{id}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ipv4_message_id() {
        // 10.0.0.1:10911, commit log offset 1000
        let id = MessageId::decode("0A00000100002A9F00000000000003E8").unwrap();
        assert_eq!(id.store_host, "10.0.0.1:10911".parse().unwrap());
        assert_eq!(id.commit_log_offset, 1000);
    }

    #[test]
    fn test_encode_is_upper_case() {
        let id = MessageId {
            store_host: "10.0.0.1:10911".parse().unwrap(),
            commit_log_offset: 1000,
        };
        assert_eq!(id.encode(), "0A00000100002A9F00000000000003E8");
    }

    #[test]
    fn test_encode_matches_decode() {
        let id = MessageId {
            store_host: "[::1]:10911".parse().unwrap(),
            commit_log_offset: u64::MAX,
        };
        let encoded = id.encode();
        assert_eq!(encoded.len(), IPV6_ID_LEN * 2);
        assert_eq!(MessageId::decode(&encoded).unwrap(), id);
    }

    #[test]
    fn test_decode_lowercase_hex() {
        let id = MessageId::decode("0a00000100002a9f00000000000003e8").unwrap();
        assert_eq!(id.commit_log_offset, 1000);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        for bad in [
            "",
            "XYZ",
            "0A000001",
            "0A00000100002A9F00000000000003E",
            "ÄÄ",
            "+A00000100002A9F00000000000003E8",
            "0A00000100002A9F00000000000003-8",
        ] {
            assert!(
                matches!(MessageId::decode(bad), Err(ProxyError::ProtocolDecode { .. })),
                "{bad:?} should be rejected"
            );
        }
    }
}
