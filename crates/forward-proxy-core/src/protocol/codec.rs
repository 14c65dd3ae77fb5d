//! Remoting protocol frame codec.
//!
//! Implements tokio's `Decoder` and `Encoder` traits for remoting frames:
//!
//! - 4 bytes: frame length (big-endian, excludes these 4 bytes)
//! - 4 bytes: serialize type (high byte) and header length (low 3 bytes)
//! - N bytes: JSON header
//! - M bytes: body

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProxyError;

use super::command::RemotingCommand;

/// Maximum frame size (16 MB by default).
const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Only JSON headers are supported.
const SERIALIZE_TYPE_JSON: u8 = 0;

const HEADER_LENGTH_MASK: u32 = 0x00FF_FFFF;

/// Codec for remoting frames.
#[derive(Debug, Clone)]
pub struct RemotingCodec {
    max_frame_size: usize,
}

impl RemotingCodec {
    /// Create a new codec with default max frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with custom max frame size.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for RemotingCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RemotingCodec {
    type Item = RemotingCommand;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(ProxyError::ProtocolDecode {
                message: format!(
                    "frame size {length} exceeds maximum {}",
                    self.max_frame_size
                ),
            });
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut frame = src.split_to(length);

        if frame.len() < 4 {
            return Err(ProxyError::ProtocolDecode {
                message: "frame too small for header length".to_string(),
            });
        }

        let header_word = frame.get_u32();
        let serialize_type = (header_word >> 24) as u8;
        let header_len = (header_word & HEADER_LENGTH_MASK) as usize;

        if serialize_type != SERIALIZE_TYPE_JSON {
            return Err(ProxyError::ProtocolDecode {
                message: format!("unsupported serialize type {serialize_type}"),
            });
        }

        if header_len > frame.len() {
            return Err(ProxyError::ProtocolDecode {
                message: format!(
                    "header length {header_len} exceeds frame body {}",
                    frame.len()
                ),
            });
        }

        let header = frame.split_to(header_len);
        let mut command: RemotingCommand =
            serde_json::from_slice(&header).map_err(|e| ProxyError::ProtocolDecode {
                message: format!("invalid command header: {e}"),
            })?;
        command.body = frame.freeze();

        Ok(Some(command))
    }
}

impl Encoder<RemotingCommand> for RemotingCodec {
    type Error = ProxyError;

    fn encode(&mut self, item: RemotingCommand, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = serde_json::to_vec(&item).map_err(|e| ProxyError::ProtocolEncode {
            message: format!("failed to encode command header: {e}"),
        })?;

        if header.len() as u32 > HEADER_LENGTH_MASK {
            return Err(ProxyError::ProtocolEncode {
                message: format!("command header too large: {} bytes", header.len()),
            });
        }

        let length = 4 + header.len() + item.body.len();
        if length > self.max_frame_size {
            return Err(ProxyError::ProtocolEncode {
                message: format!(
                    "frame size {length} exceeds maximum {}",
                    self.max_frame_size
                ),
            });
        }

        dst.reserve(4 + length);
        dst.put_u32(length as u32);
        dst.put_u32((u32::from(SERIALIZE_TYPE_JSON) << 24) | header.len() as u32);
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&item.body);

        Ok(())
    }
}
