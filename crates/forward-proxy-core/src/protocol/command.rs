//! Remoting command: the unit exchanged with brokers.
//!
//! A command is a JSON header plus an opaque body. Request-specific header
//! fields travel in `extFields` as strings.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Request codes understood by brokers.
pub mod request_code {
    pub const SEND_MESSAGE: i32 = 10;
    pub const HEART_BEAT: i32 = 34;
    pub const CONSUMER_SEND_MSG_BACK: i32 = 36;
    pub const END_TRANSACTION: i32 = 37;
}

/// Response codes returned by brokers.
pub mod response_code {
    pub const SUCCESS: i32 = 0;
    pub const SYSTEM_ERROR: i32 = 1;
    pub const FLUSH_DISK_TIMEOUT: i32 = 10;
    pub const SLAVE_NOT_AVAILABLE: i32 = 11;
    pub const FLUSH_SLAVE_TIMEOUT: i32 = 12;
}

/// Bit 0 of `flag`: set on responses.
const RPC_TYPE_RESPONSE: i32 = 1;
/// Bit 1 of `flag`: set on one-way requests.
const RPC_ONEWAY: i32 = 1 << 1;

const LANGUAGE: &str = "RUST";
const PROTOCOL_VERSION: i32 = 453;

/// A remoting request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotingCommand {
    pub code: i32,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub opaque: i32,
    #[serde(default)]
    pub flag: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ext_fields: BTreeMap<String, String>,
    /// Payload carried after the header; not part of the JSON.
    #[serde(skip)]
    pub body: Bytes,
}

impl RemotingCommand {
    /// Create a request with the given code and header fields.
    #[must_use]
    pub fn request(code: i32, ext_fields: BTreeMap<String, String>) -> Self {
        Self {
            code,
            language: LANGUAGE.to_string(),
            version: PROTOCOL_VERSION,
            opaque: 0,
            flag: 0,
            remark: None,
            ext_fields,
            body: Bytes::new(),
        }
    }

    /// Create a response with the given code and optional remark.
    #[must_use]
    pub fn response(code: i32, remark: Option<String>) -> Self {
        Self {
            code,
            language: LANGUAGE.to_string(),
            version: PROTOCOL_VERSION,
            opaque: 0,
            flag: RPC_TYPE_RESPONSE,
            remark,
            ext_fields: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_ext_field(mut self, key: &str, value: impl ToString) -> Self {
        self.ext_fields.insert(key.to_string(), value.to_string());
        self
    }

    /// Mark the command as one-way; brokers send no response.
    pub fn mark_oneway(&mut self) {
        self.flag |= RPC_ONEWAY;
    }

    #[must_use]
    pub fn is_oneway(&self) -> bool {
        self.flag & RPC_ONEWAY == RPC_ONEWAY
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.flag & RPC_TYPE_RESPONSE == RPC_TYPE_RESPONSE
    }

    /// Remark, or an empty string when absent.
    #[must_use]
    pub fn remark_or_empty(&self) -> &str {
        self.remark.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_flags() {
        let mut cmd = RemotingCommand::request(request_code::END_TRANSACTION, BTreeMap::new());
        assert!(!cmd.is_response());
        assert!(!cmd.is_oneway());

        cmd.mark_oneway();
        assert!(cmd.is_oneway());
        assert!(!cmd.is_response());
    }

    #[test]
    fn test_header_json_field_names() {
        let cmd = RemotingCommand::request(request_code::SEND_MESSAGE, BTreeMap::new())
            .with_ext_field("topic", "orders");
        let json = serde_json::to_string(&cmd).unwrap();

        assert!(json.contains("\"extFields\":{\"topic\":\"orders\"}"));
        assert!(json.contains("\"code\":10"));
        assert!(!json.contains("remark"));
        assert!(!json.contains("body"));
    }
}
