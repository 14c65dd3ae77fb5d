//! Request headers and data records exchanged with brokers.
//!
//! Headers are flattened into a command's `extFields` map using the
//! broker's camelCase field names. Records are plain data; the only field
//! this crate ever rewrites is [`SendResult::transaction_id`].

use std::collections::BTreeMap;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};

use super::command::response_code;

/// Message property holding the client-generated unique message id.
pub const PROPERTY_UNIQ_CLIENT_MESSAGE_ID_KEYIDX: &str = "UNIQ_KEY";

const NAME_VALUE_SEPARATOR: char = '\u{1}';
const PROPERTY_SEPARATOR: char = '\u{2}';

/// Conversion between a typed header and `extFields`.
pub trait CommandHeader: Sized {
    fn to_ext_fields(&self) -> BTreeMap<String, String>;

    /// # Errors
    ///
    /// Returns [`ProxyError::ProtocolDecode`] when a required field is
    /// missing or a field does not parse.
    fn from_ext_fields(fields: &BTreeMap<String, String>) -> Result<Self>;
}

fn required<'a>(fields: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ProxyError::ProtocolDecode {
            message: format!("missing header field '{key}'"),
        })
}

fn parse_required<T: FromStr>(fields: &BTreeMap<String, String>, key: &str) -> Result<T> {
    let raw = required(fields, key)?;
    raw.parse().map_err(|_| ProxyError::ProtocolDecode {
        message: format!("invalid value '{raw}' for header field '{key}'"),
    })
}

fn parse_optional<T: FromStr>(fields: &BTreeMap<String, String>, key: &str) -> Result<Option<T>> {
    match fields.get(key) {
        Some(_) => parse_required(fields, key).map(Some),
        None => Ok(None),
    }
}

fn insert_opt<T: ToString>(fields: &mut BTreeMap<String, String>, key: &str, value: Option<&T>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), value.to_string());
    }
}

/// A message as handed to the proxy by a producer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub flag: i32,
    pub properties: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Message {
    #[must_use]
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    /// Client-generated unique id, if the producer set one.
    #[must_use]
    pub fn uniq_key(&self) -> Option<&str> {
        self.properties
            .get(PROPERTY_UNIQ_CLIENT_MESSAGE_ID_KEYIDX)
            .map(String::as_str)
    }

    /// Serialize properties in the broker's `name\x01value\x02` form.
    #[must_use]
    pub fn properties_string(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.properties {
            out.push_str(name);
            out.push(NAME_VALUE_SEPARATOR);
            out.push_str(value);
            out.push(PROPERTY_SEPARATOR);
        }
        out
    }

    /// Parse properties from the broker's `name\x01value\x02` form.
    #[must_use]
    pub fn parse_properties(raw: &str) -> BTreeMap<String, String> {
        raw.split(PROPERTY_SEPARATOR)
            .filter_map(|pair| pair.split_once(NAME_VALUE_SEPARATOR))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}

/// Header of a send-message request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMessageRequestHeader {
    pub producer_group: String,
    pub topic: String,
    pub default_topic: String,
    pub default_topic_queue_nums: i32,
    pub queue_id: i32,
    pub sys_flag: i32,
    pub born_timestamp: i64,
    pub flag: i32,
    pub properties: Option<String>,
    pub reconsume_times: Option<i32>,
    pub unit_mode: bool,
    pub batch: bool,
    pub max_reconsume_times: Option<i32>,
    pub broker_name: Option<String>,
}

impl CommandHeader for SendMessageRequestHeader {
    fn to_ext_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("producerGroup".to_string(), self.producer_group.clone());
        fields.insert("topic".to_string(), self.topic.clone());
        fields.insert("defaultTopic".to_string(), self.default_topic.clone());
        fields.insert(
            "defaultTopicQueueNums".to_string(),
            self.default_topic_queue_nums.to_string(),
        );
        fields.insert("queueId".to_string(), self.queue_id.to_string());
        fields.insert("sysFlag".to_string(), self.sys_flag.to_string());
        fields.insert("bornTimestamp".to_string(), self.born_timestamp.to_string());
        fields.insert("flag".to_string(), self.flag.to_string());
        insert_opt(&mut fields, "properties", self.properties.as_ref());
        insert_opt(&mut fields, "reconsumeTimes", self.reconsume_times.as_ref());
        fields.insert("unitMode".to_string(), self.unit_mode.to_string());
        fields.insert("batch".to_string(), self.batch.to_string());
        insert_opt(
            &mut fields,
            "maxReconsumeTimes",
            self.max_reconsume_times.as_ref(),
        );
        insert_opt(&mut fields, "brokerName", self.broker_name.as_ref());
        fields
    }

    fn from_ext_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            producer_group: required(fields, "producerGroup")?.to_string(),
            topic: required(fields, "topic")?.to_string(),
            default_topic: required(fields, "defaultTopic")?.to_string(),
            default_topic_queue_nums: parse_required(fields, "defaultTopicQueueNums")?,
            queue_id: parse_required(fields, "queueId")?,
            sys_flag: parse_required(fields, "sysFlag")?,
            born_timestamp: parse_required(fields, "bornTimestamp")?,
            flag: parse_required(fields, "flag")?,
            properties: fields.get("properties").cloned(),
            reconsume_times: parse_optional(fields, "reconsumeTimes")?,
            unit_mode: parse_optional(fields, "unitMode")?.unwrap_or(false),
            batch: parse_optional(fields, "batch")?.unwrap_or(false),
            max_reconsume_times: parse_optional(fields, "maxReconsumeTimes")?,
            broker_name: fields.get("brokerName").cloned(),
        })
    }
}

/// Outcome of a successful store on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    SendOk,
    FlushDiskTimeout,
    FlushSlaveTimeout,
    SlaveNotAvailable,
}

impl SendStatus {
    /// Map a send response code; `None` for codes that are failures.
    #[must_use]
    pub fn from_response_code(code: i32) -> Option<Self> {
        match code {
            response_code::SUCCESS => Some(Self::SendOk),
            response_code::FLUSH_DISK_TIMEOUT => Some(Self::FlushDiskTimeout),
            response_code::FLUSH_SLAVE_TIMEOUT => Some(Self::FlushSlaveTimeout),
            response_code::SLAVE_NOT_AVAILABLE => Some(Self::SlaveNotAvailable),
            _ => None,
        }
    }
}

/// Queue a message was stored in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageQueue {
    pub topic: String,
    pub broker_name: String,
    pub queue_id: i32,
}

/// Result of a send as returned to the proxy's caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub send_status: SendStatus,
    /// Client-generated unique id of the message.
    pub msg_id: Option<String>,
    /// Broker-generated id encoding the store host and commit log offset.
    pub offset_msg_id: String,
    pub message_queue: MessageQueue,
    pub queue_offset: u64,
    pub transaction_id: Option<String>,
}

impl SendResult {
    /// Build a result from a send response's header fields.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ProtocolDecode`] if the response lacks the
    /// fields a stored message always carries.
    pub fn from_response(
        status: SendStatus,
        response_fields: &BTreeMap<String, String>,
        topic: &str,
        broker_name: &str,
        msg_id: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            send_status: status,
            msg_id,
            offset_msg_id: required(response_fields, "msgId")?.to_string(),
            message_queue: MessageQueue {
                topic: topic.to_string(),
                broker_name: broker_name.to_string(),
                queue_id: parse_required(response_fields, "queueId")?,
            },
            queue_offset: parse_required(response_fields, "queueOffset")?,
            transaction_id: response_fields.get("transactionId").cloned(),
        })
    }
}

/// Producer group registered through a heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerData {
    pub group_name: String,
}

/// Topic subscription registered through a heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionData {
    pub topic: String,
    pub sub_string: String,
}

/// Consumer group registered through a heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerData {
    pub group_name: String,
    pub consume_type: String,
    pub message_model: String,
    pub consume_from_where: String,
    #[serde(default)]
    pub subscription_data_set: Vec<SubscriptionData>,
    #[serde(default)]
    pub unit_mode: bool,
}

/// Heartbeat body; sent as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatData {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(default)]
    pub producer_data_set: Vec<ProducerData>,
    #[serde(default)]
    pub consumer_data_set: Vec<ConsumerData>,
}

impl HeartbeatData {
    /// # Errors
    ///
    /// Returns [`ProxyError::ProtocolEncode`] if serialization fails.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| ProxyError::ProtocolEncode {
                message: format!("failed to encode heartbeat: {e}"),
            })
    }

    /// # Errors
    ///
    /// Returns [`ProxyError::ProtocolDecode`] if the body is not a heartbeat.
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| ProxyError::ProtocolDecode {
            message: format!("failed to decode heartbeat: {e}"),
        })
    }
}

/// Header of an end-transaction request.
///
/// On the way in, `transaction_id` holds the proxy-issued token; on the way
/// out it holds the broker's own transaction id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndTransactionRequestHeader {
    pub producer_group: String,
    pub tran_state_table_offset: u64,
    pub commit_log_offset: u64,
    pub commit_or_rollback: i32,
    pub from_transaction_check: bool,
    pub msg_id: String,
    pub transaction_id: Option<String>,
}

impl CommandHeader for EndTransactionRequestHeader {
    fn to_ext_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("producerGroup".to_string(), self.producer_group.clone());
        fields.insert(
            "tranStateTableOffset".to_string(),
            self.tran_state_table_offset.to_string(),
        );
        fields.insert(
            "commitLogOffset".to_string(),
            self.commit_log_offset.to_string(),
        );
        fields.insert(
            "commitOrRollback".to_string(),
            self.commit_or_rollback.to_string(),
        );
        fields.insert(
            "fromTransactionCheck".to_string(),
            self.from_transaction_check.to_string(),
        );
        fields.insert("msgId".to_string(), self.msg_id.clone());
        insert_opt(&mut fields, "transactionId", self.transaction_id.as_ref());
        fields
    }

    fn from_ext_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            producer_group: required(fields, "producerGroup")?.to_string(),
            tran_state_table_offset: parse_required(fields, "tranStateTableOffset")?,
            commit_log_offset: parse_required(fields, "commitLogOffset")?,
            commit_or_rollback: parse_required(fields, "commitOrRollback")?,
            from_transaction_check: parse_optional(fields, "fromTransactionCheck")?
                .unwrap_or(false),
            msg_id: required(fields, "msgId")?.to_string(),
            transaction_id: fields.get("transactionId").cloned(),
        })
    }
}

/// Header of a consumer send-back (retry) request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerSendMsgBackRequestHeader {
    pub offset: i64,
    pub group: String,
    pub delay_level: i32,
    pub origin_msg_id: Option<String>,
    pub origin_topic: Option<String>,
    pub unit_mode: bool,
    pub max_reconsume_times: Option<i32>,
}

impl CommandHeader for ConsumerSendMsgBackRequestHeader {
    fn to_ext_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("offset".to_string(), self.offset.to_string());
        fields.insert("group".to_string(), self.group.clone());
        fields.insert("delayLevel".to_string(), self.delay_level.to_string());
        insert_opt(&mut fields, "originMsgId", self.origin_msg_id.as_ref());
        insert_opt(&mut fields, "originTopic", self.origin_topic.as_ref());
        fields.insert("unitMode".to_string(), self.unit_mode.to_string());
        insert_opt(
            &mut fields,
            "maxReconsumeTimes",
            self.max_reconsume_times.as_ref(),
        );
        fields
    }

    fn from_ext_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            offset: parse_required(fields, "offset")?,
            group: required(fields, "group")?.to_string(),
            delay_level: parse_required(fields, "delayLevel")?,
            origin_msg_id: fields.get("originMsgId").cloned(),
            origin_topic: fields.get("originTopic").cloned(),
            unit_mode: parse_optional(fields, "unitMode")?.unwrap_or(false),
            max_reconsume_times: parse_optional(fields, "maxReconsumeTimes")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sysflag;

    #[test]
    fn test_message_properties_string() {
        let mut msg = Message::new("orders", &b"body"[..]);
        msg.properties
            .insert(PROPERTY_UNIQ_CLIENT_MESSAGE_ID_KEYIDX.to_string(), "U1".to_string());
        msg.properties.insert("TAGS".to_string(), "a".to_string());

        let raw = msg.properties_string();
        assert_eq!(raw, "TAGS\u{1}a\u{2}UNIQ_KEY\u{1}U1\u{2}");
        assert_eq!(Message::parse_properties(&raw), msg.properties);
        assert_eq!(msg.uniq_key(), Some("U1"));
    }

    #[test]
    fn test_send_status_from_code() {
        assert_eq!(
            SendStatus::from_response_code(response_code::SUCCESS),
            Some(SendStatus::SendOk)
        );
        assert_eq!(
            SendStatus::from_response_code(response_code::FLUSH_SLAVE_TIMEOUT),
            Some(SendStatus::FlushSlaveTimeout)
        );
        assert_eq!(
            SendStatus::from_response_code(response_code::SYSTEM_ERROR),
            None
        );
    }

    #[test]
    fn test_send_result_from_response() {
        let mut fields = BTreeMap::new();
        fields.insert("msgId".to_string(), "0A00000100002A9F00000000000003E8".to_string());
        fields.insert("queueId".to_string(), "3".to_string());
        fields.insert("queueOffset".to_string(), "42".to_string());
        fields.insert("transactionId".to_string(), "broker-tx".to_string());

        let result =
            SendResult::from_response(SendStatus::SendOk, &fields, "orders", "broker-a", None)
                .unwrap();
        assert_eq!(result.message_queue.queue_id, 3);
        assert_eq!(result.message_queue.broker_name, "broker-a");
        assert_eq!(result.queue_offset, 42);
        assert_eq!(result.transaction_id.as_deref(), Some("broker-tx"));
    }

    #[test]
    fn test_send_result_missing_offset() {
        let mut fields = BTreeMap::new();
        fields.insert("msgId".to_string(), "x".to_string());
        fields.insert("queueId".to_string(), "0".to_string());

        let result =
            SendResult::from_response(SendStatus::SendOk, &fields, "orders", "broker-a", None);
        assert!(matches!(result, Err(ProxyError::ProtocolDecode { .. })));
    }

    #[test]
    fn test_end_transaction_header_fields() {
        let header = EndTransactionRequestHeader {
            producer_group: "pg".to_string(),
            tran_state_table_offset: 42,
            commit_log_offset: 1000,
            commit_or_rollback: sysflag::TRANSACTION_COMMIT_TYPE,
            from_transaction_check: true,
            msg_id: "m1".to_string(),
            transaction_id: Some("abc".to_string()),
        };
        let fields = header.to_ext_fields();

        assert_eq!(fields["tranStateTableOffset"], "42");
        assert_eq!(fields["commitLogOffset"], "1000");
        assert_eq!(fields["commitOrRollback"], "8");
        assert_eq!(fields["fromTransactionCheck"], "true");
        assert_eq!(
            EndTransactionRequestHeader::from_ext_fields(&fields).unwrap(),
            header
        );
    }

    #[test]
    fn test_end_transaction_header_invalid_offset() {
        let mut fields = EndTransactionRequestHeader::default().to_ext_fields();
        fields.insert("commitLogOffset".to_string(), "-1".to_string());

        assert!(EndTransactionRequestHeader::from_ext_fields(&fields).is_err());
    }

    #[test]
    fn test_send_back_header_optional_fields() {
        let header = ConsumerSendMsgBackRequestHeader {
            offset: 7,
            group: "cg".to_string(),
            delay_level: 3,
            ..Default::default()
        };
        let fields = header.to_ext_fields();

        assert!(!fields.contains_key("originMsgId"));
        assert!(!fields.contains_key("maxReconsumeTimes"));
        assert_eq!(
            ConsumerSendMsgBackRequestHeader::from_ext_fields(&fields).unwrap(),
            header
        );
    }

    #[test]
    fn test_heartbeat_json_names() {
        let data = HeartbeatData {
            client_id: "proxy@1".to_string(),
            producer_data_set: vec![ProducerData {
                group_name: "pg".to_string(),
            }],
            consumer_data_set: vec![],
        };
        let body = data.encode().unwrap();
        let json = std::str::from_utf8(&body).unwrap();

        assert!(json.contains("\"clientID\":\"proxy@1\""));
        assert!(json.contains("\"producerDataSet\":[{\"groupName\":\"pg\"}]"));
        assert_eq!(HeartbeatData::decode(&body).unwrap(), data);
    }
}
