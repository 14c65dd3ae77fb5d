//! Integration tests for transactional sends and end-transaction requests.
//!
//! Tests that a prepared send hands the caller an opaque token and that the
//! token routes the end-transaction request back to the broker with the
//! broker's own coordinates.

use forward_proxy_core::protocol::{
    request_code, sysflag, CommandHeader, EndTransactionRequestHeader, Message,
    SendMessageRequestHeader, SendStatus,
};
use forward_proxy_core::testing::{responses, ForwardTestHarness};
use forward_proxy_core::{ProxyError, TransactionId, TransactionIdError};

/// Offset message id of 10.0.0.1:10911 at commit log offset 1000.
const STORE_MSG_ID: &str = "0A00000100002A9F00000000000003E8";

fn send_header(sys_flag: i32) -> SendMessageRequestHeader {
    SendMessageRequestHeader {
        producer_group: "PG_ORDERS".to_string(),
        topic: "orders".to_string(),
        default_topic: "TBW102".to_string(),
        default_topic_queue_nums: 4,
        queue_id: 1,
        sys_flag,
        born_timestamp: 1_700_000_000_000,
        ..Default::default()
    }
}

fn end_header(token: &str, commit_or_rollback: i32) -> EndTransactionRequestHeader {
    EndTransactionRequestHeader {
        producer_group: "PG_ORDERS".to_string(),
        tran_state_table_offset: 0,
        commit_log_offset: 0,
        commit_or_rollback,
        from_transaction_check: false,
        msg_id: "MSG-1".to_string(),
        transaction_id: Some(token.to_string()),
    }
}

#[tokio::test]
async fn test_prepared_send_then_commit() {
    let mut harness = ForwardTestHarness::new().await;
    harness
        .register_handler(
            request_code::SEND_MESSAGE,
            responses::send_ok(STORE_MSG_ID, 42, Some("broker-tx-7")),
        )
        .await;
    let address = harness.broker_address().to_string();

    let result = harness
        .producer
        .send_message(
            &address,
            "broker-a",
            &Message::new("orders", "payload"),
            &send_header(sysflag::TRANSACTION_PREPARED_TYPE),
            3_000,
        )
        .await
        .unwrap();

    assert_eq!(result.send_status, SendStatus::SendOk);
    assert_eq!(result.queue_offset, 42);
    let token = result.transaction_id.clone().unwrap();
    assert_ne!(token, "broker-tx-7");

    let decoded = TransactionId::decode(&token).unwrap();
    assert_eq!(decoded.broker_addr(), address);
    assert_eq!(decoded.tran_state_table_offset(), 42);
    assert_eq!(decoded.commit_log_offset(), 1000);
    assert_eq!(decoded.broker_transaction_id(), "broker-tx-7");

    harness
        .producer
        .end_transaction(
            &end_header(&token, sysflag::TRANSACTION_COMMIT_TYPE),
            3_000,
        )
        .await
        .unwrap();

    let calls = harness
        .wait_for_broker_calls(request_code::END_TRANSACTION, 1)
        .await;
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert!(call.oneway);
    assert_eq!(call.remark.as_deref(), Some("end transaction from rmq proxy"));

    let forwarded = EndTransactionRequestHeader::from_ext_fields(&call.ext_fields).unwrap();
    assert_eq!(forwarded.producer_group, "PG_ORDERS");
    assert_eq!(forwarded.msg_id, "MSG-1");
    assert_eq!(forwarded.tran_state_table_offset, 42);
    assert_eq!(forwarded.commit_log_offset, 1000);
    assert_eq!(forwarded.transaction_id.as_deref(), Some("broker-tx-7"));
    assert_eq!(forwarded.commit_or_rollback, sysflag::TRANSACTION_COMMIT_TYPE);
    assert!(!forwarded.from_transaction_check);

    assert_eq!(harness.metrics.transaction_ids_issued.get(), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_rollback_from_transaction_check() {
    let mut harness = ForwardTestHarness::new().await;
    let address = harness.broker_address().to_string();
    let token = TransactionId::new(address.as_str(), 7, 4096, "tx-9")
        .unwrap()
        .encode();

    let mut header = end_header(&token, sysflag::TRANSACTION_ROLLBACK_TYPE);
    header.from_transaction_check = true;
    harness.producer.end_transaction(&header, 3_000).await.unwrap();

    let calls = harness
        .wait_for_broker_calls(request_code::END_TRANSACTION, 1)
        .await;
    let forwarded = EndTransactionRequestHeader::from_ext_fields(&calls[0].ext_fields).unwrap();
    assert_eq!(forwarded.tran_state_table_offset, 7);
    assert_eq!(forwarded.commit_log_offset, 4096);
    assert_eq!(forwarded.commit_or_rollback, sysflag::TRANSACTION_ROLLBACK_TYPE);
    assert!(forwarded.from_transaction_check);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_end_transaction_with_leading_slash_address() {
    let mut harness = ForwardTestHarness::new().await;
    let token = TransactionId::new(format!("/{}", harness.broker_address()), 1, 2, "tx")
        .unwrap()
        .encode();

    harness
        .producer
        .end_transaction(&end_header(&token, sysflag::TRANSACTION_COMMIT_TYPE), 3_000)
        .await
        .unwrap();

    let calls = harness
        .wait_for_broker_calls(request_code::END_TRANSACTION, 1)
        .await;
    assert_eq!(calls.len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_malformed_token_never_reaches_broker() {
    let mut harness = ForwardTestHarness::new().await;

    for token in ["", "%%%", "AQ", "not-a-token"] {
        let result = harness
            .producer
            .end_transaction(&end_header(token, sysflag::TRANSACTION_COMMIT_TYPE), 3_000)
            .await;
        assert!(
            matches!(result, Err(ProxyError::MalformedTransactionId(_))),
            "token {token:?} should be rejected"
        );
    }

    assert!(harness.get_broker_calls().await.is_empty());
    assert_eq!(harness.producer.pool().created(), 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_token_version_is_rejected() {
    let harness = ForwardTestHarness::new().await;
    // Version byte 9 followed by nothing.
    let result = harness
        .producer
        .end_transaction(&end_header("CQ", sysflag::TRANSACTION_COMMIT_TYPE), 3_000)
        .await;

    assert!(matches!(
        result,
        Err(ProxyError::MalformedTransactionId(
            TransactionIdError::UnsupportedVersion(9)
        ))
    ));
}

#[tokio::test]
async fn test_plain_send_keeps_broker_transaction_id() {
    let mut harness = ForwardTestHarness::new().await;
    harness
        .register_handler(
            request_code::SEND_MESSAGE,
            responses::send_ok(STORE_MSG_ID, 5, Some("broker-tx-1")),
        )
        .await;
    let address = harness.broker_address().to_string();

    let result = harness
        .producer
        .send_message(
            &address,
            "broker-a",
            &Message::new("orders", "payload"),
            &send_header(sysflag::TRANSACTION_NOT_TYPE),
            3_000,
        )
        .await
        .unwrap();

    assert_eq!(result.transaction_id.as_deref(), Some("broker-tx-1"));
    assert_eq!(result.offset_msg_id, STORE_MSG_ID);
    assert_eq!(result.message_queue.queue_id, 1);
    assert_eq!(harness.metrics.transaction_ids_issued.get(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_prepared_send_with_unreadable_store_id() {
    let mut harness = ForwardTestHarness::new().await;
    harness
        .register_handler(
            request_code::SEND_MESSAGE,
            responses::send_ok("garbage", 11, None),
        )
        .await;
    let address = harness.broker_address().to_string();

    let result = harness
        .producer
        .send_message(
            &address,
            "broker-a",
            &Message::new("orders", "payload"),
            &send_header(sysflag::TRANSACTION_PREPARED_TYPE),
            3_000,
        )
        .await
        .unwrap();

    let decoded = TransactionId::decode(&result.transaction_id.unwrap()).unwrap();
    assert_eq!(decoded.tran_state_table_offset(), 11);
    assert_eq!(decoded.commit_log_offset(), 0);
    assert_eq!(decoded.broker_transaction_id(), "");

    harness.shutdown().await;
}
