//! Tests for entry types
//!
//! These tests verify:
//! - Transaction id ordering and display
//! - Op kind classification
//! - Checkpoint payloads

use redolog::wal::{OpKind, FRAME_OVERHEAD};
use redolog::{ErrorKind, LoggedOp, RedoableOp, TransactionId};

use super::change;

#[test]
fn test_frame_overhead() {
    // start 4, code 4, txn 8, timestamp 8, length 4, crc 4, end 4
    assert_eq!(FRAME_OVERHEAD, 36);
}

#[test]
fn test_transaction_id_display_and_order() {
    let a = TransactionId::new(3, 1);
    let b = TransactionId::new(3, 2);
    let c = TransactionId::new(4, 0);

    assert_eq!(a.to_string(), "3-1");
    assert!(a < b && b < c);
}

#[test]
fn test_op_kind_from_code() {
    assert_eq!(OpKind::from_code(OpKind::COMMIT_CODE), OpKind::Commit);
    assert_eq!(OpKind::from_code(OpKind::ABORT_CODE), OpKind::Abort);
    assert_eq!(OpKind::from_code(OpKind::CHECKPOINT_CODE), OpKind::Checkpoint);
    assert_eq!(OpKind::from_code(0), OpKind::Change);
    assert_eq!(OpKind::from_code(100), OpKind::Change);
}

#[test]
fn test_commit_and_abort_records() {
    let txn = TransactionId::new(9, 4);

    let commit = LoggedOp::commit(txn);
    assert_eq!(commit.kind(), OpKind::Commit);
    assert_eq!(commit.transaction_id(), txn);
    assert!(commit.payload.is_empty());
    assert!(commit.timestamp > 0);

    let abort = LoggedOp::abort(txn);
    assert_eq!(abort.kind(), OpKind::Abort);
    assert_eq!(abort.transaction_id(), txn);
}

#[test]
fn test_checkpoint_lists_active_transactions() {
    let active = vec![TransactionId::new(1, 1), TransactionId::new(2, 7)];
    let checkpoint = LoggedOp::checkpoint(&active).unwrap();

    assert_eq!(checkpoint.kind(), OpKind::Checkpoint);
    assert_eq!(checkpoint.transaction_id(), TransactionId::NONE);
    assert_eq!(checkpoint.active_txns().unwrap(), active);
}

#[test]
fn test_active_txns_on_change_fails() {
    let err = change(1, 1, b"body").active_txns().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_logged_op_payload_is_its_encoding() {
    let op = change(5, 5, b"message body");
    assert_eq!(op.encode_payload().unwrap(), b"message body".to_vec());
}
