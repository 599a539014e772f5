//! Tests for RedoConfig and sequence allocation

use std::sync::Arc;
use std::time::Duration;

use redolog::{AtomicSequence, ErrorKind, LogWriter, RedoConfig, SequenceAllocator};

use super::setup_temp_log;

#[test]
fn test_defaults() {
    let config = RedoConfig::default();

    assert_eq!(config.fsync_interval(), Some(Duration::from_millis(10)));
    assert!(config.server_id.is_none());
    assert_eq!(config.crash_recovery_lookback_secs, 0);
    assert!(config.validate().is_ok());
}

#[test]
fn test_zero_interval_disables_fsync_task() {
    let config = RedoConfig::builder().fsync_interval_ms(0).build();
    assert_eq!(config.fsync_interval(), None);
}

#[test]
fn test_empty_path_rejected() {
    let config = RedoConfig::builder().log_path("").build();
    let err = config.validate().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = LogWriter::new(&config, Arc::new(AtomicSequence::default())).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_empty_server_id_rejected() {
    let (_temp, path) = setup_temp_log();
    let config = RedoConfig::builder().log_path(&path).server_id("").build();
    assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Config);
}

#[test]
fn test_long_server_id_accepted() {
    let (_temp, path) = setup_temp_log();
    let config = RedoConfig::builder()
        .log_path(&path)
        .server_id("x".repeat(300))
        .build();
    assert!(config.validate().is_ok());
}

#[test]
fn test_atomic_sequence() {
    let sequence = AtomicSequence::starting_at(7);

    assert_eq!(sequence.peek(), 7);
    assert_eq!(sequence.next_sequence(), 7);
    assert_eq!(sequence.next_sequence(), 8);
    assert_eq!(sequence.peek(), 9);
    assert_eq!(AtomicSequence::default().peek(), 0);
}
