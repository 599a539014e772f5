//! Tests for RedoPlayer
//!
//! These tests verify:
//! - Uncommitted change tracking across commit, abort and checkpoint records
//! - Orphan commit/abort detection
//! - Junk truncation only for writable scans
//! - The commit look-back cut-off
//! - Crash recovery replays, then records the outcome of every redo
//! - Playback of committed changes across archived and active logs

use std::fs;
use std::path::{Path, PathBuf};

use redolog::wal::{PlaybackWindow, ScanOptions, FRAME_OVERHEAD, HEADER_LEN};
use redolog::{ErrorKind, LoggedOp, RedoConfig, RedoError, RedoPlayer, TransactionId};

use super::{append_bytes, change, config_for, setup_temp_log, writer_at};

fn txn(major: u32, minor: u32) -> TransactionId {
    TransactionId::new(major, minor)
}

fn end_record(code: u32, id: TransactionId, timestamp: i64) -> LoggedOp {
    LoggedOp::new(id, code, timestamp, Vec::new())
}

/// Write `ops` through a fresh writer and close it
fn write_log(path: &std::path::Path, ops: &[LoggedOp]) {
    let writer = writer_at(path, 1);
    writer.open().unwrap();
    for op in ops {
        writer.log_op(op, false).unwrap();
    }
    writer.close().unwrap();
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_scan_finds_uncommitted_changes() {
    let (_temp, path) = setup_temp_log();
    write_log(
        &path,
        &[
            change(1, 1, b"committed"),
            change(1, 2, b"aborted"),
            change(1, 3, b"pending"),
            LoggedOp::commit(txn(1, 1)),
            change(1, 4, b"also pending"),
            LoggedOp::abort(txn(1, 2)),
        ],
    );

    let result = RedoPlayer::verify(&path).unwrap();

    assert_eq!(result.ops_read, 6);
    assert_eq!(result.committed, 1);
    assert_eq!(result.aborted, 1);
    assert_eq!(result.orphans, 0);

    let pending: Vec<_> = result.uncommitted.iter().map(|op| op.txn_id).collect();
    assert_eq!(pending, vec![txn(1, 3), txn(1, 4)]);
    assert_eq!(&result.uncommitted[0].payload[..], b"pending");
}

#[test]
fn test_scan_empty_log() {
    let (_temp, path) = setup_temp_log();
    write_log(&path, &[]);

    let result = RedoPlayer::verify(&path).unwrap();

    assert_eq!(result.ops_read, 0);
    assert!(result.uncommitted.is_empty());
    assert_eq!(result.last_position, HEADER_LEN as u64);
    assert_eq!(result.junk_bytes, 0);
}

#[test]
fn test_scan_counts_orphans() {
    let (_temp, path) = setup_temp_log();
    write_log(
        &path,
        &[
            LoggedOp::commit(txn(7, 1)),
            LoggedOp::abort(txn(7, 2)),
            change(7, 3, b"x"),
            LoggedOp::commit(txn(7, 3)),
        ],
    );

    let result = RedoPlayer::verify(&path).unwrap();

    assert_eq!(result.orphans, 2);
    assert_eq!(result.committed, 1);
    assert!(result.uncommitted.is_empty());
}

#[test]
fn test_change_after_orphan_commit_is_flagged() {
    let (_temp, path) = setup_temp_log();
    write_log(
        &path,
        &[
            LoggedOp::commit(txn(7, 1)),
            change(7, 2, b"in order"),
            change(7, 1, b"late"),
            LoggedOp::commit(txn(7, 2)),
        ],
    );

    let result = RedoPlayer::verify(&path).unwrap();

    assert_eq!(result.orphans, 1);
    assert_eq!(result.late_changes, 1);
    assert_eq!(result.committed, 1);
    let pending: Vec<_> = result.uncommitted.iter().map(|op| op.txn_id).collect();
    assert_eq!(pending, vec![txn(7, 1)]);
}

#[test]
fn test_scan_counts_checkpoints() {
    let (_temp, path) = setup_temp_log();
    write_log(
        &path,
        &[
            change(2, 1, b"a"),
            LoggedOp::checkpoint(&[txn(2, 1)]).unwrap(),
            LoggedOp::commit(txn(2, 1)),
            LoggedOp::checkpoint(&[txn(9, 9)]).unwrap(),
        ],
    );

    let result = RedoPlayer::verify(&path).unwrap();

    assert_eq!(result.checkpoints, 2);
    assert_eq!(result.committed, 1);
    assert!(result.uncommitted.is_empty());
}

#[test]
fn test_later_change_replaces_earlier_for_same_txn() {
    let (_temp, path) = setup_temp_log();
    write_log(&path, &[change(3, 1, b"old"), change(3, 2, b"other"), change(3, 1, b"new")]);

    let result = RedoPlayer::verify(&path).unwrap();

    assert_eq!(result.uncommitted.len(), 2);
    assert_eq!(result.uncommitted[0].txn_id, txn(3, 1));
    assert_eq!(&result.uncommitted[0].payload[..], b"new");
}

// =============================================================================
// Junk Handling Tests
// =============================================================================

#[test]
fn test_verify_reports_junk_without_truncating() {
    let (_temp, path) = setup_temp_log();
    write_log(&path, &[change(1, 1, b"a")]);
    append_bytes(&path, b"RDO{torn");
    let len_before = fs::metadata(&path).unwrap().len();

    let result = RedoPlayer::verify(&path).unwrap();

    assert_eq!(result.junk_bytes, 8);
    assert!(!result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
}

#[test]
fn test_writable_scan_truncates_junk() {
    let (_temp, path) = setup_temp_log();
    write_log(&path, &[change(1, 1, b"a"), change(1, 2, b"b")]);
    append_bytes(&path, &[0xAB; 50]);

    let options = ScanOptions {
        writable: true,
        ..Default::default()
    };
    let result = RedoPlayer::scan(&path, &options).unwrap();

    let expected_end = HEADER_LEN as u64 + 2 * (FRAME_OVERHEAD as u64 + 1);
    assert_eq!(result.last_position, expected_end);
    assert_eq!(result.junk_bytes, 50);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), expected_end);

    let again = RedoPlayer::verify(&path).unwrap();
    assert_eq!(again.junk_bytes, 0);
    assert_eq!(again.uncommitted.len(), 2);
}

#[test]
fn test_skipped_garbage_is_reported() {
    let (_temp, path) = setup_temp_log();
    write_log(&path, &[change(1, 1, b"a")]);
    append_bytes(&path, &[0x00; 13]);
    write_log(&path, &[change(1, 2, b"b")]);

    let result = RedoPlayer::verify(&path).unwrap();

    assert_eq!(result.ops_read, 2);
    assert_eq!(result.skipped_bytes, 13);
    assert_eq!(result.junk_bytes, 0);
}

// =============================================================================
// Look-Back Tests
// =============================================================================

#[test]
fn test_commits_after_cutoff_are_ignored() {
    let (_temp, path) = setup_temp_log();
    write_log(
        &path,
        &[
            change(4, 1, b"early"),
            change(4, 2, b"late"),
            end_record(1, txn(4, 1), 2_000),
            end_record(1, txn(4, 2), 9_000),
            change(4, 3, b"aborted late"),
            end_record(2, txn(4, 3), 9_500),
        ],
    );

    let options = ScanOptions {
        ignore_commits_at_or_after: 5_000,
        ..Default::default()
    };
    let result = RedoPlayer::scan(&path, &options).unwrap();

    assert_eq!(result.committed, 1);
    assert_eq!(result.aborted, 1);
    let pending: Vec<_> = result.uncommitted.iter().map(|op| op.txn_id).collect();
    assert_eq!(pending, vec![txn(4, 2)]);
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[test]
fn test_crash_recovery_redoes_uncommitted() {
    let (_temp, path) = setup_temp_log();

    // simulate a crash: no close, torn trailing bytes
    {
        let writer = writer_at(&path, 1);
        writer.open().unwrap();
        writer.log_op(&change(5, 1, b"one"), true).unwrap();
        writer.log_op(&change(5, 2, b"two"), true).unwrap();
        writer.log_op(&LoggedOp::commit(txn(5, 1)), true).unwrap();
        writer.log_op(&change(5, 3, b"three"), true).unwrap();
        std::mem::forget(writer);
    }
    append_bytes(&path, b"RDO{\x05\x00");

    let config = config_for(&path);
    let writer = writer_at(&path, 2);
    writer.open().unwrap();

    let mut seen = Vec::new();
    let redone = RedoPlayer::run_crash_recovery(&writer, &config, |op| {
        seen.push(op.txn_id);
        if op.txn_id == txn(5, 3) {
            return Err(RedoError::Format("mailbox is gone".to_string()));
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(redone, 2);
    assert_eq!(seen, vec![txn(5, 2), txn(5, 3)]);
    assert!(writer.is_open());
    writer.close().unwrap();

    let after = RedoPlayer::verify(&path).unwrap();
    assert!(after.uncommitted.is_empty());
    assert_eq!(after.committed, 2);
    assert_eq!(after.aborted, 1);
    assert_eq!(after.skipped_bytes, 0);
    assert_eq!(after.junk_bytes, 0);
}

#[test]
fn test_crash_recovery_nothing_to_redo() {
    let (_temp, path) = setup_temp_log();
    write_log(&path, &[change(1, 1, b"a"), LoggedOp::commit(txn(1, 1))]);

    let writer = writer_at(&path, 2);
    writer.open().unwrap();
    let redone = RedoPlayer::run_crash_recovery(&writer, &config_for(&path), |_| {
        panic!("nothing should be redone")
    })
    .unwrap();

    assert_eq!(redone, 0);
    assert!(writer.is_open());
}

#[test]
fn test_crash_recovery_missing_log() {
    let (_temp, path) = setup_temp_log();
    let writer = writer_at(&path, 1);

    let redone = RedoPlayer::run_crash_recovery(&writer, &RedoConfig::default(), |_| Ok(())).unwrap();

    assert_eq!(redone, 0);
    assert!(!path.exists());
}

// =============================================================================
// Playback Tests
// =============================================================================

fn stamped(major: u32, minor: u32, timestamp: i64) -> LoggedOp {
    LoggedOp::new(txn(major, minor), 100, timestamp, format!("{}-{}", major, minor).into_bytes())
}

/// Two logs: sequence 1 archived, sequence 2 active and closed
///
/// 1-1 and 1-2 commit in the first log; 1-2 commits in the second log;
/// 1-3 aborts; 1-4 commits late; 1-5 never commits.
fn write_two_logs(dir: &Path, path: &Path) -> (PathBuf, PathBuf) {
    let archive_dir = dir.join("archive");
    let writer = writer_at(path, 1);
    writer.open().unwrap();
    for op in [
        stamped(1, 1, 100),
        end_record(1, txn(1, 1), 150),
        stamped(1, 2, 200),
        stamped(1, 3, 300),
        end_record(2, txn(1, 3), 310),
    ] {
        writer.log_op(&op, false).unwrap();
    }
    let archived = writer.rollover(&archive_dir).unwrap();
    for op in [
        end_record(1, txn(1, 2), 400),
        stamped(1, 4, 500),
        stamped(1, 5, 600),
        end_record(1, txn(1, 4), 900),
    ] {
        writer.log_op(&op, false).unwrap();
    }
    writer.close().unwrap();
    (archive_dir, archived)
}

fn replay(paths: &[PathBuf], window: &PlaybackWindow) -> (Vec<TransactionId>, redolog::wal::PlaybackResult) {
    let mut seen = Vec::new();
    let result = RedoPlayer::playback(paths, window, |op| {
        seen.push(op.txn_id);
        Ok(())
    })
    .unwrap();
    (seen, result)
}

#[test]
fn test_playback_replays_committed_in_log_order() {
    let (temp, path) = setup_temp_log();
    let (archive_dir, archived) = write_two_logs(temp.path(), &path);

    let logs = RedoPlayer::select_logs(&archive_dir, &path, &PlaybackWindow::default()).unwrap();
    assert_eq!(logs, vec![archived, path.clone()]);

    let (seen, result) = replay(&logs, &PlaybackWindow::default());

    assert_eq!(seen, vec![txn(1, 1), txn(1, 2), txn(1, 4)]);
    assert_eq!(result.files, 2);
    assert_eq!(result.ops_read, 9);
    assert_eq!(result.replayed, 3);
    assert_eq!(result.outside_window, 0);
}

#[test]
fn test_playback_time_window() {
    let (temp, path) = setup_temp_log();
    let (archive_dir, _) = write_two_logs(temp.path(), &path);
    let window = PlaybackWindow {
        from_time: 150,
        to_time: 800,
        ..Default::default()
    };

    let logs = RedoPlayer::select_logs(&archive_dir, &path, &window).unwrap();
    let (seen, result) = replay(&logs, &window);

    // 1-1 changed before the window, 1-4 committed after it
    assert_eq!(seen, vec![txn(1, 2)]);
    assert_eq!(result.outside_window, 2);
}

#[test]
fn test_select_logs_by_sequence_and_time() {
    let (temp, path) = setup_temp_log();
    let (archive_dir, archived) = write_two_logs(temp.path(), &path);

    let only_archived = PlaybackWindow {
        to_sequence: 1,
        ..Default::default()
    };
    assert_eq!(
        RedoPlayer::select_logs(&archive_dir, &path, &only_archived).unwrap(),
        vec![archived]
    );

    // the archived log's last op (310) is before the window
    let recent = PlaybackWindow {
        from_time: 350,
        ..Default::default()
    };
    assert_eq!(
        RedoPlayer::select_logs(&archive_dir, &path, &recent).unwrap(),
        vec![path.clone()]
    );

    let missing = temp.path().join("nowhere");
    assert!(RedoPlayer::select_logs(&missing, &missing.join("redo.log"), &PlaybackWindow::default())
        .unwrap()
        .is_empty());
}

#[test]
fn test_playback_of_later_log_skips_orphan_commits() {
    let (temp, path) = setup_temp_log();
    write_two_logs(temp.path(), &path);

    let (seen, result) = replay(&[path.clone()], &PlaybackWindow::default());

    assert_eq!(seen, vec![txn(1, 4)]);
    assert_eq!(result.replayed, 1);
}

#[test]
fn test_playback_redo_errors() {
    let (temp, path) = setup_temp_log();
    let (_, archived) = write_two_logs(temp.path(), &path);
    let logs = vec![archived, path.clone()];
    let fail_on_1_2 = |op: &LoggedOp| {
        if op.txn_id == txn(1, 2) {
            return Err(RedoError::Format("mailbox is gone".to_string()));
        }
        Ok(())
    };

    let result = RedoPlayer::playback(&logs, &PlaybackWindow::default(), fail_on_1_2).unwrap();
    assert_eq!(result.replayed, 2);
    assert_eq!(result.failed, 1);

    let strict = PlaybackWindow {
        stop_on_error: true,
        ..Default::default()
    };
    let err = RedoPlayer::playback(&logs, &strict, fail_on_1_2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_playback_unreadable_log() {
    let (temp, path) = setup_temp_log();
    write_two_logs(temp.path(), &path);
    let garbage = temp.path().join("garbage.log");
    fs::write(&garbage, b"not a redo log").unwrap();
    let logs = vec![garbage.clone(), path.clone()];

    let (seen, result) = replay(&logs, &PlaybackWindow::default());
    assert_eq!(seen, vec![txn(1, 4)]);
    assert_eq!(result.files, 1);

    let strict = PlaybackWindow {
        stop_on_error: true,
        ..Default::default()
    };
    assert!(RedoPlayer::playback(&logs, &strict, |_| Ok(())).is_err());
    assert_eq!(
        RedoPlayer::retain_in_window(vec![temp.path().join("absent.log")], &strict)
            .unwrap_err()
            .kind(),
        ErrorKind::Io
    );
}

#[test]
fn test_playback_window_validation() {
    let window = PlaybackWindow {
        from_sequence: 5,
        to_sequence: 4,
        ..Default::default()
    };
    assert_eq!(window.validate().unwrap_err().kind(), ErrorKind::Config);

    let window = PlaybackWindow {
        from_time: 10,
        to_time: 9,
        ..Default::default()
    };
    assert_eq!(
        RedoPlayer::playback(&[], &window, |_| Ok(())).unwrap_err().kind(),
        ErrorKind::Config
    );
}
