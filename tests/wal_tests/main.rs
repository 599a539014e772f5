//! Redo log test suite
//!
//! Shared fixtures live here; each area has its own module.

mod config_tests;
mod entry_tests;
mod recovery_tests;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redolog::{AtomicSequence, LogWriter, LoggedOp, RedoConfig, TransactionId};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

pub fn setup_temp_log() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("redo.log");
    (temp_dir, log_path)
}

pub fn config_for(path: &Path) -> RedoConfig {
    RedoConfig::builder()
        .log_path(path)
        .fsync_interval_ms(0)
        .server_id("mail1.example.com")
        .build()
}

/// Writer with no background fsync, sequences starting at `first_sequence`
pub fn writer_at(path: &Path, first_sequence: i64) -> LogWriter {
    LogWriter::new(
        &config_for(path),
        Arc::new(AtomicSequence::starting_at(first_sequence)),
    )
    .unwrap()
}

/// Change record for transaction `major-minor`
pub fn change(major: u32, minor: u32, payload: &[u8]) -> LoggedOp {
    LoggedOp::new(TransactionId::new(major, minor), 100, 1_000, payload.to_vec())
}

/// Append raw bytes to the end of a file
pub fn append_bytes(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}
