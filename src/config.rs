//! Configuration for the redo log
//!
//! Centralized configuration with sensible defaults, plus the sequence
//! allocator a writer draws new log file sequence numbers from.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::error::{RedoError, Result};
use crate::wal::MAX_SERVER_ID_LEN;

/// Main configuration for a redo log
#[derive(Debug, Clone)]
pub struct RedoConfig {
    // -------------------------------------------------------------------------
    // File Layout
    // -------------------------------------------------------------------------
    /// Path of the active redo log
    pub log_path: PathBuf,

    /// Directory that rolled-over logs are moved into
    pub archive_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------
    /// Period of the background fsync task (milliseconds); 0 disables it
    pub fsync_interval_ms: u64,

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Identifier of the producing server, written into every new header
    pub server_id: Option<String>,

    // -------------------------------------------------------------------------
    // Recovery
    // -------------------------------------------------------------------------
    /// How far back from the last write crash recovery honours commits
    /// (seconds); 0 honours every commit
    pub crash_recovery_lookback_secs: u64,
}

impl Default for RedoConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("./redolog/redo.log"),
            archive_dir: PathBuf::from("./redolog/archive"),
            fsync_interval_ms: 10,
            server_id: None,
            crash_recovery_lookback_secs: 0,
        }
    }
}

impl RedoConfig {
    /// Create a new config builder
    pub fn builder() -> RedoConfigBuilder {
        RedoConfigBuilder::default()
    }

    /// Background fsync period, or `None` when disabled
    pub fn fsync_interval(&self) -> Option<Duration> {
        match self.fsync_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Check the configuration for values a writer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.log_path.as_os_str().is_empty() {
            return Err(RedoError::Config("log_path must not be empty".to_string()));
        }
        if self.log_path.file_name().is_none() {
            return Err(RedoError::Config(format!(
                "log_path {} does not name a file",
                self.log_path.display()
            )));
        }
        if let Some(id) = &self.server_id {
            if id.is_empty() {
                return Err(RedoError::Config("server_id must not be empty".to_string()));
            }
            if id.len() > MAX_SERVER_ID_LEN {
                tracing::warn!(
                    "server_id is {} bytes, only the first {} are kept",
                    id.len(),
                    MAX_SERVER_ID_LEN
                );
            }
        }
        Ok(())
    }
}

/// Builder for RedoConfig
#[derive(Default)]
pub struct RedoConfigBuilder {
    config: RedoConfig,
}

impl RedoConfigBuilder {
    /// Set the active log path
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = path.into();
        self
    }

    /// Set the archive directory
    pub fn archive_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.archive_dir = path.into();
        self
    }

    /// Set the background fsync interval (in milliseconds)
    pub fn fsync_interval_ms(mut self, ms: u64) -> Self {
        self.config.fsync_interval_ms = ms;
        self
    }

    /// Set the server identifier
    pub fn server_id(mut self, id: impl Into<String>) -> Self {
        self.config.server_id = Some(id.into());
        self
    }

    /// Set the crash recovery look-back window (in seconds)
    pub fn crash_recovery_lookback_secs(mut self, secs: u64) -> Self {
        self.config.crash_recovery_lookback_secs = secs;
        self
    }

    pub fn build(self) -> RedoConfig {
        self.config
    }
}

// =============================================================================
// Sequence Allocation
// =============================================================================

/// Source of log file sequence numbers
///
/// Every newly created log file takes the next value; reopening an existing
/// file keeps the sequence recorded in its header.
pub trait SequenceAllocator: Send + Sync {
    fn next_sequence(&self) -> i64;
}

/// Monotonic in-process counter
#[derive(Debug)]
pub struct AtomicSequence {
    next: AtomicI64,
}

impl AtomicSequence {
    /// Start handing out sequences at `first`
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    /// The value the next call to `next_sequence` returns
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for AtomicSequence {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl SequenceAllocator for AtomicSequence {
    fn next_sequence(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}
