//! Redo log recovery
//!
//! Scans a log to find transactions that were changed but never committed or
//! aborted, and replays them after a crash. Also plays committed changes
//! back from archived logs.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::config::RedoConfig;
use crate::error::{RedoError, Result};

use super::writer::archive_sequence;
use super::{FileHeader, LogReader, LogWriter, LoggedOp, OpKind, RedoableOp, TransactionId};

/// Options for [`RedoPlayer::scan`]
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Truncate junk found after the last good entry
    pub writable: bool,

    /// Commits stamped at or after this time are ignored, leaving their
    /// change records uncommitted
    pub ignore_commits_at_or_after: i64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            writable: false,
            ignore_commits_at_or_after: i64::MAX,
        }
    }
}

/// Result of scanning a log
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Number of entries successfully decoded
    pub ops_read: u64,

    pub committed: u64,
    pub aborted: u64,
    pub checkpoints: u64,

    /// Commit/abort records whose change record was never seen
    pub orphans: u64,

    /// Change records that showed up after their orphaned commit/abort
    pub late_changes: u64,

    /// Change records without a commit/abort, in log order
    pub uncommitted: Vec<LoggedOp>,

    /// Garbage skipped between entries
    pub skipped_bytes: u64,

    /// Bytes after the last good entry
    pub junk_bytes: u64,

    /// Whether the junk was cut off the file
    pub was_truncated: bool,

    /// End offset of the last good entry
    pub last_position: u64,
}

/// Bounds for [`RedoPlayer::playback`] and [`RedoPlayer::select_logs`]
#[derive(Debug, Clone)]
pub struct PlaybackWindow {
    /// Lowest log sequence to play (inclusive)
    pub from_sequence: i64,
    /// Highest log sequence to play (inclusive)
    pub to_sequence: i64,
    /// Changes stamped earlier than this are not replayed (inclusive bound)
    pub from_time: i64,
    /// Changes committed later than this are not replayed (inclusive bound)
    pub to_time: i64,
    /// Abort on the first failing file or redo instead of logging and moving on
    pub stop_on_error: bool,
}

impl Default for PlaybackWindow {
    fn default() -> Self {
        Self {
            from_sequence: i64::MIN,
            to_sequence: i64::MAX,
            from_time: i64::MIN,
            to_time: i64::MAX,
            stop_on_error: false,
        }
    }
}

impl PlaybackWindow {
    pub fn validate(&self) -> Result<()> {
        if self.from_sequence > self.to_sequence {
            return Err(RedoError::Config(format!(
                "from sequence {} is greater than to sequence {}",
                self.from_sequence, self.to_sequence
            )));
        }
        if self.from_time > self.to_time {
            return Err(RedoError::Config(format!(
                "from time {} is later than to time {}",
                self.from_time, self.to_time
            )));
        }
        Ok(())
    }

    fn holds_sequence(&self, sequence: i64) -> bool {
        self.from_sequence <= sequence && sequence <= self.to_sequence
    }

    /// Whether a log with this header may hold ops inside the time bounds
    fn overlaps(&self, header: &FileHeader) -> bool {
        header.first_op_timestamp() <= self.to_time
            && (header.last_op_timestamp() >= self.from_time || header.is_open())
    }
}

/// Result of [`RedoPlayer::playback`]
#[derive(Debug, Default)]
pub struct PlaybackResult {
    /// Files read to the end
    pub files: u64,
    /// Entries decoded across all files
    pub ops_read: u64,
    /// Committed changes handed to the redo callback successfully
    pub replayed: u64,
    /// Committed changes whose redo failed and was ignored
    pub failed: u64,
    /// Committed changes outside the time bounds
    pub outside_window: u64,
}

/// Change records awaiting their commit/abort, kept in arrival order
#[derive(Default)]
struct PendingOps {
    slots: Vec<Option<LoggedOp>>,
    index: HashMap<TransactionId, usize>,
}

impl PendingOps {
    fn insert(&mut self, op: LoggedOp) {
        match self.index.get(&op.txn_id) {
            Some(&slot) => self.slots[slot] = Some(op),
            None => {
                self.index.insert(op.txn_id, self.slots.len());
                self.slots.push(Some(op));
            }
        }
    }

    fn remove(&mut self, txn_id: &TransactionId) -> Option<LoggedOp> {
        let slot = self.index.remove(txn_id)?;
        self.slots[slot].take()
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn contains(&self, txn_id: &TransactionId) -> bool {
        self.index.contains_key(txn_id)
    }

    fn into_ops(self) -> Vec<LoggedOp> {
        self.slots.into_iter().flatten().collect()
    }
}

/// Transaction state built up while reading one or more logs
#[derive(Default)]
struct TxnTracker {
    pending: PendingOps,
    orphans: HashMap<TransactionId, LoggedOp>,
    counts: ScanResult,
}

impl TxnTracker {
    /// Account for one entry
    ///
    /// Returns the change record completed by an honoured commit.
    fn apply(&mut self, op: LoggedOp, ignore_commits_at_or_after: i64) -> Option<LoggedOp> {
        self.counts.ops_read += 1;
        tracing::debug!("Read: {}", op);

        match op.kind() {
            OpKind::Change => {
                if let Some(orphan) = self.orphans.remove(&op.txn_id) {
                    self.counts.late_changes += 1;
                    tracing::error!(
                        "Detected out-of-order change record for orphan commit/abort: change={}, orphan={}",
                        op,
                        orphan
                    );
                }
                self.pending.insert(op);
                None
            }
            OpKind::Checkpoint => {
                self.counts.checkpoints += 1;
                check_checkpoint(&op, &self.pending);
                None
            }
            kind @ (OpKind::Commit | OpKind::Abort) => {
                if kind == OpKind::Commit && op.timestamp >= ignore_commits_at_or_after {
                    tracing::debug!("Ignoring commit past the look-back cut-off: {}", op);
                    return None;
                }
                match self.pending.remove(&op.txn_id) {
                    Some(change) if kind == OpKind::Commit => {
                        self.counts.committed += 1;
                        Some(change)
                    }
                    Some(_) => {
                        self.counts.aborted += 1;
                        None
                    }
                    None => {
                        self.counts.orphans += 1;
                        tracing::error!(
                            "Commit/abort record encountered before corresponding change record ({})",
                            op
                        );
                        if let Some(previous) = self.orphans.get(&op.txn_id) {
                            tracing::error!("Op [{}] is already an orphan: {}", op, previous);
                        }
                        self.orphans.insert(op.txn_id, op);
                        None
                    }
                }
            }
        }
    }
}

fn check_checkpoint(op: &LoggedOp, pending: &PendingOps) {
    match op.active_txns() {
        Ok(active) => {
            let missing = active.iter().filter(|id| !pending.contains(id)).count();
            if active.len() != pending.len() || missing > 0 {
                tracing::debug!(
                    "Checkpoint discrepancy: {} current uncommitted ops, {} in checkpoint",
                    pending.len(),
                    active.len()
                );
            }
        }
        Err(e) => tracing::warn!("Unreadable checkpoint ({}): {}", op, e),
    }
}

/// Scans and replays redo logs
pub struct RedoPlayer;

impl RedoPlayer {
    /// Read every entry of the log at `path` and track transaction state
    pub fn scan(path: &Path, options: &ScanOptions) -> Result<ScanResult> {
        let mut reader = if options.writable {
            LogReader::writable(path)
        } else {
            LogReader::new(path)
        };
        reader.open()?;

        let mut tracker = TxnTracker::default();
        while let Some(op) = reader.next_logged_op()? {
            tracker.apply(op, options.ignore_commits_at_or_after);
        }

        let TxnTracker {
            pending,
            counts: mut result,
            ..
        } = tracker;
        result.skipped_bytes = reader.skipped_bytes();
        result.last_position = reader.position();

        let size = reader.size();
        if result.last_position < size {
            result.junk_bytes = size - result.last_position;
            if options.writable {
                reader.truncate(result.last_position)?;
                result.was_truncated = true;
            }
        }
        reader.close();

        result.uncommitted = pending.into_ops();
        Ok(result)
    }

    /// Scan without modifying the file
    pub fn verify(path: &Path) -> Result<ScanResult> {
        Self::scan(path, &ScanOptions::default())
    }

    /// Redo every uncommitted change in the writer's log
    ///
    /// The writer is closed for the scan (which may truncate a torn tail) and
    /// reopened afterwards. Each change is handed to `redo`; success is
    /// recorded with a commit, failure with an abort. Returns the number of
    /// changes redone.
    pub fn run_crash_recovery<F>(writer: &LogWriter, config: &RedoConfig, mut redo: F) -> Result<usize>
    where
        F: FnMut(&LoggedOp) -> Result<()>,
    {
        let path = writer.path().to_path_buf();
        if !path.exists() {
            return Ok(0);
        }

        let cutoff = Self::lookback_cutoff(&path, config.crash_recovery_lookback_secs)?;

        writer.close()?;
        let result = Self::scan(
            &path,
            &ScanOptions {
                writable: true,
                ignore_commits_at_or_after: cutoff,
            },
        )?;
        writer.open()?;

        if result.uncommitted.is_empty() {
            tracing::info!("No uncommitted transactions to redo");
            return Ok(0);
        }

        let count = result.uncommitted.len();
        tracing::info!("Redoing {} uncommitted transactions", count);

        for op in &result.uncommitted {
            tracing::info!("REDOING: {}", op);
            let end = match redo(op) {
                Ok(()) => LoggedOp::commit(op.txn_id),
                Err(e) => {
                    tracing::error!(
                        "Redo failed for [{}], marking operation as aborted: {}",
                        op,
                        e
                    );
                    LoggedOp::abort(op.txn_id)
                }
            };
            writer.log_op(&end, true)?;
        }

        Ok(count)
    }

    /// Commit cut-off for crash recovery
    ///
    /// The last op time in the header is only accurate after a clean close,
    /// so the file's modification time stands in for it, bounded below by
    /// the create time.
    fn lookback_cutoff(path: &Path, lookback_secs: u64) -> Result<i64> {
        if lookback_secs == 0 {
            return Ok(i64::MAX);
        }

        let modified = fs::metadata(path)?
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let created = FileHeader::read_path(path)?
            .map(|h| h.create_time())
            .unwrap_or(0);

        Ok(modified.max(created) - (lookback_secs as i64) * 1000)
    }


    /// Replay committed changes from `paths`, in order
    ///
    /// A change is handed to `redo` when its commit is read, provided the
    /// change was stamped at or after `window.from_time` and the commit at or
    /// before `window.to_time`. Transaction state carries over from one file
    /// to the next, so a change and its commit may sit in different logs.
    /// Files are only read, never truncated.
    pub fn playback<F>(paths: &[PathBuf], window: &PlaybackWindow, mut redo: F) -> Result<PlaybackResult>
    where
        F: FnMut(&LoggedOp) -> Result<()>,
    {
        window.validate()?;

        let mut tracker = TxnTracker::default();
        let mut result = PlaybackResult::default();

        for path in paths {
            tracing::info!("Processing log file: {}", path.display());
            match Self::play_file(path, window, &mut tracker, &mut result, &mut redo) {
                Ok(()) => result.files += 1,
                Err(e) if window.stop_on_error => return Err(e),
                Err(e) => tracing::warn!("Ignoring error in {} and moving on: {}", path.display(), e),
            }
        }

        result.ops_read = tracker.counts.ops_read;
        Ok(result)
    }

    fn play_file<F>(
        path: &Path,
        window: &PlaybackWindow,
        tracker: &mut TxnTracker,
        result: &mut PlaybackResult,
        redo: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&LoggedOp) -> Result<()>,
    {
        let mut reader = LogReader::new(path);
        reader.open()?;

        while let Some(op) = reader.next_logged_op()? {
            let commit_time = op.timestamp;
            let Some(change) = tracker.apply(op, i64::MAX) else {
                continue;
            };
            if change.timestamp < window.from_time || commit_time > window.to_time {
                result.outside_window += 1;
                continue;
            }

            tracing::debug!("Redoing: {}", change);
            match redo(&change) {
                Ok(()) => result.replayed += 1,
                Err(e) if window.stop_on_error => return Err(e),
                Err(e) => {
                    result.failed += 1;
                    tracing::warn!("Ignoring error during redo log replay of [{}]: {}", change, e);
                }
            }
        }
        Ok(())
    }

    /// Logs to play back for `window`
    ///
    /// Archived logs in the sequence range come first, ordered by sequence,
    /// then the active log if its sequence is in range. Logs whose header
    /// shows no ops inside the time bounds are dropped.
    pub fn select_logs(archive_dir: &Path, active_log: &Path, window: &PlaybackWindow) -> Result<Vec<PathBuf>> {
        window.validate()?;

        let mut archived = Vec::new();
        if archive_dir.is_dir() {
            for entry in fs::read_dir(archive_dir)? {
                let path = entry?.path();
                let sequence = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(archive_sequence);
                if let Some(sequence) = sequence {
                    if window.holds_sequence(sequence) {
                        archived.push((sequence, path));
                    }
                }
            }
        }
        archived.sort();

        let mut logs: Vec<PathBuf> = archived.into_iter().map(|(_, path)| path).collect();
        if let Some(header) = FileHeader::read_path(active_log)? {
            if window.holds_sequence(header.sequence()) {
                logs.push(active_log.to_path_buf());
            }
        }

        Self::retain_in_window(logs, window)
    }

    /// Drop logs whose header shows no ops inside the time bounds
    ///
    /// Every path must name an existing log.
    pub fn retain_in_window(paths: Vec<PathBuf>, window: &PlaybackWindow) -> Result<Vec<PathBuf>> {
        let mut kept = Vec::with_capacity(paths.len());
        for path in paths {
            let header = FileHeader::read_path(&path)?.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such redo log: {}", path.display()),
                )
            })?;
            if window.overlaps(&header) {
                kept.push(path);
            } else {
                tracing::info!(
                    "Redo log {} has no operation in the requested time range",
                    path.display()
                );
            }
        }
        Ok(kept)
    }
}
