//! Redo log writer
//!
//! Appends framed entries to the active log file and keeps its header current.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use crate::config::{RedoConfig, SequenceAllocator};
use crate::error::{RedoError, Result};

use super::entry::encode_frame;
use super::{now_millis, FileHeader, FrameHeader, RedoableOp, HEADER_LEN, MAX_PAYLOAD_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Unopened,
    Open,
    Closed,
}

/// State shared between the writer and its fsync task
struct WriterState {
    stage: Stage,
    file: Option<File>,
    header: FileHeader,
    /// Bytes appended since the last fsync
    dirty: bool,
    /// Failure from the background task, reported on the next call
    deferred_error: Option<io::Error>,
}

impl WriterState {
    fn take_deferred_error(&mut self) -> Result<()> {
        match self.deferred_error.take() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn background_sync(&mut self) {
        if !self.dirty {
            return;
        }
        if let Some(file) = self.file.as_mut() {
            match file.sync_data() {
                Ok(()) => self.dirty = false,
                Err(e) => {
                    tracing::warn!("Background fsync of redo log failed: {}", e);
                    self.deferred_error = Some(e);
                }
            }
        }
    }
}

/// Periodic fsync thread, stopped by dropping its shutdown sender
struct FsyncTask {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl FsyncTask {
    fn spawn(shared: Arc<Mutex<WriterState>>, interval: Duration) -> Result<Self> {
        let (shutdown, shutdown_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("redolog-fsync".to_string())
            .spawn(move || loop {
                crossbeam::select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(ticker) -> _ => shared.lock().background_sync(),
                }
            })?;

        tracing::debug!("Started redo log fsync task, interval={:?}", interval);
        Ok(Self { shutdown, handle })
    }

    fn stop(self) {
        drop(self.shutdown);
        if self.handle.join().is_err() {
            tracing::error!("Redo log fsync task panicked");
        }
    }
}

/// Why an append failed
enum AppendFailure {
    /// The cursor is back at the entry's start
    Rewound(io::Error),
    /// The cursor could not be restored; its position is unknown
    Stranded(io::Error),
}

/// Write `bytes` at the cursor, rewinding to `start` if the write fails
///
/// A rewound cursor lets the next append overwrite whatever part of the
/// entry made it out.
fn append_at<F: Write + Seek>(
    file: &mut F,
    start: u64,
    bytes: &[u8],
) -> std::result::Result<(), AppendFailure> {
    let Err(e) = file.write_all(bytes) else {
        return Ok(());
    };
    match file.seek(SeekFrom::Start(start)) {
        Ok(_) => Err(AppendFailure::Rewound(e)),
        Err(seek_err) => {
            tracing::error!("Rewind to offset {} failed: {}", start, seek_err);
            Err(AppendFailure::Stranded(e))
        }
    }
}

/// Fsync an append; `dirty` stays set when it fails so the fsync task retries
fn sync_appended(dirty: &mut bool, sync: impl FnOnce() -> io::Result<()>) -> io::Result<()> {
    *dirty = true;
    sync()?;
    *dirty = false;
    Ok(())
}

/// Name of an archived log: `redo-<sequence>-<create time>.log`
pub(crate) fn archive_file_name(sequence: i64, create_time: i64) -> String {
    format!("redo-{:010}-{}.log", sequence, create_time)
}

/// Sequence encoded in an archived log's file name
pub(crate) fn archive_sequence(file_name: &str) -> Option<i64> {
    let stem = file_name.strip_prefix("redo-")?.strip_suffix(".log")?;
    let (sequence, create_time) = stem.split_once('-')?;
    create_time.parse::<i64>().ok()?;
    sequence.parse().ok()
}

/// Writes entries to a redo log file
///
/// ## Lifecycle
/// `Unopened → Open → Closed`, and `Closed → Open` again on reopen.
/// All methods take `&self`; the file handle and header live behind one
/// mutex shared with the background fsync task, so concurrent `log` calls
/// are serialized and land in the file in call order.
pub struct LogWriter {
    path: PathBuf,
    server_id: Option<String>,
    fsync_interval: Option<Duration>,
    sequencer: Arc<dyn SequenceAllocator>,
    shared: Arc<Mutex<WriterState>>,
    syncer: Mutex<Option<FsyncTask>>,
}

impl LogWriter {
    /// Create a writer for `config.log_path`; nothing touches disk until `open`
    pub fn new(config: &RedoConfig, sequencer: Arc<dyn SequenceAllocator>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            path: config.log_path.clone(),
            server_id: config.server_id.clone(),
            fsync_interval: config.fsync_interval(),
            sequencer,
            shared: Arc::new(Mutex::new(WriterState {
                stage: Stage::Unopened,
                file: None,
                header: FileHeader::new(config.server_id.as_deref()),
                dirty: false,
                deferred_error: None,
            })),
            syncer: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open or create the log file
    ///
    /// A missing or empty file gets a fresh header with the next sequence.
    /// An existing file keeps the sequence, create time and server id in its
    /// header; appending resumes at the current end of the file.
    pub fn open(&self) -> Result<()> {
        {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            if state.stage == Stage::Open {
                return Ok(());
            }

            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }

            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;
            let len = file.metadata()?.len();

            let mut header = if len == 0 {
                let mut header = FileHeader::new(self.server_id.as_deref());
                header.set_sequence(self.sequencer.next_sequence());
                header.set_create_time(now_millis());
                tracing::debug!(
                    "Creating redo log {} with sequence {}",
                    self.path.display(),
                    header.sequence()
                );
                header
            } else {
                let header = FileHeader::read(&mut file)?;
                if header.is_open() {
                    tracing::warn!(
                        "Redo log {} was not closed cleanly (sequence {})",
                        self.path.display(),
                        header.sequence()
                    );
                }
                header
            };

            let size = len.max(HEADER_LEN as u64);
            header.set_open(true);
            header.set_file_size(size as i64);
            header.write(&mut file)?;
            file.sync_all()?;
            file.seek(SeekFrom::Start(size))?;

            tracing::info!(
                "Opened redo log {} (sequence {}, {} bytes)",
                self.path.display(),
                header.sequence(),
                size
            );

            state.file = Some(file);
            state.header = header;
            state.stage = Stage::Open;
            state.dirty = false;
            state.deferred_error = None;
        }

        self.stop_syncer();
        if let Some(interval) = self.fsync_interval {
            let task = FsyncTask::spawn(Arc::clone(&self.shared), interval)?;
            *self.syncer.lock() = Some(task);
        }
        Ok(())
    }

    /// Append one entry carrying `payload`
    ///
    /// With `synchronous` the entry is fsynced before returning; otherwise it
    /// becomes durable on the next fsync tick, `flush`, or `close`.
    pub fn log<O: RedoableOp + ?Sized>(
        &self,
        op: &O,
        payload: &mut dyn Read,
        synchronous: bool,
    ) -> Result<()> {
        let mut body = Vec::new();
        payload.read_to_end(&mut body)?;
        if body.len() > MAX_PAYLOAD_LEN {
            return Err(RedoError::Format(format!(
                "payload of {} bytes exceeds the {} byte limit",
                body.len(),
                MAX_PAYLOAD_LEN
            )));
        }

        let frame = FrameHeader {
            op_code: op.op_code(),
            txn_id: op.transaction_id(),
            timestamp: op.timestamp(),
            payload_len: body.len() as u32,
        };
        let bytes = encode_frame(&frame, &body);

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let file = state.file.as_mut().ok_or(RedoError::NotOpen("writer"))?;
        if let Some(e) = state.deferred_error.take() {
            return Err(e.into());
        }

        let start = state.header.file_size() as u64;
        match append_at(file, start, &bytes) {
            Ok(()) => {}
            Err(AppendFailure::Rewound(e)) => {
                tracing::error!("Failed to append to redo log at offset {}: {}", start, e);
                return Err(e.into());
            }
            Err(AppendFailure::Stranded(e)) => {
                tracing::error!(
                    "Failed to append to redo log {} at offset {} and could not rewind; \
                     refusing further appends until reopened: {}",
                    self.path.display(),
                    start,
                    e
                );
                state.file = None;
                state.stage = Stage::Closed;
                return Err(e.into());
            }
        }

        let header = &mut state.header;
        header.set_file_size((start + bytes.len() as u64) as i64);
        if header.first_op_timestamp() == 0 {
            header.set_first_op_timestamp(frame.timestamp);
        }
        header.set_last_op_timestamp(frame.timestamp);

        if synchronous {
            sync_appended(&mut state.dirty, || file.sync_data())?;
        } else {
            state.dirty = true;
        }

        tracing::trace!(
            "Logged txn {} code {} at offset {} ({} bytes)",
            frame.txn_id,
            frame.op_code,
            start,
            bytes.len()
        );
        Ok(())
    }

    /// Append an operation, using its own encoding as the payload
    pub fn log_op<O: RedoableOp + ?Sized>(&self, op: &O, synchronous: bool) -> Result<()> {
        let payload = op.encode_payload()?;
        self.log(op, &mut payload.as_slice(), synchronous)
    }

    /// Force everything appended so far to disk
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let file = state.file.as_mut().ok_or(RedoError::NotOpen("writer"))?;
        if let Some(e) = state.deferred_error.take() {
            return Err(e.into());
        }
        if state.dirty {
            file.sync_data()?;
            state.dirty = false;
        }
        Ok(())
    }

    /// Flush, mark the header closed, rewrite it and release the file
    ///
    /// Closing a writer that is not open does nothing.
    pub fn close(&self) -> Result<()> {
        self.stop_syncer();

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let Some(mut file) = state.file.take() else {
            return Ok(());
        };
        state.stage = Stage::Closed;
        state.dirty = false;

        file.sync_all()?;
        state.header.set_open(false);
        state.header.write(&mut file)?;
        file.sync_all()?;

        tracing::info!(
            "Closed redo log {} (sequence {}, {} bytes)",
            self.path.display(),
            state.header.sequence(),
            state.header.file_size()
        );

        state.take_deferred_error()
    }

    /// Close the log, move it into `archive_dir`, and start a new log with
    /// the next sequence. Returns the archived file's path.
    pub fn rollover(&self, archive_dir: &Path) -> Result<PathBuf> {
        self.close()?;

        let header = self.header()?;
        fs::create_dir_all(archive_dir)?;
        let archived = archive_dir.join(archive_file_name(header.sequence(), header.create_time()));
        fs::rename(&self.path, &archived)?;

        tracing::info!(
            "Rolled over redo log sequence {} to {}",
            header.sequence(),
            archived.display()
        );

        self.open()?;
        Ok(archived)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Latest known header
    ///
    /// Before this writer has opened the file, it is read from disk (an
    /// uninitialized header if the file does not exist yet).
    pub fn header(&self) -> Result<FileHeader> {
        {
            let state = self.shared.lock();
            if state.stage != Stage::Unopened {
                return Ok(state.header.clone());
            }
        }
        Ok(FileHeader::read_path(&self.path)?
            .unwrap_or_else(|| FileHeader::new(self.server_id.as_deref())))
    }

    /// File size as recorded in the header, including the header itself
    pub fn size(&self) -> Result<u64> {
        Ok(self.header()?.file_size().max(0) as u64)
    }

    /// True while the log holds no entries
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? <= HEADER_LEN as u64)
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().stage == Stage::Open
    }

    pub fn sequence(&self) -> Result<i64> {
        Ok(self.header()?.sequence())
    }

    pub fn create_time(&self) -> Result<i64> {
        Ok(self.header()?.create_time())
    }

    pub fn server_id(&self) -> Result<String> {
        Ok(self.header()?.server_id().to_string())
    }

    fn stop_syncer(&self) {
        let task = self.syncer.lock().take();
        if let Some(task) = task {
            task.stop();
        }
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.stop_syncer();

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if let Some(file) = state.file.as_mut() {
            if state.dirty {
                let _ = file.sync_data();
            }
        }
    }
}
