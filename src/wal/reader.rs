//! Redo log reader
//!
//! Sequentially recovers entries from a log file. Bytes that do not form a
//! valid entry (torn writes, stray data) are skipped by scanning ahead to the
//! next start marker.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{RedoError, Result};

use super::entry::{frame_crc, FRAME_HEADER_LEN, FRAME_TRAILER_LEN};
use super::{FileHeader, FrameHeader, LoggedOp, RedoableOp, END_MARKER, FRAME_OVERHEAD, HEADER_LEN, START_MARKER};

/// Bytes read per step while looking for a start marker
const SCAN_CHUNK: usize = 64 * 1024;

/// Reads entries from a redo log file
pub struct LogReader {
    path: PathBuf,
    writable: bool,
    file: Option<File>,
    header: Option<FileHeader>,
    /// File length observed at open (or after truncate)
    file_len: u64,
    /// End of the last decoded entry
    position: u64,
    /// Where the next marker search starts
    scan_from: u64,
    last_op_start_offset: u64,
    skipped_bytes: u64,
}

impl LogReader {
    /// Reader that never modifies the file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_mode(path.into(), false)
    }

    /// Reader that may `truncate` junk off the end of the file
    pub fn writable(path: impl Into<PathBuf>) -> Self {
        Self::with_mode(path.into(), true)
    }

    fn with_mode(path: PathBuf, writable: bool) -> Self {
        Self {
            path,
            writable,
            file: None,
            header: None,
            file_len: 0,
            position: 0,
            scan_from: 0,
            last_op_start_offset: 0,
            skipped_bytes: 0,
        }
    }

    /// Open the file and validate its header
    ///
    /// The cursor is left immediately after the header.
    pub fn open(&mut self) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(self.writable)
            .open(&self.path)?;

        let header = FileHeader::read(&mut file).map_err(|e| match e {
            RedoError::Format(msg) => {
                RedoError::Format(format!("{}: {}", self.path.display(), msg))
            }
            other => other,
        })?;

        self.file_len = file.metadata()?.len();
        self.position = HEADER_LEN as u64;
        self.scan_from = HEADER_LEN as u64;
        self.last_op_start_offset = 0;
        self.skipped_bytes = 0;
        self.header = Some(header);
        self.file = Some(file);

        tracing::debug!(
            "Opened redo log {} for reading ({} bytes)",
            self.path.display(),
            self.file_len
        );
        Ok(())
    }

    /// Read the next entry, or `None` at end of file
    ///
    /// Never fails because of bad entry bytes; only I/O errors are returned.
    pub fn next_op<O: RedoableOp>(&mut self) -> Result<Option<O>> {
        loop {
            let file = self.file.as_mut().ok_or(RedoError::NotOpen("reader"))?;
            let Some(start) = find_marker(file, self.scan_from, self.file_len)? else {
                if self.scan_from < self.file_len && self.position < self.file_len {
                    tracing::warn!(
                        "{} bytes of junk data at the end of {}",
                        self.file_len - self.position,
                        self.path.display()
                    );
                }
                self.scan_from = self.file_len;
                return Ok(None);
            };

            match read_frame::<O>(file, start, self.file_len)? {
                Frame::Decoded(op, frame_len) => {
                    self.skip_to(start);
                    self.last_op_start_offset = start;
                    self.position = start + frame_len;
                    self.scan_from = self.position;
                    return Ok(Some(op));
                }
                Frame::Undecodable(frame_len) => {
                    // Step over the whole entry; its payload may hold marker bytes.
                    self.skip_to(start);
                    self.skipped_bytes += frame_len;
                    self.position = start + frame_len;
                    self.scan_from = self.position;
                }
                Frame::Invalid => {
                    tracing::trace!("False entry marker at offset {}", start);
                    self.scan_from = start + 1;
                }
            }
        }
    }

    /// Account for garbage between the last entry and `start`
    fn skip_to(&mut self, start: u64) {
        if start > self.position {
            let skipped = start - self.position;
            tracing::warn!(
                "Skipped {} bytes of garbage at offset {} in {}",
                skipped,
                self.position,
                self.path.display()
            );
            self.skipped_bytes += skipped;
        }
    }

    /// Read the next entry without interpreting its payload
    pub fn next_logged_op(&mut self) -> Result<Option<LoggedOp>> {
        self.next_op::<LoggedOp>()
    }

    /// Iterate over the remaining entries
    pub fn ops<O: RedoableOp>(&mut self) -> LogIter<'_, O> {
        LogIter {
            reader: self,
            _op: PhantomData,
        }
    }

    /// Cut the file down to `len` bytes; only for writable readers
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        if !self.writable {
            return Err(RedoError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("{} was opened read-only", self.path.display()),
            )));
        }
        let file = self.file.as_mut().ok_or(RedoError::NotOpen("reader"))?;
        let len = len.max(HEADER_LEN as u64);

        file.set_len(len)?;
        file.sync_all()?;
        tracing::warn!("Truncated {} to {} bytes", self.path.display(), len);

        self.file_len = len;
        self.position = self.position.min(len);
        self.scan_from = self.scan_from.min(len);
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header read by `open`
    pub fn header(&self) -> Option<&FileHeader> {
        self.header.as_ref()
    }

    /// Offset just past the last decoded entry (or the header)
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Start offset of the last decoded entry
    pub fn last_op_start_offset(&self) -> u64 {
        self.last_op_start_offset
    }

    /// Length of the file
    pub fn size(&self) -> u64 {
        self.file_len
    }

    /// Garbage and undecodable entries skipped so far
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// Iterator over the entries of a [`LogReader`]
pub struct LogIter<'a, O> {
    reader: &'a mut LogReader,
    _op: PhantomData<O>,
}

impl<O: RedoableOp> Iterator for LogIter<'_, O> {
    type Item = Result<O>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_op::<O>().transpose()
    }
}

/// Offset of the first start marker in `[from, end)`
fn find_marker(file: &mut File, from: u64, end: u64) -> Result<Option<u64>> {
    let marker_len = START_MARKER.len();
    let mut buf = vec![0u8; SCAN_CHUNK];
    let mut offset = from;

    while offset + marker_len as u64 <= end {
        let want = (SCAN_CHUNK as u64).min(end - offset) as usize;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf[..want])?;

        if let Some(i) = buf[..want]
            .windows(marker_len)
            .position(|w| w == &START_MARKER[..])
        {
            return Ok(Some(offset + i as u64));
        }
        // Keep the tail so a marker split across chunks is still found.
        offset += (want - (marker_len - 1)) as u64;
    }
    Ok(None)
}

/// Outcome of decoding at a start marker
enum Frame<O> {
    /// A well-formed entry and its length
    Decoded(O, u64),
    /// A well-formed entry whose payload `O` rejects, and its length
    Undecodable(u64),
    /// The bytes at the marker are not an entry
    Invalid,
}

/// Decode the entry starting at `start`
fn read_frame<O: RedoableOp>(file: &mut File, start: u64, end: u64) -> Result<Frame<O>> {
    if start + FRAME_OVERHEAD as u64 > end {
        return Ok(Frame::Invalid);
    }

    let mut head = [0u8; FRAME_HEADER_LEN];
    file.seek(SeekFrom::Start(start))?;
    file.read_exact(&mut head)?;

    let frame = match FrameHeader::decode(&head) {
        Ok(frame) => frame,
        Err(_) => return Ok(Frame::Invalid),
    };
    let frame_len = frame.frame_len();
    if start + frame_len > end {
        return Ok(Frame::Invalid);
    }

    let payload_len = frame.payload_len as usize;
    let mut rest = vec![0u8; payload_len + FRAME_TRAILER_LEN];
    file.read_exact(&mut rest)?;

    let (payload, trailer) = rest.split_at(payload_len);
    if &trailer[4..8] != END_MARKER {
        return Ok(Frame::Invalid);
    }
    let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if frame_crc(&head[START_MARKER.len()..], payload) != stored_crc {
        return Ok(Frame::Invalid);
    }

    rest.truncate(payload_len);
    match O::decode(&frame, Bytes::from(rest)) {
        Ok(op) => Ok(Frame::Decoded(op, frame_len)),
        Err(e) => {
            tracing::debug!("Undecodable entry at offset {}: {}", start, e);
            Ok(Frame::Undecodable(frame_len))
        }
    }
}
