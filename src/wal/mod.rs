//! Write-Ahead Log (redo log) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Versioned file header identifying the log (sequence, server, timestamps)
//! - Framed entries with CRC32 checksums and start/end markers
//! - Background or synchronous fsync
//! - Crash recovery: resync past garbage, redo uncommitted transactions
//!
//! ## File Format
//! All integers are little-endian.
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ FileHeader (HEADER_LEN = 185 bytes)                         │
//! │   Magic "REDOLOG\0" (8) | Open (1) | FileSize (8)           │
//! │   Sequence (8) | ServerIdLen (1) | ServerId (127)           │
//! │   FirstOpTs (8) | LastOpTs (8) | CreateTime (8)             │
//! │   Major (2) | Minor (2) | CRC (4)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Entry 1                                                     │
//! │ ┌──────┬──────┬──────┬──────┬────┬─────┬──────┬─────┬─────┐ │
//! │ │"RDO{"│Code 4│Maj 4 │Min 4 │Ts 8│Len 4│ Data │CRC 4│"}ODR"││
//! │ └──────┴──────┴──────┴──────┴────┴─────┴──────┴─────┴─────┘ │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Entry 2 ...                                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod entry;
mod header;
mod writer;
mod reader;
mod recovery;

pub use entry::{
    FrameHeader, LoggedOp, OpKind, RedoableOp, TransactionId, END_MARKER, FRAME_OVERHEAD,
    MAX_PAYLOAD_LEN, START_MARKER,
};
pub use header::{
    FileHeader, HEADER_LEN, MAGIC, MAX_SERVER_ID_LEN, UNKNOWN_SERVER_ID, VERSION_MAJOR,
    VERSION_MINOR,
};
pub use writer::LogWriter;
pub use reader::{LogIter, LogReader};
pub use recovery::{PlaybackResult, PlaybackWindow, RedoPlayer, ScanOptions, ScanResult};

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in unix millis
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
