//! Redo log entry definitions
//!
//! Defines the operations that can be logged and the on-disk framing that
//! wraps each one.

use std::fmt;

use bytes::Bytes;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{RedoError, Result};

use super::now_millis;

// =============================================================================
// Framing Constants
// =============================================================================

/// Marks the first byte of every entry
pub const START_MARKER: &[u8; 4] = b"RDO{";

/// Marks the last bytes of every entry
pub const END_MARKER: &[u8; 4] = b"}ODR";

/// Start marker + op code + txn major + txn minor + timestamp + payload length
pub(crate) const FRAME_HEADER_LEN: usize = 4 + 4 + 4 + 4 + 8 + 4;

/// CRC + end marker
pub(crate) const FRAME_TRAILER_LEN: usize = 4 + 4;

/// Bytes an entry occupies in addition to its payload
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_LEN + FRAME_TRAILER_LEN;

/// Largest payload a single entry may carry
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

// =============================================================================
// Transaction Identity
// =============================================================================

/// Identifies the transaction an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TransactionId {
    pub major: u32,
    pub minor: u32,
}

impl TransactionId {
    /// Placeholder for entries that belong to no transaction (checkpoints)
    pub const NONE: TransactionId = TransactionId { major: 0, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.major, self.minor)
    }
}

// =============================================================================
// Operation Kinds
// =============================================================================

/// Role an entry plays in transaction bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// A change record; uncommitted until its commit/abort is seen
    Change,
    /// Ends a transaction successfully
    Commit,
    /// Ends a transaction unsuccessfully
    Abort,
    /// Lists the transactions active when it was written
    Checkpoint,
}

impl OpKind {
    pub const COMMIT_CODE: u32 = 1;
    pub const ABORT_CODE: u32 = 2;
    pub const CHECKPOINT_CODE: u32 = 3;

    pub fn from_code(code: u32) -> Self {
        match code {
            Self::COMMIT_CODE => OpKind::Commit,
            Self::ABORT_CODE => OpKind::Abort,
            Self::CHECKPOINT_CODE => OpKind::Checkpoint,
            _ => OpKind::Change,
        }
    }
}

// =============================================================================
// Operation Trait
// =============================================================================

/// An operation the redo log can persist and hand back on replay
///
/// The log never looks inside the payload; it only records the fields below
/// in the entry frame.
pub trait RedoableOp {
    fn transaction_id(&self) -> TransactionId;

    /// Type tag; codes 1-3 are reserved for commit, abort and checkpoint
    fn op_code(&self) -> u32;

    /// Unix millis at which the operation happened
    fn timestamp(&self) -> i64;

    fn kind(&self) -> OpKind {
        OpKind::from_code(self.op_code())
    }

    /// Serialized body of the operation
    fn encode_payload(&self) -> Result<Vec<u8>>;

    /// Rebuild an operation from a frame and its payload
    fn decode(frame: &FrameHeader, payload: Bytes) -> Result<Self>
    where
        Self: Sized;
}

// =============================================================================
// Frame Header
// =============================================================================

/// Fixed fields at the start of every entry (after the start marker)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub op_code: u32,
    pub txn_id: TransactionId,
    pub timestamp: i64,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn kind(&self) -> OpKind {
        OpKind::from_code(self.op_code)
    }

    /// Encoded size of the whole entry
    pub fn frame_len(&self) -> u64 {
        (FRAME_OVERHEAD + self.payload_len as usize) as u64
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(START_MARKER);
        buf.extend_from_slice(&self.op_code.to_le_bytes());
        buf.extend_from_slice(&self.txn_id.major.to_le_bytes());
        buf.extend_from_slice(&self.txn_id.minor.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.payload_len.to_le_bytes());
    }

    /// Decode the first `FRAME_HEADER_LEN` bytes of an entry
    pub(crate) fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(RedoError::Format("entry header too short".to_string()));
        }
        if &data[0..4] != START_MARKER {
            return Err(RedoError::Format("missing entry start marker".to_string()));
        }

        let u32_at = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[16..24]);

        let header = Self {
            op_code: u32_at(4),
            txn_id: TransactionId::new(u32_at(8), u32_at(12)),
            timestamp: i64::from_le_bytes(ts),
            payload_len: u32_at(24),
        };

        if header.payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(RedoError::Format(format!(
                "entry payload length {} exceeds {}",
                header.payload_len, MAX_PAYLOAD_LEN
            )));
        }
        Ok(header)
    }
}

/// Encode a complete entry: header, payload, CRC, end marker
pub(crate) fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    header.encode_into(&mut buf);
    buf.extend_from_slice(payload);

    let crc = frame_crc(&buf[START_MARKER.len()..FRAME_HEADER_LEN], payload);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(END_MARKER);
    buf
}

/// Checksum over the header fields (marker excluded) and payload
pub(crate) fn frame_crc(header_fields: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(header_fields);
    hasher.update(payload);
    hasher.finalize()
}

// =============================================================================
// LoggedOp
// =============================================================================

/// An entry as stored in the log, payload left undecoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedOp {
    pub txn_id: TransactionId,
    pub op_code: u32,
    pub timestamp: i64,
    pub payload: Bytes,
}

impl LoggedOp {
    pub fn new(txn_id: TransactionId, op_code: u32, timestamp: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            txn_id,
            op_code,
            timestamp,
            payload: payload.into(),
        }
    }

    /// Commit record for `txn_id`, stamped now
    pub fn commit(txn_id: TransactionId) -> Self {
        Self::new(txn_id, OpKind::COMMIT_CODE, now_millis(), Bytes::new())
    }

    /// Abort record for `txn_id`, stamped now
    pub fn abort(txn_id: TransactionId) -> Self {
        Self::new(txn_id, OpKind::ABORT_CODE, now_millis(), Bytes::new())
    }

    /// Checkpoint listing the transactions still active
    pub fn checkpoint(active: &[TransactionId]) -> Result<Self> {
        let payload = bincode::serialize(active)?;
        Ok(Self::new(
            TransactionId::NONE,
            OpKind::CHECKPOINT_CODE,
            now_millis(),
            payload,
        ))
    }

    /// Active transactions recorded by a checkpoint
    pub fn active_txns(&self) -> Result<Vec<TransactionId>> {
        if self.kind() != OpKind::Checkpoint {
            return Err(RedoError::Format(format!(
                "op code {} is not a checkpoint",
                self.op_code
            )));
        }
        Ok(bincode::deserialize(&self.payload)?)
    }
}

impl RedoableOp for LoggedOp {
    fn transaction_id(&self) -> TransactionId {
        self.txn_id
    }

    fn op_code(&self) -> u32 {
        self.op_code
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn encode_payload(&self) -> Result<Vec<u8>> {
        Ok(self.payload.to_vec())
    }

    fn decode(frame: &FrameHeader, payload: Bytes) -> Result<Self> {
        Ok(Self {
            txn_id: frame.txn_id,
            op_code: frame.op_code,
            timestamp: frame.timestamp,
            payload,
        })
    }
}

impl fmt::Display for LoggedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "txn={} kind={:?} code={} ts={} len={}",
            self.txn_id,
            self.kind(),
            self.op_code,
            self.timestamp,
            self.payload.len()
        )
    }
}
