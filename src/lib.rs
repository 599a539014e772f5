//! # redolog
//!
//! Durable redo log for a transactional mailbox store:
//! - Fixed-layout, versioned file header
//! - Append-only framed entries with CRC32 checksums
//! - Synchronous or interval-driven (background fsync) durability
//! - Corruption-tolerant sequential recovery that resyncs past torn writes
//! - Crash recovery that redoes uncommitted transactions
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Mailbox Transaction Layer                    │
//! │            (produces RedoableOp, consumes replay)            │
//! └──────────────┬──────────────────────────────▲───────────────┘
//!                │ log(op, payload, sync)       │ next_op()
//!                ▼                              │
//!   ┌──────────────────────┐        ┌───────────┴──────────┐
//!   │      LogWriter       │        │      LogReader       │
//!   │  (Mutex<header+fd>)  │        │ (scan + resync)      │
//!   └──────────┬───────────┘        └───────────▲──────────┘
//!              │   fsync ticker                  │
//!              ▼                                 │
//!   ┌──────────────────────────────────────────────────────┐
//!   │  redo.log:  FileHeader | entry | entry | ...         │
//!   └──────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ scan / truncate / redo
//!                      ┌───────┴───────┐
//!                      │  RedoPlayer   │
//!                      └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorKind, RedoError, Result};
pub use config::{AtomicSequence, RedoConfig, SequenceAllocator};
pub use wal::{FileHeader, LogReader, LogWriter, LoggedOp, RedoPlayer, RedoableOp, TransactionId};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the redolog crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
