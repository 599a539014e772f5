//! Error types for the redo log
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using RedoError
pub type Result<T> = std::result::Result<T, RedoError>;

/// Coarse classification of a [`RedoError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed file header or undecodable payload
    Format,
    /// File written by a newer, unsupported format version
    Version,
    /// Filesystem failure, or a call made in the wrong lifecycle state
    Io,
    /// Invalid configuration
    Config,
}

/// Unified error type for redo log operations
#[derive(Debug, Error)]
pub enum RedoError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redo log {0} is not open")]
    NotOpen(&'static str),

    // -------------------------------------------------------------------------
    // File Format Errors
    // -------------------------------------------------------------------------
    #[error("Redo log format error: {0}")]
    Format(String),

    #[error(
        "Redo log version {major}.{minor} is higher than the highest known version {max_major}.{max_minor}"
    )]
    Version {
        major: i16,
        minor: i16,
        max_major: i16,
        max_minor: i16,
    },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RedoError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RedoError::Io(_) | RedoError::NotOpen(_) => ErrorKind::Io,
            RedoError::Format(_) | RedoError::Serialization(_) => ErrorKind::Format,
            RedoError::Version { .. } => ErrorKind::Version,
            RedoError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<bincode::Error> for RedoError {
    fn from(e: bincode::Error) -> Self {
        RedoError::Serialization(e.to_string())
    }
}
