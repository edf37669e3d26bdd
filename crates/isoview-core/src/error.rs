//! Error types for image decoding and traversal

use thiserror::Error;

/// Result type for isoview operations
pub type Result<T> = std::result::Result<T, IsoError>;

/// Errors raised while reading an image
#[derive(Debug, Error)]
pub enum IsoError {
    /// A read ran past the end of the current decode window
    #[error("source buffer under-run: wanted {wanted} bytes, {available} available")]
    BufferUnderrun { wanted: usize, available: usize },

    /// The two halves of a both-endian field disagree
    #[error("both-endian value mismatch: little-endian {little:#x}, big-endian {big:#x}")]
    EndianMismatch { little: u32, big: u32 },

    /// Wrong identifier, version or type in the volume descriptor set
    #[error("bad volume descriptor: {0}")]
    BadDescriptor(String),

    /// A SUSP entry violates its layout.
    ///
    /// Recovered by the entry framework, which keeps the raw bytes instead.
    #[error("SUSP entry validation failed: {0}")]
    SuspValidation(&'static str),

    /// A path segment has no matching child
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// A directory operation was requested on a file record
    #[error("record is not a directory")]
    NotADirectory,

    /// A content operation was requested on a directory record
    #[error("record is not a file")]
    NotAFile,

    /// The location given to `open` has no matching transport
    #[error("unsupported image source: {0}")]
    UnsupportedSource(String),

    /// Failure reported by the block transport or the local filesystem
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IsoError {
    /// True for errors that only invalidate a single SUSP entry
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IsoError::SuspValidation(_))
    }
}
