//! Error taxonomy of the archive engine
//!
//! Structural problems terminate iteration; [`ZipError::UnsupportedEntry`]
//! is scoped to a single content request and leaves the entity stream
//! usable.

use crate::records::CompressionMethod;
use thiserror::Error;

/// Errors produced while locating, walking or decompressing an archive
#[derive(Error, Debug)]
pub enum ZipError {
    /// No end of central directory signature exists in the trailing
    /// search window; the file is not a Zip archive at all.
    #[error("end of central directory record not found")]
    NotAnArchive,

    /// A signature or size invariant failed at a known file offset.
    #[error("malformed archive at offset {offset:#x}: {reason}")]
    MalformedArchive {
        /// Absolute file offset of the violation
        offset: u64,
        /// The invariant that failed
        reason: &'static str,
    },

    /// The archive uses a feature the engine does not read (multi-disk).
    #[error("unsupported archive: {0}")]
    UnsupportedArchive(&'static str),

    /// The entry's content cannot be decoded; its metadata is still valid.
    #[error("unsupported entry: {0}")]
    UnsupportedEntry(UnsupportedEntry),

    /// Wrapper for [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html)
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    /// Out-of-range request made to the windowed reader.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Why an entry's content cannot be opened
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedEntry {
    /// The entry is encrypted
    #[error("entry is encrypted")]
    Encrypted,

    /// The compression method is neither Store nor Deflate
    #[error("compression method {0} cannot be decoded")]
    Method(CompressionMethod),
}
