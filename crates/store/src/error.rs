//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. See `ERRORS.md` for design rationale.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("store file i/o error")]
    Io,
    #[display("malformed store file: {_0}")]
    Format(#[error(not(source))] String),
    /// The file predates this software. Migrate the store file.
    #[display("store version {found} is older than supported version {expected}")]
    VersionTooOld { found: u64, expected: u64 },
    /// The file was written by newer software. Upgrade before reading it.
    #[display("store version {found} is newer than supported version {expected}")]
    VersionTooNew { found: u64, expected: u64 },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}
