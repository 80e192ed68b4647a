//! Provider Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. See `ERRORS.md` for design rationale.

use derive_more::{Display, Error};

/// A provider error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid argument: {_0}")]
    InvalidArgument(#[error(not(source))] String),
    #[display("no record for {_0}")]
    NotFound(#[error(not(source))] String),
    /// The operation is not defined for this provider composition.
    #[display("unsupported operation: {_0}")]
    Unsupported(#[error(not(source))] String),
    #[display("malformed provider table: {_0}")]
    Format(#[error(not(source))] String),
    #[display("image id error")]
    Identity,
    #[display("store error")]
    Store,
    #[display("file scan error")]
    Scan,
    #[display("configuration error")]
    Config,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Scan)
    }
}
