//! Identity Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. See `ERRORS.md` for design rationale.

use derive_more::{Display, Error};

/// An identity error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for identity operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid argument: {_0}")]
    InvalidArgument(#[error(not(source))] String),
    #[display("not a parsable image id: {_0:?}")]
    Parse(#[error(not(source))] String),
    #[display("site {_0:?} has no registered path mapper")]
    UnknownSite(#[error(not(source))] String),
    /// More than one candidate survived backward matching.
    #[display("ambiguous partial match: {_0}")]
    Ambiguous(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
