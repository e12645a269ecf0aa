//! Render Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! A render failure is always scoped to one item: the preprocessing loop
//! records it and moves on, it never halts the queue.

use derive_more::{Display, Error};

/// A render error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for render operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("poppler utilities (pdftoppm/pdfinfo) not detected on your system")]
    ToolNotFound,
    /// The external renderer exceeded its bounded wait and was killed.
    #[display("render tool timed out")]
    ToolTimeout,
    /// The external renderer exited with a non-zero exit code.
    /// A `None` code means it was killed by a signal.
    #[display("render tool exited with code: {_0:?}")]
    ToolFailed(#[error(not(source))] Option<i32>),
    /// The tool reported success but an expected output file was missing
    /// under every known naming pattern.
    #[display("render output for page {_0} not found")]
    OutputMissing(#[error(not(source))] u32),
    /// The source document could not be opened or parsed.
    #[display("unreadable document: {_0}")]
    Document(#[error(not(source))] String),
    /// Failure fetching the source from the object store.
    #[display("could not fetch source from object store")]
    Storage,
    /// Failure reading or writing the artifact cache.
    #[display("artifact cache error")]
    Cache,
    #[display("I/O error")]
    Io,
}

impl From<std::io::Error> for ErrorKind {
    fn from(_: std::io::Error) -> Self {
        Self::Io
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolTimeout | Self::Storage | Self::Io)
    }
}
