use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Per-item processing failures are not errors at this level: the scheduler
/// records them in the job's progress snapshot and keeps going. Only
/// failures of the job machinery itself surface here.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A job for this item type is already active.
    #[display("a preprocessing job for this item type is already running")]
    AlreadyRunning,
    /// The catalog could not be queried or updated.
    #[display("catalog error: {_0}")]
    Catalog(#[error(not(source))] String),
    /// An item could not be processed. Raised by workers, caught by the
    /// scheduler and recorded against the item.
    #[display("{_0}")]
    Worker(#[error(not(source))] String),
}
