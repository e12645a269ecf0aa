use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The configuration sources could not be read or deserialised.
    #[display("could not load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// A value parsed fine but fails validation.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
    /// No usable directory for defaults could be determined.
    #[display("could not determine a data directory for this platform")]
    NoProjectDirs,
    #[display("configured path is not absolute: {}", _0.display())]
    RelativePath(#[error(not(source))] PathBuf),
}
