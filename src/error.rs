use std::{io, result};
use thiserror::Error;

/// A type alias for `Result<T, docstore::Error>`.
pub type Result<T> = result::Result<T, Error>;

/// The error type for document store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred while talking to the persistence backend
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The requested key, record or undo entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not supported by the current setup
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// Creates a new not-found error
    pub fn not_found<T: Into<String>>(what: T) -> Self {
        Error::NotFound(what.into())
    }

    /// Creates a new invalid-argument error
    pub fn invalid_argument<T: Into<String>>(msg: T) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io(err.error)
    }
}
