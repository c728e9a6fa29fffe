//! Error types for restartable data
//!
//! This module defines the errors raised while declaring, looking up and
//! encoding restartable values. We use `thiserror` for automatic `Display`
//! and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for restartable data operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for restartable data
#[derive(Debug, Error)]
pub enum Error {
    /// A value with this name already lives in the map
    #[error("Restartable data '{0}' was already declared")]
    DuplicateName(String),

    /// No value with this name has been declared
    #[error("Restartable data '{0}' was never declared")]
    DataNotFound(String),

    /// The value stored under a name has a different type than requested
    #[error("Restartable data '{name}' has type {found}, requested {expected}")]
    TypeMismatch {
        /// Full name of the value
        name: String,
        /// Type requested by the caller
        expected: String,
        /// Type actually stored
        found: String,
    },

    /// Thread id outside of the registry's thread range
    #[error("Thread id {tid} is out of range (registry has {n_threads} threads)")]
    InvalidThread {
        /// Requested thread id
        tid: usize,
        /// Number of per-thread maps
        n_threads: usize,
    },

    /// Named meta-data map was registered twice
    #[error("Meta-data map '{0}' is already registered")]
    DuplicateMetaDataMap(String),

    /// Named meta-data map does not exist
    #[error("Meta-data map '{0}' does not exist")]
    UnknownMetaDataMap(String),

    /// Stream ended before the value was fully decoded
    #[error("Unexpected end of stream while decoding {0}")]
    UnexpectedEof(&'static str),

    /// String bytes were not valid UTF-8
    #[error("Invalid UTF-8 in encoded string")]
    InvalidUtf8,

    /// Decoded length or discriminant is not acceptable
    #[error("Invalid encoded value: {0}")]
    InvalidEncoding(String),

    /// Generic (serde) encoder failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error while writing or reading a stream
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Map a `read_exact` failure to an EOF error naming what was being decoded
    pub(crate) fn from_read(e: io::Error, what: &'static str) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof(what)
        } else {
            Error::Io(e)
        }
    }
}
