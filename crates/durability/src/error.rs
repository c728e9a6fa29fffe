//! Checkpoint/restart error types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for checkpoint/restart operations
pub type RestartResult<T> = std::result::Result<T, RestartError>;

/// Errors raised while writing or restoring restartable data
///
/// Everything except [`RestartError::MissingData`] means the stored state
/// cannot be trusted and nothing was loaded.
#[derive(Debug, Error)]
pub enum RestartError {
    /// Declaration, lookup or value codec failure
    #[error(transparent)]
    Data(#[from] restartable_core::Error),

    /// Stream does not start with the expected magic bytes
    #[error("Invalid magic bytes: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected magic bytes
        expected: [u8; 2],
        /// Bytes found at the start of the stream
        found: Vec<u8>,
    },

    /// Stream was written by an incompatible format version
    #[error("Unsupported restartable data version {found} (this build reads version {expected})")]
    UnsupportedVersion {
        /// Version found in the stream
        found: u32,
        /// Version this build understands
        expected: u32,
    },

    /// Stream was written by an incompatible build
    #[error("Reference type hash mismatch: stream has {found:#018x}, expected {expected:#018x}; the data was written by an incompatible build")]
    ReferenceHashMismatch {
        /// Hash found in the stream
        found: u64,
        /// Hash this engine expects
        expected: u64,
    },

    /// Stream was written with a different number of ranks
    #[error("Restartable data was written with {written} processors but is being loaded with {current}")]
    ProcessorMismatch {
        /// Ranks at write time
        written: u32,
        /// Ranks now
        current: u32,
    },

    /// Stream was written with a different number of threads
    #[error("Restartable data was written with {written} threads but is being loaded with {current}")]
    ThreadMismatch {
        /// Threads at write time
        written: u32,
        /// Threads now
        current: u32,
    },

    /// Stored type differs from the declared type
    #[error("Type of restartable data '{name}' changed: stored as {stored_type}, declared as {declared_type}")]
    TypeHashMismatch {
        /// Full name of the value
        name: String,
        /// Type name recorded in the stream
        stored_type: String,
        /// Type name of the live declaration
        declared_type: String,
    },

    /// Declared values that the stream does not contain
    #[error("Restartable data missing from the stored data: {}", .names.join(", "))]
    MissingData {
        /// Full names of the missing values
        names: Vec<String>,
    },

    /// Structurally invalid stream
    #[error("Corrupt restartable data: {0}")]
    Corruption(String),

    /// Checksum of a standalone file does not match
    #[error("Checksum mismatch in {path}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// File being read
        path: PathBuf,
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// Restore requested without a bound backup
    #[error("No backup is bound for restoration")]
    NoBackup,

    /// File could not be opened, written or read
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Stream I/O error
    #[error("Stream I/O error: {0}")]
    Stream(#[from] io::Error),

    /// Equation system restore performed by an external collaborator failed
    #[error("Equation system restore failed for {}: {message}", .path.display())]
    SystemRestore {
        /// File handed to the collaborator
        path: PathBuf,
        /// Collaborator's error message
        message: String,
    },

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl RestartError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RestartError::Io {
            path: path.into(),
            source,
        }
    }
}
