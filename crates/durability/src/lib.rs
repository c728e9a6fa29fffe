//! Persistence layer for restartable data
//!
//! This crate handles everything that turns a registry into bytes and back:
//!
//! - Header: stream preamble and the header block indexing every body
//! - Backup: in-memory checkpoint of one rank (system + per-thread streams)
//! - RestartableDataIo: backup creation/restoration and standalone files
//! - RestartableDataWriter: crash-safe standalone file writer
//! - Resurrector: restart file naming and restore/write orchestration
//! - DataIoConfig: rank layout and strictness of the consistency checks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod config;
pub mod error;
pub mod header;
pub mod io;
pub mod resurrector;
mod serialize;
pub mod writer;

pub use backup::{Backup, BACKUP_MAGIC};
pub use config::{ConfigError, DataIoConfig};
pub use error::{RestartError, RestartResult};
pub use header::{DataHeader, HeaderEntry, MapHeader, Preamble, FORMAT_VERSION, MAGIC};
pub use io::{BackupState, RestartableDataIo};
pub use resurrector::{RestartFormat, Resurrector, SystemRestorer};
pub use serialize::RestoreReport;
pub use writer::{RestartableDataWriter, WriteInfo};
