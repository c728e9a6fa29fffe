//! Core types for restartable data
//!
//! This crate defines the in-memory side of checkpoint/restart:
//! - DataStore: per-type binary codec, with a serde/bincode fallback
//! - RestartableData: named, type-erased box around one value
//! - RestartableDataMap: insertion-ordered map of boxes
//! - RestartableRegistry: per-thread maps plus named meta-data maps
//! - Restartable: declaration interface used by simulation objects
//! - Type hashes used to verify that stored bytes match the declared type
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod map;
pub mod registry;
pub mod restartable;
pub mod store;
pub mod type_hash;
pub mod value;

pub use error::{Error, Result};
pub use map::RestartableDataMap;
pub use registry::RestartableRegistry;
pub use restartable::Restartable;
pub use store::{Bincode, DataStore, StoreContext};
pub use type_hash::{hash_type_name, reference_type_hash, type_hash, type_name_of};
pub use value::{DataContext, RestartableData, RestartableDataValue};
