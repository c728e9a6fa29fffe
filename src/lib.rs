//! Restartable - type-erased checkpoint/restart data for simulations
//!
//! Simulation objects declare the state that must survive a checkpoint under
//! hierarchical names; the engine serializes every declared value into a
//! versioned, self-describing header/body format and loads it back on
//! restart or in-process recovery.
//!
//! # Quick Start
//!
//! ```ignore
//! use restartable::{DataIoConfig, Restartable, RestartableDataIo, RestartableRegistry};
//!
//! let mut registry = RestartableRegistry::new(1);
//! let kernel = Restartable::new("Kernel", "diffusion", 0);
//! *kernel.declare_restartable_data(&mut registry, "count", || 0i32)? = 42;
//!
//! let mut io = RestartableDataIo::new(DataIoConfig::default())?;
//! io.create_backup(&registry)?;
//!
//! *kernel.get_restartable_data_mut::<i32>(&mut registry, "count")? = 7;
//! io.restore_backup(&mut registry, true)?;
//! assert_eq!(*kernel.get_restartable_data::<i32>(&registry, "count")?, 42);
//! ```
//!
//! # Architecture
//!
//! - `restartable-core`: values, maps, the registry, the declaration
//!   interface and the per-type codec trait
//! - `restartable-durability`: header format, backups, standalone files and
//!   restart file coordination

pub use restartable_core::store;
pub use restartable_core::{
    hash_type_name, reference_type_hash, type_hash, type_name_of, Bincode, DataContext, DataStore,
    Error, Restartable, RestartableData, RestartableDataMap, RestartableDataValue,
    RestartableRegistry, Result, StoreContext,
};
pub use restartable_durability::{
    Backup, BackupState, ConfigError, DataHeader, DataIoConfig, HeaderEntry, MapHeader, Preamble,
    RestartError, RestartFormat, RestartResult, RestartableDataIo, RestartableDataWriter,
    RestoreReport, Resurrector, SystemRestorer, WriteInfo, BACKUP_MAGIC, FORMAT_VERSION, MAGIC,
};
