//! Application-wide table of restartable data maps
//!
//! The registry owns one [`RestartableDataMap`] per thread for the main
//! restart namespace, plus any number of named meta-data maps whose contents
//! do not depend on the rank or thread layout (mesh meta-data, trained
//! models, ...).
//!
//! # Thread Safety
//!
//! There is no locking. Worker threads each take their own map out of
//! [`RestartableRegistry::thread_maps_mut`], so two threads never touch the
//! same value. Backup and restore take `&mut RestartableRegistry`, which
//! guarantees nobody else is writing while they run. Adding meta-data maps is
//! a setup-time operation.

use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};
use crate::map::RestartableDataMap;
use crate::store::DataStore;
use crate::value::{DataContext, RestartableData, RestartableDataValue};

/// Owner of every restartable data map in an application
#[derive(Debug)]
pub struct RestartableRegistry {
    thread_maps: Vec<RestartableDataMap>,
    meta_data: BTreeMap<String, RestartableDataMap>,
    recoverable: HashSet<String>,
}

impl Default for RestartableRegistry {
    fn default() -> Self {
        Self::new(1)
    }
}

impl RestartableRegistry {
    /// Create a registry with `n_threads` per-thread maps (at least one)
    pub fn new(n_threads: usize) -> Self {
        RestartableRegistry {
            thread_maps: (0..n_threads.max(1))
                .map(|_| RestartableDataMap::new())
                .collect(),
            meta_data: BTreeMap::new(),
            recoverable: HashSet::new(),
        }
    }

    /// Number of per-thread maps
    pub fn n_threads(&self) -> usize {
        self.thread_maps.len()
    }

    /// Map for thread `tid`
    pub fn thread_map(&self, tid: usize) -> Result<&RestartableDataMap> {
        let n_threads = self.n_threads();
        self.thread_maps
            .get(tid)
            .ok_or(Error::InvalidThread { tid, n_threads })
    }

    /// Mutable map for thread `tid`
    pub fn thread_map_mut(&mut self, tid: usize) -> Result<&mut RestartableDataMap> {
        let n_threads = self.n_threads();
        self.thread_maps
            .get_mut(tid)
            .ok_or(Error::InvalidThread { tid, n_threads })
    }

    /// All per-thread maps, indexed by thread id
    pub fn thread_maps(&self) -> &[RestartableDataMap] {
        &self.thread_maps
    }

    /// All per-thread maps, for handing one to each worker thread
    pub fn thread_maps_mut(&mut self) -> &mut [RestartableDataMap] {
        &mut self.thread_maps
    }

    /// Register a new named meta-data map
    pub fn add_meta_data_map(
        &mut self,
        name: impl Into<String>,
    ) -> Result<&mut RestartableDataMap> {
        let name = name.into();
        if self.meta_data.contains_key(&name) {
            return Err(Error::DuplicateMetaDataMap(name));
        }
        Ok(self.meta_data.entry(name).or_default())
    }

    /// Whether a meta-data map with this name is registered
    pub fn has_meta_data_map(&self, name: &str) -> bool {
        self.meta_data.contains_key(name)
    }

    /// Named meta-data map
    pub fn meta_data_map(&self, name: &str) -> Result<&RestartableDataMap> {
        self.meta_data
            .get(name)
            .ok_or_else(|| Error::UnknownMetaDataMap(name.to_string()))
    }

    /// Mutable named meta-data map
    pub fn meta_data_map_mut(&mut self, name: &str) -> Result<&mut RestartableDataMap> {
        self.meta_data
            .get_mut(name)
            .ok_or_else(|| Error::UnknownMetaDataMap(name.to_string()))
    }

    /// Names of all meta-data maps, sorted
    pub fn meta_data_map_names(&self) -> impl Iterator<Item = &str> {
        self.meta_data.keys().map(String::as_str)
    }

    /// All meta-data maps, sorted by name
    pub fn meta_data_maps(&self) -> impl Iterator<Item = (&str, &RestartableDataMap)> {
        self.meta_data.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether `full_name` is only restored on recovery
    pub fn is_recoverable(&self, full_name: &str) -> bool {
        self.recoverable.contains(full_name)
    }

    /// Names that are only restored on recovery
    pub fn recoverable_names(&self) -> &HashSet<String> {
        &self.recoverable
    }

    /// Flag `full_name` as recovery-only
    pub fn mark_recoverable(&mut self, full_name: impl Into<String>) {
        self.recoverable.insert(full_name.into());
    }
}

/// Fetch the box named `full_name`, creating it with `init` on first use
///
/// A second declaration of the same name and type returns the existing box,
/// so independent declarers share storage. A different type is an error.
pub(crate) fn declare_in<'m, T, F>(
    map: &'m mut RestartableDataMap,
    full_name: &str,
    init: F,
    context: Option<DataContext>,
) -> Result<&'m mut RestartableData<T>>
where
    T: DataStore + Send + 'static,
    F: FnOnce() -> T,
{
    if !map.has_data(full_name) {
        let data = match context {
            Some(context) => RestartableData::with_context(full_name, init(), context),
            None => RestartableData::new(full_name, init()),
        };
        map.add_data(Box::new(data))?;
    }

    let data = map.get_box_mut::<T>(full_name)?;
    data.set_declared();
    Ok(data)
}
