//! Insertion-ordered map of restartable values
//!
//! Serialization walks the map in insertion order and header offsets are
//! computed from that walk, so the order of [`RestartableDataMap::iter`] is
//! part of the on-disk format. Slots are never removed.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::store::DataStore;
use crate::type_hash::type_name_of;
use crate::value::{RestartableData, RestartableDataValue};

/// Ordered, name-indexed collection of restartable values
#[derive(Debug, Default)]
pub struct RestartableDataMap {
    data: Vec<Box<dyn RestartableDataValue>>,
    index: HashMap<String, usize>,
}

impl RestartableDataMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new value
    ///
    /// Fails with [`Error::DuplicateName`] if the name is already present.
    pub fn add_data(
        &mut self,
        data: Box<dyn RestartableDataValue>,
    ) -> Result<&mut dyn RestartableDataValue> {
        if self.index.contains_key(data.name()) {
            return Err(Error::DuplicateName(data.name().to_string()));
        }

        let idx = self.data.len();
        self.index.insert(data.name().to_string(), idx);
        self.data.push(data);
        Ok(&mut *self.data[idx])
    }

    /// Whether a value with this name exists
    pub fn has_data(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Look up a value, `None` if absent
    pub fn find_data(&self, name: &str) -> Option<&dyn RestartableDataValue> {
        self.index.get(name).map(|&idx| &*self.data[idx])
    }

    /// Mutable lookup, `None` if absent
    pub fn find_data_mut(&mut self, name: &str) -> Option<&mut dyn RestartableDataValue> {
        match self.index.get(name) {
            Some(&idx) => Some(&mut *self.data[idx]),
            None => None,
        }
    }

    /// Look up a value, erroring if absent
    pub fn data(&self, name: &str) -> Result<&dyn RestartableDataValue> {
        self.find_data(name)
            .ok_or_else(|| Error::DataNotFound(name.to_string()))
    }

    /// Mutable lookup, erroring if absent
    pub fn data_mut(&mut self, name: &str) -> Result<&mut dyn RestartableDataValue> {
        self.find_data_mut(name)
            .ok_or_else(|| Error::DataNotFound(name.to_string()))
    }

    /// Typed lookup of the box stored under `name`
    pub fn get_box<T: DataStore + Send + 'static>(
        &self,
        name: &str,
    ) -> Result<&RestartableData<T>> {
        let value = self.data(name)?;
        let found = value.type_name();
        value
            .as_any()
            .downcast_ref::<RestartableData<T>>()
            .ok_or_else(|| type_mismatch::<T>(name, found))
    }

    /// Mutable typed lookup of the box stored under `name`
    pub fn get_box_mut<T: DataStore + Send + 'static>(
        &mut self,
        name: &str,
    ) -> Result<&mut RestartableData<T>> {
        let value = self.data_mut(name)?;
        let found = value.type_name();
        value
            .as_any_mut()
            .downcast_mut::<RestartableData<T>>()
            .ok_or_else(|| type_mismatch::<T>(name, found))
    }

    /// Typed read access to the value stored under `name`
    pub fn get<T: DataStore + Send + 'static>(&self, name: &str) -> Result<&T> {
        self.get_box::<T>(name).map(RestartableData::get)
    }

    /// Typed write access to the value stored under `name`
    pub fn get_mut<T: DataStore + Send + 'static>(&mut self, name: &str) -> Result<&mut T> {
        self.get_box_mut::<T>(name).map(RestartableData::get_mut)
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the map holds no values
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Values in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &(dyn RestartableDataValue + 'static)> {
        self.data.iter().map(|d| &**d)
    }

    /// Mutable values in insertion order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (dyn RestartableDataValue + 'static)> {
        self.data.iter_mut().map(|d| &mut **d)
    }

    /// Names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.data.iter().map(|d| d.name())
    }
}

fn type_mismatch<T>(name: &str, found: &str) -> Error {
    Error::TypeMismatch {
        name: name.to_string(),
        expected: type_name_of::<T>().to_string(),
        found: found.to_string(),
    }
}
