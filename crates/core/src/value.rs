//! Type-erased restartable values
//!
//! A [`RestartableData<T>`] owns exactly one value of type `T` together with
//! its full name and bookkeeping flags. Maps hold them behind the object-safe
//! [`RestartableDataValue`] trait so values of unrelated types can share one
//! ordered collection.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::Result;
use crate::store::DataStore;
use crate::type_hash::{type_hash, type_name_of};

/// Untyped context attached to a value and forwarded to its codec
pub type DataContext = Arc<dyn Any + Send + Sync>;

/// Object-safe view of a restartable value
pub trait RestartableDataValue: Any + Send {
    /// Full name of the value (`system/object/data`)
    fn name(&self) -> &str;

    /// Rust type name of the held value
    fn type_name(&self) -> &'static str;

    /// Fingerprint of the held value's type
    fn type_hash(&self) -> u64;

    /// Context passed to the codec, if any
    fn context(&self) -> Option<&DataContext>;

    /// Whether a context is attached
    fn has_context(&self) -> bool {
        self.context().is_some()
    }

    /// Whether an object declared this value
    fn declared(&self) -> bool;

    /// Mark the value as declared
    fn set_declared(&mut self);

    /// Whether the value has been loaded from a stream
    fn loaded(&self) -> bool;

    /// Whether the value has been stored to a stream
    fn stored(&self) -> bool;

    /// Encode the value into `w`
    ///
    /// Nothing reaches `w` unless encoding the whole value succeeds.
    fn store(&self, w: &mut dyn Write) -> Result<()>;

    /// Decode the value from `r`
    fn load(&mut self, r: &mut dyn Read) -> Result<()>;

    /// Upcast for downcasting to the concrete `RestartableData<T>`
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl fmt::Debug for dyn RestartableDataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartableDataValue")
            .field("name", &self.name())
            .field("type", &self.type_name())
            .field("declared", &self.declared())
            .field("loaded", &self.loaded())
            .field("stored", &self.stored())
            .finish()
    }
}

/// Named box holding one restartable value
pub struct RestartableData<T> {
    name: String,
    context: Option<DataContext>,
    declared: bool,
    loaded: bool,
    stored: Cell<bool>,
    value: T,
}

impl<T> RestartableData<T> {
    /// Create a box holding `value`
    pub fn new(name: impl Into<String>, value: T) -> Self {
        RestartableData {
            name: name.into(),
            context: None,
            declared: false,
            loaded: false,
            stored: Cell::new(false),
            value,
        }
    }

    /// Create a box whose codec receives `context`
    pub fn with_context(name: impl Into<String>, value: T, context: DataContext) -> Self {
        RestartableData {
            context: Some(context),
            ..Self::new(name, value)
        }
    }

    /// Borrow the value
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Mutably borrow the value
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Replace the value
    pub fn set(&mut self, value: T) {
        self.value = value;
    }
}

impl<T: fmt::Debug> fmt::Debug for RestartableData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartableData")
            .field("name", &self.name)
            .field("has_context", &self.context.is_some())
            .field("declared", &self.declared)
            .field("loaded", &self.loaded)
            .field("stored", &self.stored.get())
            .field("value", &self.value)
            .finish()
    }
}

impl<T: DataStore + Send + 'static> RestartableDataValue for RestartableData<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        type_name_of::<T>()
    }

    fn type_hash(&self) -> u64 {
        type_hash::<T>()
    }

    fn context(&self) -> Option<&DataContext> {
        self.context.as_ref()
    }

    fn declared(&self) -> bool {
        self.declared
    }

    fn set_declared(&mut self) {
        self.declared = true;
    }

    fn loaded(&self) -> bool {
        self.loaded
    }

    fn stored(&self) -> bool {
        self.stored.get()
    }

    fn store(&self, w: &mut dyn Write) -> Result<()> {
        let mut scratch = Vec::new();
        self.value
            .store_with_context(&mut scratch, self.context.as_deref())?;
        w.write_all(&scratch)?;
        self.stored.set(true);
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read) -> Result<()> {
        self.value.load_with_context(r, self.context.as_deref())?;
        self.loaded = true;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
