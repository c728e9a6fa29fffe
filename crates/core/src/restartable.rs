//! Declaration interface for objects with restartable state
//!
//! Simulation objects embed a [`Restartable`] and use it to declare the
//! pieces of state that must survive a checkpoint. Names are scoped as
//! `system_name/object_name/data_name`; that scheme is what ties a value in
//! a new run to the bytes written by an old one, so it must not change.
//!
//! Declaring the same full name twice with the same type hands back the same
//! storage. Objects rely on that to share state (e.g. a controllable
//! parameter declared by both the owner and a controller), so it is never
//! reported as a collision.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = RestartableRegistry::new(1);
//! let kernel = Restartable::new("Kernel", "diffusion", 0);
//!
//! *kernel.declare_restartable_data(&mut registry, "count", || 0i32)? = 42;
//! assert_eq!(*kernel.get_restartable_data::<i32>(&registry, "count")?, 42);
//! ```

use crate::error::Result;
use crate::map::RestartableDataMap;
use crate::registry::{declare_in, RestartableRegistry};
use crate::store::DataStore;
use crate::value::DataContext;

/// Per-object handle for declaring restartable data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restartable {
    system_name: String,
    object_name: String,
    tid: usize,
    meta_data_map: Option<String>,
}

impl Restartable {
    /// Create a handle for `object_name` in `system_name` running on thread `tid`
    pub fn new(system_name: impl Into<String>, object_name: impl Into<String>, tid: usize) -> Self {
        Restartable {
            system_name: system_name.into(),
            object_name: object_name.into(),
            tid,
            meta_data_map: None,
        }
    }

    /// Route declarations into the named meta-data map instead of the thread map
    ///
    /// Meta-data maps are thread agnostic, so the thread id only matters for
    /// handles without one.
    pub fn with_meta_data_map(mut self, map_name: impl Into<String>) -> Self {
        self.meta_data_map = Some(map_name.into());
        self
    }

    /// System the object belongs to
    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    /// Object name used in full names
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Thread the object runs on
    pub fn tid(&self) -> usize {
        self.tid
    }

    /// Meta-data map declarations are routed to, if any
    pub fn meta_data_map(&self) -> Option<&str> {
        self.meta_data_map.as_deref()
    }

    /// Full name of `data_name` for this object
    pub fn restartable_name(&self, data_name: &str) -> String {
        self.restartable_name_for(&self.object_name, data_name)
    }

    fn restartable_name_for(&self, object_name: &str, data_name: &str) -> String {
        format!("{}/{}/{}", self.system_name, object_name, data_name)
    }

    fn target_map<'r>(
        &self,
        registry: &'r mut RestartableRegistry,
    ) -> Result<&'r mut RestartableDataMap> {
        match &self.meta_data_map {
            Some(name) => registry.meta_data_map_mut(name),
            None => registry.thread_map_mut(self.tid),
        }
    }

    fn target_map_ref<'r>(
        &self,
        registry: &'r RestartableRegistry,
    ) -> Result<&'r RestartableDataMap> {
        match &self.meta_data_map {
            Some(name) => registry.meta_data_map(name),
            None => registry.thread_map(self.tid),
        }
    }

    fn declare<'r, T, F>(
        &self,
        registry: &'r mut RestartableRegistry,
        full_name: String,
        init: F,
        context: Option<DataContext>,
        recoverable: bool,
    ) -> Result<&'r mut T>
    where
        T: DataStore + Send + 'static,
        F: FnOnce() -> T,
    {
        declare_in(self.target_map(registry)?, &full_name, init, context)?;
        // Only a successful declaration may change what a restart skips
        if recoverable {
            registry.mark_recoverable(full_name.clone());
        }
        self.target_map(registry)?.get_mut::<T>(&full_name)
    }

    /// Declare a restartable value, constructing it with `init` on first use
    pub fn declare_restartable_data<'r, T, F>(
        &self,
        registry: &'r mut RestartableRegistry,
        data_name: &str,
        init: F,
    ) -> Result<&'r mut T>
    where
        T: DataStore + Send + 'static,
        F: FnOnce() -> T,
    {
        let full_name = self.restartable_name(data_name);
        self.declare(registry, full_name, init, None, false)
    }

    /// Declare a restartable value under another object's name
    pub fn declare_restartable_data_with_object_name<'r, T, F>(
        &self,
        registry: &'r mut RestartableRegistry,
        object_name: &str,
        data_name: &str,
        init: F,
    ) -> Result<&'r mut T>
    where
        T: DataStore + Send + 'static,
        F: FnOnce() -> T,
    {
        let full_name = self.restartable_name_for(object_name, data_name);
        self.declare(registry, full_name, init, None, false)
    }

    /// Declare a restartable value whose codec receives `context`
    ///
    /// The context is attached when the value is first created; later
    /// declarations keep the original one.
    pub fn declare_restartable_data_with_context<'r, T, F>(
        &self,
        registry: &'r mut RestartableRegistry,
        data_name: &str,
        context: DataContext,
        init: F,
    ) -> Result<&'r mut T>
    where
        T: DataStore + Send + 'static,
        F: FnOnce() -> T,
    {
        let full_name = self.restartable_name(data_name);
        self.declare(registry, full_name, init, Some(context), false)
    }

    /// Declare a value that is restored on recovery but not on restart
    pub fn declare_recoverable_data<'r, T, F>(
        &self,
        registry: &'r mut RestartableRegistry,
        data_name: &str,
        init: F,
    ) -> Result<&'r mut T>
    where
        T: DataStore + Send + 'static,
        F: FnOnce() -> T,
    {
        let full_name = self.restartable_name(data_name);
        self.declare(registry, full_name, init, None, true)
    }

    /// Read a previously declared value
    pub fn get_restartable_data<'r, T>(
        &self,
        registry: &'r RestartableRegistry,
        data_name: &str,
    ) -> Result<&'r T>
    where
        T: DataStore + Send + 'static,
    {
        let full_name = self.restartable_name(data_name);
        self.target_map_ref(registry)?.get::<T>(&full_name)
    }

    /// Write access to a previously declared value
    pub fn get_restartable_data_mut<'r, T>(
        &self,
        registry: &'r mut RestartableRegistry,
        data_name: &str,
    ) -> Result<&'r mut T>
    where
        T: DataStore + Send + 'static,
    {
        let full_name = self.restartable_name(data_name);
        self.target_map(registry)?.get_mut::<T>(&full_name)
    }
}
