//! The process wide list of open data sources.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use context_error::BoxedError;
use indexmap::IndexMap;

use crate::{DataSourceHandle, LifecycleState, LoadErrorKind, error::load_error};

/// The list of open data sources plus the foreground selection. Holds at most one handle per
/// origin. All access goes through a [`SharedRegistry`] so mutations from concurrent loads are
/// never interleaved.
pub trait SourceRegistry: std::fmt::Debug + Send {
    /// Get the handle registered for this origin
    fn find_by_origin(&self, origin: &Path) -> Option<Arc<DataSourceHandle>>;

    /// Register a placeholder and make it the foreground handle
    /// # Errors
    /// If a handle for the same origin is already registered, or the handle is not a placeholder.
    fn insert_placeholder(
        &mut self,
        handle: DataSourceHandle,
    ) -> Result<Arc<DataSourceHandle>, BoxedError<'static, LoadErrorKind>>;

    /// Replace the registered `old` handle with `new`, keeping its position and foreground status
    /// # Errors
    /// If `old` is not the handle registered for its origin, or `new` has a different origin.
    fn replace(
        &mut self,
        old: &Arc<DataSourceHandle>,
        new: DataSourceHandle,
    ) -> Result<Arc<DataSourceHandle>, BoxedError<'static, LoadErrorKind>>;

    /// Remove this handle, returns false if it was not registered (anymore)
    fn remove(&mut self, handle: &Arc<DataSourceHandle>) -> bool;

    /// Make the handle registered for the origin of this handle the foreground handle
    fn set_foreground(&mut self, handle: &DataSourceHandle);

    /// The foreground handle
    fn foreground(&self) -> Option<Arc<DataSourceHandle>>;

    /// All handles in registration order
    fn handles(&self) -> Vec<Arc<DataSourceHandle>>;
}

/// A registry shared between the coordinating side and all load workers
pub type SharedRegistry = Arc<Mutex<dyn SourceRegistry>>;

/// Lock a shared registry, a poisoned lock is recovered as the registry operations keep the
/// registry consistent even when a holder panicked
pub fn lock_registry(registry: &SharedRegistry) -> MutexGuard<'_, dyn SourceRegistry + 'static> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A change to the registry, as recorded by [`InMemoryRegistry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A handle was added
    Inserted(PathBuf, LifecycleState),
    /// A handle was replaced, with the state of the new handle
    Replaced(PathBuf, LifecycleState),
    /// A handle was removed
    Removed(PathBuf),
    /// A handle became the foreground handle
    Foreground(PathBuf),
}

/// A [`SourceRegistry`] keyed by origin, optionally recording all changes
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    handles: IndexMap<PathBuf, Arc<DataSourceHandle>>,
    foreground: Option<PathBuf>,
    events: Option<Vec<RegistryEvent>>,
}

impl InMemoryRegistry {
    /// Create an empty registry that does not record changes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry that records every change, see [`Self::events`]
    pub fn recording() -> Self {
        Self {
            events: Some(Vec::new()),
            ..Self::default()
        }
    }

    /// Wrap this registry for sharing between threads
    pub fn shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    /// All changes made to this registry, oldest first. Always empty if this registry was not
    /// created with [`Self::recording`].
    pub fn events(&self) -> &[RegistryEvent] {
        self.events.as_deref().unwrap_or_default()
    }

    /// The changes made for one origin, oldest first
    pub fn events_for(&self, origin: &Path) -> Vec<&RegistryEvent> {
        self.events()
            .iter()
            .filter(|event| match event {
                RegistryEvent::Inserted(path, _)
                | RegistryEvent::Replaced(path, _)
                | RegistryEvent::Removed(path)
                | RegistryEvent::Foreground(path) => path == origin,
            })
            .collect()
    }

    /// The number of registered handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if no handles are registered
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn record(&mut self, event: RegistryEvent) {
        if let Some(events) = &mut self.events {
            events.push(event);
        }
    }

    fn registered(&self, handle: &Arc<DataSourceHandle>) -> bool {
        self.handles
            .get(handle.origin())
            .is_some_and(|registered| Arc::ptr_eq(registered, handle))
    }
}

impl SourceRegistry for InMemoryRegistry {
    fn find_by_origin(&self, origin: &Path) -> Option<Arc<DataSourceHandle>> {
        self.handles.get(origin).cloned()
    }

    fn insert_placeholder(
        &mut self,
        handle: DataSourceHandle,
    ) -> Result<Arc<DataSourceHandle>, BoxedError<'static, LoadErrorKind>> {
        if self.handles.contains_key(handle.origin()) {
            return Err(load_error(
                LoadErrorKind::DuplicateOrigin,
                "File already opened",
                "A handle for this file is already registered",
                handle.origin(),
            ));
        }
        if !handle.is_placeholder() {
            return Err(load_error(
                LoadErrorKind::InvalidState,
                "Not a placeholder",
                format!("Only placeholders can be inserted, this handle is {:?}", handle.state()),
                handle.origin(),
            ));
        }
        let origin = handle.origin().to_path_buf();
        let handle = Arc::new(handle);
        self.handles.insert(origin.clone(), handle.clone());
        self.record(RegistryEvent::Inserted(origin.clone(), handle.state()));
        self.foreground = Some(origin.clone());
        self.record(RegistryEvent::Foreground(origin));
        Ok(handle)
    }

    fn replace(
        &mut self,
        old: &Arc<DataSourceHandle>,
        new: DataSourceHandle,
    ) -> Result<Arc<DataSourceHandle>, BoxedError<'static, LoadErrorKind>> {
        if !self.registered(old) {
            return Err(load_error(
                LoadErrorKind::InvalidState,
                "Cannot replace handle",
                "The handle to replace is not registered",
                old.origin(),
            ));
        }
        if new.origin() != old.origin() {
            return Err(load_error(
                LoadErrorKind::InvalidState,
                "Cannot replace handle",
                format!(
                    "The new handle is for a different file '{}'",
                    new.origin().display()
                ),
                old.origin(),
            ));
        }
        let new = Arc::new(new);
        self.handles
            .insert(old.origin().to_path_buf(), new.clone());
        self.record(RegistryEvent::Replaced(
            old.origin().to_path_buf(),
            new.state(),
        ));
        Ok(new)
    }

    fn remove(&mut self, handle: &Arc<DataSourceHandle>) -> bool {
        if !self.registered(handle) {
            return false;
        }
        self.handles.shift_remove(handle.origin());
        self.record(RegistryEvent::Removed(handle.origin().to_path_buf()));
        if self.foreground.as_deref() == Some(handle.origin()) {
            self.foreground = self.handles.keys().last().cloned();
            if let Some(origin) = self.foreground.clone() {
                self.record(RegistryEvent::Foreground(origin));
            }
        }
        true
    }

    fn set_foreground(&mut self, handle: &DataSourceHandle) {
        if self.handles.contains_key(handle.origin()) {
            self.foreground = Some(handle.origin().to_path_buf());
            self.record(RegistryEvent::Foreground(handle.origin().to_path_buf()));
        }
    }

    fn foreground(&self) -> Option<Arc<DataSourceHandle>> {
        self.foreground
            .as_ref()
            .and_then(|origin| self.handles.get(origin).cloned())
    }

    fn handles(&self) -> Vec<Arc<DataSourceHandle>> {
        self.handles.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FormatKind;

    #[test]
    fn one_handle_per_origin() {
        let mut registry = InMemoryRegistry::recording();
        let first = registry
            .insert_placeholder(DataSourceHandle::placeholder("a.mzid", FormatKind::GraphBased))
            .unwrap();
        assert!(
            registry
                .insert_placeholder(DataSourceHandle::placeholder("a.mzid", FormatKind::Other))
                .is_err()
        );
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(
            &registry.find_by_origin(Path::new("a.mzid")).unwrap(),
            &first
        ));
    }

    #[test]
    fn replace_requires_the_registered_handle() {
        let mut registry = InMemoryRegistry::recording();
        let placeholder = registry
            .insert_placeholder(DataSourceHandle::placeholder("a.xml", FormatKind::IndexedXML))
            .unwrap();
        let stale = Arc::new(DataSourceHandle::placeholder("a.xml", FormatKind::IndexedXML));
        assert!(
            registry
                .replace(
                    &stale,
                    DataSourceHandle::placeholder("a.xml", FormatKind::IndexedXML)
                )
                .is_err()
        );
        assert!(
            registry
                .replace(
                    &placeholder,
                    DataSourceHandle::placeholder("b.xml", FormatKind::IndexedXML)
                )
                .is_err()
        );
        assert!(!registry.remove(&stale));
        assert!(registry.remove(&placeholder));
        assert!(registry.is_empty());
        assert_eq!(
            registry.events_for(Path::new("a.xml")),
            [
                &RegistryEvent::Inserted(PathBuf::from("a.xml"), LifecycleState::Placeholder),
                &RegistryEvent::Foreground(PathBuf::from("a.xml")),
                &RegistryEvent::Removed(PathBuf::from("a.xml")),
            ]
        );
    }

    #[test]
    fn foreground_moves_on_removal() {
        let mut registry = InMemoryRegistry::recording();
        let a = registry
            .insert_placeholder(DataSourceHandle::placeholder("a.xml", FormatKind::IndexedXML))
            .unwrap();
        let b = registry
            .insert_placeholder(DataSourceHandle::placeholder("b.xml", FormatKind::IndexedXML))
            .unwrap();
        assert_eq!(registry.foreground().unwrap().origin(), Path::new("b.xml"));
        registry.set_foreground(&a);
        assert_eq!(registry.foreground().unwrap().origin(), Path::new("a.xml"));
        assert!(registry.remove(&a));
        assert_eq!(registry.foreground().unwrap().origin(), Path::new("b.xml"));
        assert!(registry.remove(&b));
        assert!(registry.foreground().is_none());
    }

    #[test]
    fn recording_is_opt_in() {
        let mut registry = InMemoryRegistry::new();
        let a = registry
            .insert_placeholder(DataSourceHandle::placeholder("a.xml", FormatKind::IndexedXML))
            .unwrap();
        registry.set_foreground(&a);
        assert!(registry.remove(&a));
        assert!(registry.events().is_empty());
    }
}
