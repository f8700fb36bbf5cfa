//! Name registry for plugins and backends
//!
//! A [`Registry`] maps short names to shared implementations and back.
//! Built-ins are registered lazily: a loader is stored under a name and run
//! the first time that name is requested.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Unable to load {kind} '{name}': no {kind} registered itself under that name")]
    Load { kind: &'static str, name: String },
}

/// Registers one or more entries into the registry it is given
pub type Loader<T> = fn(&mut Registry<T>);

/// Bidirectional name <-> implementation map with lazy loaders
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: HashMap<String, Arc<T>>,
    loaders: HashMap<String, Loader<T>>,
}

impl<T: ?Sized> Registry<T> {
    /// Creates an empty registry; `kind` names the entries in error messages
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            loaders: HashMap::new(),
        }
    }

    /// Registers an implementation under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, entry: Arc<T>) {
        let name = name.into();
        debug!(kind = self.kind, name = %name, "registered");
        self.entries.insert(name, entry);
    }

    /// Registers a loader run on first lookup of `name`
    pub fn register_loader(&mut self, name: impl Into<String>, loader: Loader<T>) {
        self.loaders.insert(name.into(), loader);
    }

    /// Returns the entry registered under `name` without loading
    pub fn lookup(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).cloned()
    }

    /// Returns the name an entry was registered under
    pub fn lookup_name(&self, entry: &Arc<T>) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, e)| same(e, entry))
            .map(|(name, _)| name.as_str())
    }

    /// Returns the entry for `name`, running its loader if needed
    pub fn load(&mut self, name: &str) -> Result<Arc<T>, RegistryError> {
        if let Some(entry) = self.entries.get(name) {
            return Ok(entry.clone());
        }

        if let Some(loader) = self.loaders.get(name).copied() {
            loader(self);
        }

        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::Load {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    /// Returns true if `name` is registered or loadable
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name) || self.loaders.contains_key(name)
    }

    /// Names of all registered (already loaded) entries
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Identity comparison that ignores trait-object metadata
pub(crate) fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync + std::fmt::Debug {
        fn name(&self) -> &str;
    }

    #[derive(Debug)]
    struct Entry(&'static str);

    impl Named for Entry {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry: Registry<dyn Named> = Registry::new("plugin");
        let entry: Arc<dyn Named> = Arc::new(Entry("cache"));
        registry.register("cache", entry.clone());

        assert_eq!(registry.lookup("cache").unwrap().name(), "cache");
        assert_eq!(registry.lookup_name(&entry), Some("cache"));
        assert_eq!(registry.names(), vec!["cache"]);
    }

    #[test]
    fn lazy_loader_runs_once() {
        let mut registry: Registry<dyn Named> = Registry::new("plugin");
        registry.register_loader("dirty", |r| r.register("dirty", Arc::new(Entry("dirty"))));

        assert!(registry.lookup("dirty").is_none());
        assert!(registry.contains("dirty"));

        let first = registry.load("dirty").unwrap();
        let second = registry.load("dirty").unwrap();
        assert!(same(&first, &second));
    }

    #[test]
    fn loader_that_never_registers_fails() {
        let mut registry: Registry<dyn Named> = Registry::new("backend");
        registry.register_loader("broken", |r| r.register("other", Arc::new(Entry("other"))));

        assert_eq!(
            registry.load("broken").unwrap_err(),
            RegistryError::Load {
                kind: "backend",
                name: "broken".to_string()
            }
        );
    }

    #[test]
    fn unknown_name_fails() {
        let mut registry: Registry<dyn Named> = Registry::new("plugin");
        assert!(matches!(registry.load("nope"), Err(RegistryError::Load { .. })));
    }
}
