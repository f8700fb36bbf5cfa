//! # Plugin System
//!
//! Cross-cutting behaviour for translated attributes is split into small,
//! named plugins that are composed per attribute set.
//!
//! ## Overview
//!
//! ```text
//! Config.plugins / PluginDsl      DependencyTree         Pluggable
//!  cache, fallbacks, ...   ──►   before/after edges ──► inclusion order
//!                                 (Kahn + Tarjan)          │
//!                                                          ▼
//!                            Translations::new  ── on_initialize hooks
//!                            include_into(model) ── on_included hooks
//!                                                   └─ backend layers
//! ```
//!
//! Plugins that only decorate reads and writes return a
//! [`BackendLayer`](crate::backend::BackendLayer) from
//! [`Plugin::backend_layer`]; the default [`Plugin::on_included`] installs it.
//! Layers wrap each other in inclusion order, so the last included plugin
//! sees a call first and delegates inward.
//!
//! ## Built-in Plugins
//!
//! | Name | Purpose |
//! |------|---------|
//! | `backend` | Holds the backend spec |
//! | `query` | Registers the query scope |
//! | `cache` | Memoizes reads per locale |
//! | `fallbacks` | Reads through a fallback locale chain |
//! | `presence` | Treats blank strings as nil |
//! | `default` | Substitutes a default for nil reads |
//! | `dirty` | Tracks per-locale changes |
//! | `locale_accessors` | Defines `title_en`-style accessors |
//! | `fallthrough_accessors` | Resolves `title_<locale>` for any locale |
//!
//! ## Key Types
//!
//! - [`Plugin`] - Capability protocol
//! - [`Pluggable`] - Composed type plugins are included into
//! - [`DependencyTree`] - Ordering constraints of one resolution pass

mod builtin;
mod graph;
mod protocol;
mod resolver;

use std::sync::{Arc, OnceLock, RwLock};

pub use builtin::{
    BackendPlugin, Cache, DefaultValue, Dirty, FallthroughAccessors, Fallbacks, LocaleAccessors,
    Presence, QueryPlugin,
};
pub use graph::DependencyTree;
pub use protocol::{enabled, Dependency, IncludeContext, LoadOrder, Plugin};
pub use resolver::{Pluggable, PluginDsl, PluginError};

use crate::registry::{Registry, RegistryError};

/// A plugin given by name or already resolved
#[derive(Debug, Clone)]
pub enum PluginRef {
    Name(String),
    Plugin(Arc<dyn Plugin>),
}

impl From<&str> for PluginRef {
    fn from(name: &str) -> Self {
        PluginRef::Name(name.to_string())
    }
}

impl From<String> for PluginRef {
    fn from(name: String) -> Self {
        PluginRef::Name(name)
    }
}

impl From<Arc<dyn Plugin>> for PluginRef {
    fn from(plugin: Arc<dyn Plugin>) -> Self {
        PluginRef::Plugin(plugin)
    }
}

fn registry() -> &'static RwLock<Registry<dyn Plugin>> {
    static PLUGINS: OnceLock<RwLock<Registry<dyn Plugin>>> = OnceLock::new();
    PLUGINS.get_or_init(|| {
        let mut registry = Registry::new("plugin");
        builtin::register_loaders(&mut registry);
        RwLock::new(registry)
    })
}

/// Registers a plugin under its own name
pub fn register(plugin: Arc<dyn Plugin>) {
    let name = plugin.name().to_string();
    registry()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .register(name, plugin);
}

/// Loads a plugin by name; resolved plugins are returned unchanged
pub fn load(plugin: impl Into<PluginRef>) -> Result<Arc<dyn Plugin>, RegistryError> {
    let name = match plugin.into() {
        PluginRef::Plugin(plugin) => return Ok(plugin),
        PluginRef::Name(name) => name,
    };

    if let Some(plugin) = registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .lookup(&name)
    {
        return Ok(plugin);
    }

    registry()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .load(&name)
}

/// Name a plugin was registered under
pub fn lookup_name(plugin: &Arc<dyn Plugin>) -> Option<String> {
    registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .lookup_name(plugin)
        .map(str::to_string)
}
