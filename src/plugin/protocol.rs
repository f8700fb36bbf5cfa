//! Plugin protocol
//!
//! Every capability implements [`Plugin`]. The resolver only needs the name,
//! the declared dependencies and the default; the hooks are run by the
//! attribute set descriptor while it is constructed and included.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attributes::Translations;
use crate::backend::{BackendClass, BackendLayer};
use crate::config::Config;
use crate::model::ModelClass;
use crate::Result;

/// How a dependency takes part in resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrder {
    /// Included alongside the dependent, no ordering constraint
    #[default]
    Include,

    /// Included before the dependent (sits deeper in the chain)
    Before,

    /// Included after the dependent (wraps it)
    After,

    /// Never included by the resolver; the dependent stays inactive unless
    /// something else includes it
    Exclude,
}

impl LoadOrder {
    /// Returns true if the resolver adds the dependency to the tree
    pub fn includes(&self) -> bool {
        !matches!(self, LoadOrder::Exclude)
    }
}

/// A named dependency with its load order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,

    #[serde(rename = "include", default)]
    pub load_order: LoadOrder,
}

impl Dependency {
    pub fn requires(name: impl Into<String>, load_order: LoadOrder) -> Self {
        Self {
            name: name.into(),
            load_order,
        }
    }

    /// Shorthand for `requires(name, LoadOrder::Before)`
    pub fn before(name: impl Into<String>) -> Self {
        Self::requires(name, LoadOrder::Before)
    }

    /// Shorthand for `requires(name, LoadOrder::After)`
    pub fn after(name: impl Into<String>) -> Self {
        Self::requires(name, LoadOrder::After)
    }
}

/// State handed to [`Plugin::on_included`]
pub struct IncludeContext<'a> {
    /// Model class receiving the attribute set
    pub model: &'a mut ModelClass,

    /// The attribute set being included
    pub translations: &'a Translations,

    /// Backend class configured for this inclusion
    pub backend_class: &'a mut BackendClass,
}

impl IncludeContext<'_> {
    /// Option value the attribute set carries for `plugin`
    pub fn option(&self, plugin: &str) -> Option<&Value> {
        self.translations.option(plugin)
    }
}

/// A composable capability
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Unique registry name
    fn name(&self) -> &str;

    /// Plugins this one needs, with their load order
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Default option value, registered the first time the plugin is requested
    fn default_value(&self, _config: &Config) -> Option<Value> {
        None
    }

    /// Runs when an attribute set is constructed
    fn on_initialize(&self, _translations: &mut Translations) -> Result<()> {
        Ok(())
    }

    /// Runs when an attribute set is included into a model class
    ///
    /// The default installs [`Plugin::backend_layer`] on the backend class,
    /// which covers plugins that only decorate backend reads and writes.
    fn on_included(&self, ctx: &mut IncludeContext<'_>) -> Result<()> {
        if let Some(layer) = self.backend_layer(ctx)? {
            ctx.backend_class.push_layer(layer);
        }
        Ok(())
    }

    /// Decorator added around every backend instance of the attribute set
    fn backend_layer(&self, _ctx: &IncludeContext<'_>) -> Result<Option<Arc<dyn BackendLayer>>> {
        Ok(None)
    }
}

/// Returns true for option values that switch a plugin on
pub fn enabled(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null) | Some(Value::Bool(false)))
}
