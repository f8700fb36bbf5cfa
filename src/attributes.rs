//! Attribute set descriptor
//!
//! [`Translations`] describes one declared group of translated attributes:
//! the names, the access mode, the resolved options and, once included into
//! a model class, the [`BackendClass`] configured for that class.
//!
//! Construction validates options and runs every plugin's `on_initialize`
//! hook. [`Translations::include_into`] configures the backend class, runs
//! the `on_included` hooks in inclusion order, registers accessors and hands
//! the backend its model-setup hook.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::backend::{self, BackendClass, BackendSpec};
use crate::config::Config;
use crate::locale::Locale;
use crate::model::{Accessor, AccessorKind, ModelClass};
use crate::plugin::{IncludeContext, Pluggable};
use crate::{Options, Result};

#[derive(Debug, Error)]
pub enum AttributeError {
    #[error("Missing backend for attributes: {0} (pass a 'backend' option or configure default_backend)")]
    BackendRequired(String),

    #[error("Invalid method mode '{0}' (expected accessor, reader or writer)")]
    InvalidMethodMode(String),

    #[error("No plugin configured for these keys: {}", .0.join(", "))]
    InvalidOptionKey(Vec<String>),

    #[error("Invalid locale '{locale}' (available: {})", format_locales(.available))]
    InvalidLocale {
        locale: Locale,
        available: Vec<Locale>,
    },

    #[error("{model} has no translated attribute '{attribute}'")]
    UnknownAttribute { model: String, attribute: String },

    #[error("{model} has no accessor '{name}'")]
    UnknownAccessor { model: String, name: String },

    #[error("Cannot {action} '{attribute}' on {model}: attributes are declared as {mode}")]
    AccessDenied {
        model: String,
        attribute: String,
        mode: AccessorMode,
        action: &'static str,
    },

    #[error("{model} has no scope '{name}'")]
    UnknownScope { model: String, name: String },
}

fn format_locales(locales: &[Locale]) -> String {
    locales
        .iter()
        .map(Locale::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Which accessors an attribute set defines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessorMode {
    /// Reader and writer
    #[default]
    Accessor,
    Reader,
    Writer,
}

impl AccessorMode {
    pub fn reads(&self) -> bool {
        matches!(self, AccessorMode::Accessor | AccessorMode::Reader)
    }

    pub fn writes(&self) -> bool {
        matches!(self, AccessorMode::Accessor | AccessorMode::Writer)
    }
}

impl fmt::Display for AccessorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessorMode::Accessor => "accessor",
            AccessorMode::Reader => "reader",
            AccessorMode::Writer => "writer",
        };
        f.write_str(name)
    }
}

impl FromStr for AccessorMode {
    type Err = AttributeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches(':') {
            "accessor" => Ok(AccessorMode::Accessor),
            "reader" => Ok(AccessorMode::Reader),
            "writer" => Ok(AccessorMode::Writer),
            other => Err(AttributeError::InvalidMethodMode(other.to_string())),
        }
    }
}

/// Builds an options map from a JSON object; other values give an empty map
pub fn options(value: Value) -> Options {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => Options::new(),
    }
}

/// One declared group of translated attributes
#[derive(Debug)]
pub struct Translations {
    pluggable: Arc<Pluggable>,
    mode: AccessorMode,
    names: Vec<String>,
    options: Options,
    model_class: Option<String>,
    backend_class: Option<Arc<BackendClass>>,
}

impl Translations {
    /// Validates options and runs the `on_initialize` hooks
    ///
    /// Caller options are merged over the composed type's defaults. Every
    /// key must name an included plugin, a plugin default or `backend`.
    pub fn new(
        pluggable: Arc<Pluggable>,
        mode: AccessorMode,
        names: &[&str],
        options: Options,
    ) -> Result<Self> {
        let mut attributes: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.trim_start_matches(':').to_string();
            if !attributes.contains(&name) {
                attributes.push(name);
            }
        }

        let invalid: Vec<String> = options
            .keys()
            .filter(|key| {
                key.as_str() != "backend"
                    && !pluggable.defaults().contains_key(key.as_str())
                    && !pluggable.includes(key)
            })
            .cloned()
            .collect();
        if !invalid.is_empty() {
            return Err(AttributeError::InvalidOptionKey(invalid).into());
        }

        let mut merged = pluggable.defaults().clone();
        merged.extend(options);
        if merged.get("backend").map_or(true, Value::is_null) {
            return Err(AttributeError::BackendRequired(attributes.join(", ")).into());
        }

        let mut translations = Self {
            pluggable: pluggable.clone(),
            mode,
            names: attributes,
            options: merged,
            model_class: None,
            backend_class: None,
        };

        for plugin in pluggable.included_plugins() {
            if pluggable.dependencies_satisfied(plugin.as_ref()) {
                plugin.on_initialize(&mut translations)?;
            } else {
                debug!(plugin = plugin.name(), "dependencies not satisfied, skipping initialize hook");
            }
        }

        Ok(translations)
    }

    /// Includes the attribute set into `model`
    pub fn include_into(mut self, model: &mut ModelClass) -> Result<Arc<Translations>> {
        self.model_class = Some(model.name().to_string());

        let spec = self.backend_spec()?;
        let factory = backend::load(spec.name.as_str())?;
        let mut backend_options = spec.options;
        factory.configure(&mut backend_options, model, &self.names)?;

        let mut backend_class = BackendClass::new(
            factory.clone(),
            model,
            self.names.clone(),
            backend_options,
            self.config().clone(),
        );

        let pluggable = self.pluggable.clone();
        for plugin in pluggable.included_plugins() {
            if !pluggable.dependencies_satisfied(plugin.as_ref()) {
                debug!(
                    plugin = plugin.name(),
                    model = model.name(),
                    "dependencies not satisfied, skipping included hook"
                );
                continue;
            }

            let mut ctx = IncludeContext {
                model: &mut *model,
                translations: &self,
                backend_class: &mut backend_class,
            };
            plugin.on_included(&mut ctx)?;
        }

        self.define_accessors(model);

        let backend_class = Arc::new(backend_class);
        debug!(
            model = model.name(),
            backend = backend_class.backend_name(),
            layers = ?backend_class.layer_names(),
            "included translated attributes"
        );
        self.backend_class = Some(backend_class.clone());

        let translations = Arc::new(self);
        model.register_translations(translations.clone());
        factory.setup_model(model, &backend_class)?;

        Ok(translations)
    }

    fn define_accessors(&self, model: &mut ModelClass) {
        for name in &self.names {
            let accessor = |kind| Accessor {
                attribute: name.clone(),
                kind,
                locale: None,
            };

            if self.mode.reads() {
                model.define_accessor(name.clone(), accessor(AccessorKind::Reader));
                model.define_accessor(format!("{}?", name), accessor(AccessorKind::Presence));
            }
            if self.mode.writes() {
                model.define_accessor(format!("{}=", name), accessor(AccessorKind::Writer));
            }
            model.define_accessor(format!("{}_backend", name), accessor(AccessorKind::Backend));
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.names.iter().any(|n| n == attribute)
    }

    pub fn mode(&self) -> AccessorMode {
        self.mode
    }

    /// Resolved options: plugin defaults with caller options merged over them
    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn option(&self, plugin: &str) -> Option<&Value> {
        self.options.get(plugin)
    }

    pub fn pluggable(&self) -> &Arc<Pluggable> {
        &self.pluggable
    }

    pub fn config(&self) -> &Arc<Config> {
        self.pluggable.config()
    }

    pub fn model_class(&self) -> Option<&str> {
        self.model_class.as_deref()
    }

    /// Backend class, set once the attribute set is included
    pub fn backend_class(&self) -> Option<&Arc<BackendClass>> {
        self.backend_class.as_ref()
    }

    pub fn backend_spec(&self) -> Result<BackendSpec> {
        let value = self
            .options
            .get("backend")
            .filter(|v| !v.is_null())
            .ok_or_else(|| AttributeError::BackendRequired(self.names.join(", ")))?;
        Ok(BackendSpec::from_value(value)?)
    }
}
