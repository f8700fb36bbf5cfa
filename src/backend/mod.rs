//! # Storage Backends
//!
//! A backend stores the per-locale values of one translated attribute on one
//! record. Every attribute set gets its own [`BackendClass`] when it is
//! included into a model class; plugins add [`BackendLayer`]s to that class,
//! and [`BackendClass::build`] wraps the raw backend in those layers.
//!
//! ```text
//! Record::read("title")
//!   └─ BackendHandle ── default ─► presence ─► fallbacks ─► cache ─► key_value
//!                      (outermost = last included plugin)       (raw storage)
//! ```
//!
//! ## Built-in Backends
//!
//! | Name | Storage | Queryable |
//! |------|---------|-----------|
//! | `null` | nothing | no |
//! | `column` | `title_en` columns on the model table | yes |
//! | `key_value` | shared `string_translations` / `text_translations` tables | yes |
//! | `table` | `post_translations` table, one row per locale | yes |
//! | `json` | one JSON column per attribute | yes |
//! | `container` | one JSON column for all attributes | yes |
//! | `serialized` | YAML or JSON text column | no |
//!
//! ## Key Types
//!
//! - [`Backend`] - Read/write contract of a backend instance
//! - [`BackendFactory`] - Class-level hooks of a backend kind
//! - [`BackendClass`] - Backend configured for one attribute set
//! - [`BackendHandle`] - Memoized backend instance for (record, attribute)

mod column;
mod container;
mod json;
mod key_value;
mod null;
mod serialized;
mod table;

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

pub use column::Column;
pub use container::Container;
pub use json::Json;
pub use key_value::KeyValue;
pub use null::Null;
pub use serialized::Serialized;
pub use table::Table;

use crate::config::Config;
use crate::locale::Locale;
use crate::model::{ModelClass, RecordRef};
use crate::query::{JoinType, Node, Query};
use crate::registry::{Registry, RegistryError};
use crate::{Options, Result};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid backend: {0} (expected a name or [name, {{options}}])")]
    InvalidSpec(String),

    #[error("{backend} backend: invalid value for option '{option}': {message}")]
    InvalidOption {
        backend: String,
        option: String,
        message: String,
    },

    #[error("{backend} backend on {model}: column '{column}' must be of type {expected}, found {found}")]
    InvalidColumnType {
        backend: String,
        model: String,
        column: String,
        expected: String,
        found: String,
    },

    #[error("{backend} backend on {model}: missing column '{column}'")]
    MissingColumn {
        backend: String,
        model: String,
        column: String,
    },

    #[error("{backend} backend requires the '{option}' option")]
    MissingOption { backend: String, option: String },

    #[error("No translation class for type '{0}' (expected string or text)")]
    MissingTranslationClass(String),

    #[error("{0} backend does not support querying")]
    QueryNotSupported(String),

    #[error("Failed to (de)serialize translations of '{attribute}': {message}")]
    Serialization { attribute: String, message: String },
}

/// How a read resolves fallback locales
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Fallback {
    /// Use the chain configured on the attribute set
    #[default]
    Configured,

    /// Read the requested locale only
    Disabled,

    /// Try the requested locale, then these
    Locales(Vec<Locale>),
}

/// Per-call options for reads and writes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessOptions {
    /// Explicit locale; disables fallbacks when set
    pub locale: Option<Locale>,

    pub fallback: Fallback,

    /// Bypass the read cache
    pub skip_cache: bool,

    /// Keep blank values instead of treating them as nil
    pub skip_presence: bool,

    /// Value returned when the read yields nil (`Some(Null)` forces nil)
    pub default: Option<Value>,
}

impl AccessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locale(mut self, locale: Locale) -> Self {
        self.locale = Some(locale);
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback = Fallback::Disabled;
        self
    }

    pub fn fallback_to(mut self, locales: Vec<Locale>) -> Self {
        self.fallback = Fallback::Locales(locales);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn without_presence(mut self) -> Self {
        self.skip_presence = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Returns true if a read with these options may be served from cache
    pub fn is_cacheable(&self) -> bool {
        !self.skip_cache
            && !self.skip_presence
            && self.fallback == Fallback::Configured
            && self.default.is_none()
    }
}

/// A backend instance bound to one (record, attribute) pair
pub trait Backend: fmt::Debug {
    /// Reads the value stored for `locale`
    fn read(&self, locale: &Locale, options: &AccessOptions) -> Result<Option<Value>>;

    /// Stages `value` for `locale` and returns what was stored
    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        options: &AccessOptions,
    ) -> Result<Option<Value>>;

    /// Locales that currently have a stored value
    fn locales(&self) -> Result<Vec<Locale>> {
        Ok(Vec::new())
    }

    /// Drops memoized state
    fn clear_cache(&self) {}
}

/// Decorator installed by a plugin around every backend of an attribute set
pub trait BackendLayer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Wraps `inner`, which is the raw backend or the previous layer
    fn wrap(&self, inner: Rc<dyn Backend>, record: &RecordRef, attribute: &str) -> Rc<dyn Backend>;
}

/// Class-level hooks of a backend kind
pub trait BackendFactory: Send + Sync + fmt::Debug {
    /// Registry name
    fn name(&self) -> &str;

    /// Normalizes and validates options before the backend class is built
    fn configure(
        &self,
        _options: &mut Options,
        _model: &ModelClass,
        _attributes: &[String],
    ) -> Result<(), BackendError> {
        Ok(())
    }

    /// Wires columns and associations into the host model class
    fn setup_model(&self, _model: &mut ModelClass, _class: &BackendClass) -> Result<(), BackendError> {
        Ok(())
    }

    /// Builds the raw backend for one (record, attribute) pair
    fn build(&self, class: &Arc<BackendClass>, record: RecordRef, attribute: &str) -> Rc<dyn Backend>;

    /// Builds the query node referencing `attribute` at `locale`
    fn build_node(
        &self,
        _class: &BackendClass,
        _attribute: &str,
        _locale: &Locale,
    ) -> Result<Node, BackendError> {
        Err(BackendError::QueryNotSupported(self.name().to_string()))
    }

    /// Adds the joins `predicate` needs for attributes of this class
    fn apply_scope(
        &self,
        _class: &BackendClass,
        _query: &mut Query,
        _predicate: &Node,
        _locale: &Locale,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    /// Makes sure `attribute` at `locale` is joined with at least `join`
    fn ensure_join(
        &self,
        _class: &BackendClass,
        _query: &mut Query,
        _attribute: &str,
        _locale: &Locale,
        _join: JoinType,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}

static NEXT_CLASS_ID: AtomicUsize = AtomicUsize::new(1);

/// A backend kind configured for one attribute set on one model class
#[derive(Debug)]
pub struct BackendClass {
    id: usize,
    factory: Arc<dyn BackendFactory>,
    model_name: String,
    base_model_name: String,
    table_name: String,
    attributes: Vec<String>,
    options: Options,
    config: Arc<Config>,
    layers: Vec<Arc<dyn BackendLayer>>,
}

impl BackendClass {
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        model: &ModelClass,
        attributes: Vec<String>,
        options: Options,
        config: Arc<Config>,
    ) -> Self {
        let class = Self {
            id: NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed),
            factory,
            model_name: model.name().to_string(),
            base_model_name: model.base_name().to_string(),
            table_name: model.table_name().to_string(),
            attributes,
            options,
            config,
            layers: Vec::new(),
        };
        debug!(
            backend = class.factory.name(),
            model = %class.model_name,
            attributes = ?class.attributes,
            id = class.id,
            "configured backend class"
        );
        class
    }

    /// Identity unique to this inclusion
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn factory(&self) -> &Arc<dyn BackendFactory> {
        &self.factory
    }

    pub fn backend_name(&self) -> &str {
        self.factory.name()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Name of the root class in the model hierarchy
    pub fn base_model_name(&self) -> &str {
        &self.base_model_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Configuration captured by the attribute set
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Layer names in wrapping order (innermost first)
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub fn push_layer(&mut self, layer: Arc<dyn BackendLayer>) {
        self.layers.push(layer);
    }

    /// Builds the layered backend instance for (record, attribute)
    pub fn build(self: &Arc<Self>, record: RecordRef, attribute: &str) -> BackendHandle {
        let mut backend = self.factory.build(self, record.clone(), attribute);
        for layer in &self.layers {
            backend = layer.wrap(backend, &record, attribute);
        }

        BackendHandle {
            class: self.clone(),
            record,
            attribute: attribute.to_string(),
            backend,
        }
    }

    pub fn build_node(&self, attribute: &str, locale: &Locale) -> Result<Node, BackendError> {
        self.factory.build_node(self, attribute, locale)
    }

    pub fn apply_scope(&self, query: &mut Query, predicate: &Node, locale: &Locale) -> Result<(), BackendError> {
        self.factory.apply_scope(self, query, predicate, locale)
    }

    pub fn ensure_join(
        &self,
        query: &mut Query,
        attribute: &str,
        locale: &Locale,
        join: JoinType,
    ) -> Result<(), BackendError> {
        self.factory.ensure_join(self, query, attribute, locale, join)
    }
}

/// One locale's value, captured from a backend
#[derive(Debug, Clone, PartialEq)]
pub struct LocaleTranslation {
    pub locale: Locale,
    pub value: Option<Value>,
}

/// Backend instance for one (record, attribute) pair
///
/// Two handles are equal when they come from the same backend class, point
/// at the same record and name the same attribute.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    class: Arc<BackendClass>,
    record: RecordRef,
    attribute: String,
    backend: Rc<dyn Backend>,
}

impl BackendHandle {
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn class(&self) -> &Arc<BackendClass> {
        &self.class
    }

    pub fn read(&self, locale: &Locale, options: &AccessOptions) -> Result<Option<Value>> {
        trace!(attribute = %self.attribute, %locale, "read");
        self.backend.read(locale, options)
    }

    pub fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        options: &AccessOptions,
    ) -> Result<Option<Value>> {
        trace!(attribute = %self.attribute, %locale, "write");
        self.backend.write(locale, value, options)
    }

    /// Returns true if the read yields a non-blank value
    pub fn is_present(&self, locale: &Locale, options: &AccessOptions) -> Result<bool> {
        Ok(!is_blank(self.read(locale, options)?.as_ref()))
    }

    pub fn locales(&self) -> Result<Vec<Locale>> {
        self.backend.locales()
    }

    /// Every stored locale with its current value
    pub fn translations(&self) -> Result<Vec<LocaleTranslation>> {
        let options = AccessOptions::new().without_fallback();
        self.locales()?
            .into_iter()
            .map(|locale| {
                let value = self.backend.read(&locale, &options)?;
                Ok(LocaleTranslation { locale, value })
            })
            .collect()
    }

    pub fn clear_cache(&self) {
        self.backend.clear_cache();
    }

    /// Returns true if both handles share the same instance
    pub fn ptr_eq(&self, other: &BackendHandle) -> bool {
        Rc::ptr_eq(&self.backend, &other.backend)
    }
}

impl PartialEq for BackendHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.class, &other.class)
            && self.record.ptr_eq(&other.record)
            && self.attribute == other.attribute
    }
}

/// Returns true for nil, null, whitespace-only strings and empty collections
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// A backend name plus its options
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSpec {
    pub name: String,
    pub options: Options,
}

impl BackendSpec {
    /// Parses `"key_value"` or `["key_value", {"type": "string"}]`
    pub fn from_value(value: &Value) -> Result<Self, BackendError> {
        match value {
            Value::String(name) => Ok(Self {
                name: name.clone(),
                options: Options::new(),
            }),
            Value::Array(items) => match items.as_slice() {
                [Value::String(name)] => Ok(Self {
                    name: name.clone(),
                    options: Options::new(),
                }),
                [Value::String(name), Value::Object(options)] => Ok(Self {
                    name: name.clone(),
                    options: options.clone().into_iter().collect(),
                }),
                _ => Err(BackendError::InvalidSpec(value.to_string())),
            },
            _ => Err(BackendError::InvalidSpec(value.to_string())),
        }
    }
}

/// A backend factory given by name or already resolved
#[derive(Debug, Clone)]
pub enum BackendRef {
    Name(String),
    Factory(Arc<dyn BackendFactory>),
}

impl From<&str> for BackendRef {
    fn from(name: &str) -> Self {
        BackendRef::Name(name.to_string())
    }
}

impl From<String> for BackendRef {
    fn from(name: String) -> Self {
        BackendRef::Name(name)
    }
}

impl From<Arc<dyn BackendFactory>> for BackendRef {
    fn from(factory: Arc<dyn BackendFactory>) -> Self {
        BackendRef::Factory(factory)
    }
}

fn registry() -> &'static RwLock<Registry<dyn BackendFactory>> {
    static BACKENDS: OnceLock<RwLock<Registry<dyn BackendFactory>>> = OnceLock::new();
    BACKENDS.get_or_init(|| {
        let mut registry: Registry<dyn BackendFactory> = Registry::new("backend");
        registry.register_loader("null", |r| r.register("null", Arc::new(Null)));
        registry.register_loader("column", |r| r.register("column", Arc::new(Column)));
        registry.register_loader("key_value", |r| r.register("key_value", Arc::new(KeyValue)));
        registry.register_loader("table", |r| r.register("table", Arc::new(Table)));
        registry.register_loader("json", |r| r.register("json", Arc::new(Json)));
        registry.register_loader("container", |r| r.register("container", Arc::new(Container)));
        registry.register_loader("serialized", |r| r.register("serialized", Arc::new(Serialized)));
        RwLock::new(registry)
    })
}

/// Registers a backend factory under its own name
pub fn register(factory: Arc<dyn BackendFactory>) {
    let name = factory.name().to_string();
    registry()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .register(name, factory);
}

/// Loads a backend factory by name; resolved factories are returned unchanged
pub fn load(backend: impl Into<BackendRef>) -> Result<Arc<dyn BackendFactory>, RegistryError> {
    let name = match backend.into() {
        BackendRef::Factory(factory) => return Ok(factory),
        BackendRef::Name(name) => name,
    };

    if let Some(factory) = registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .lookup(&name)
    {
        return Ok(factory);
    }

    registry()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .load(&name)
}

/// Name a backend factory was registered under
pub fn lookup_name(factory: &Arc<dyn BackendFactory>) -> Option<String> {
    registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .lookup_name(factory)
        .map(str::to_string)
}

/// Reads an attribute value map (`locale -> value`) stored in a JSON value
pub(crate) fn locale_map(value: Option<&Value>) -> serde_json::Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    }
}

/// Locales named by the non-blank entries of a locale map
pub(crate) fn map_locales(map: &serde_json::Map<String, Value>) -> Vec<Locale> {
    map.iter()
        .filter(|(_, v)| !is_blank(Some(v)))
        .filter_map(|(k, _)| Locale::new(k).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spec_from_name_and_pair() {
        let spec = BackendSpec::from_value(&json!("key_value")).unwrap();
        assert_eq!(spec.name, "key_value");
        assert!(spec.options.is_empty());

        let spec = BackendSpec::from_value(&json!(["key_value", { "type": "text" }])).unwrap();
        assert_eq!(spec.options.get("type"), Some(&json!("text")));

        assert!(matches!(
            BackendSpec::from_value(&json!(42)),
            Err(BackendError::InvalidSpec(_))
        ));
    }

    #[test]
    fn blank_values() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&Value::Null)));
        assert!(is_blank(Some(&json!("  "))));
        assert!(is_blank(Some(&json!([]))));
        assert!(!is_blank(Some(&json!("foo"))));
        assert!(!is_blank(Some(&json!(0))));
        assert!(!is_blank(Some(&json!(false))));
    }

    #[test]
    fn cacheable_options() {
        assert!(AccessOptions::new().is_cacheable());
        assert!(AccessOptions::new().locale(Locale::from_static("en")).is_cacheable());
        assert!(!AccessOptions::new().without_cache().is_cacheable());
        assert!(!AccessOptions::new().without_fallback().is_cacheable());
        assert!(!AccessOptions::new().with_default("x").is_cacheable());
    }

    #[test]
    fn builtin_backends_load_lazily() {
        let factory = load("key_value").unwrap();
        assert_eq!(factory.name(), "key_value");
        assert_eq!(lookup_name(&factory).as_deref(), Some("key_value"));
        assert!(load("nonexistent").is_err());
    }
}
