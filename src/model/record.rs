//! Model instances
//!
//! A [`Record`] owns its data through a [`RecordRef`] that backends share.
//! Backend instances are built lazily per attribute and memoized on the
//! record; [`Record::dup`] starts over with an empty backend cache.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::changes::ChangeSet;
use super::{AccessorKind, ModelClass};
use crate::attributes::{AccessorMode, AttributeError, Translations};
use crate::backend::{AccessOptions, BackendHandle};
use crate::locale::{self, Locale};
use crate::Result;

/// A staged row of a translation association
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRow {
    /// Database id, `None` until saved
    pub id: Option<i64>,

    pub locale: Locale,

    /// Attribute name for key-value rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// `value` for key-value rows, one entry per attribute for table rows
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TranslationRow {
    pub fn new(locale: Locale) -> Self {
        Self {
            id: None,
            locale,
            key: None,
            fields: BTreeMap::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Key-value row for `key` at `locale`
    pub fn keyed(key: impl Into<String>, locale: Locale) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(locale)
        }
    }

    /// Field value, treating SQL null as absent
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// Returns true if every field is null
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(Value::is_null)
    }
}

/// Column values, staged translation rows and changes of one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordData {
    pub id: Option<i64>,

    /// Column name -> value
    pub attributes: BTreeMap<String, Value>,

    /// Association name -> rows
    pub associations: BTreeMap<String, Vec<TranslationRow>>,

    pub changes: ChangeSet,
}

/// Shared handle to a record's data
#[derive(Debug, Clone, Default)]
pub struct RecordRef(Rc<RefCell<RecordData>>);

impl RecordRef {
    pub fn new(data: RecordData) -> Self {
        Self(Rc::new(RefCell::new(data)))
    }

    pub fn borrow(&self) -> Ref<'_, RecordData> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, RecordData> {
        self.0.borrow_mut()
    }

    /// Returns true if both handles point at the same record
    pub fn ptr_eq(&self, other: &RecordRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// An instance of a [`ModelClass`]
#[derive(Debug)]
pub struct Record {
    class: Arc<ModelClass>,
    data: RecordRef,
    backends: RefCell<HashMap<String, BackendHandle>>,
}

impl Record {
    pub fn new(class: Arc<ModelClass>) -> Self {
        Self::from_data(class, RecordData::default())
    }

    pub fn from_data(class: Arc<ModelClass>, data: RecordData) -> Self {
        Self {
            class,
            data: RecordRef::new(data),
            backends: RefCell::new(HashMap::new()),
        }
    }

    pub fn class(&self) -> &Arc<ModelClass> {
        &self.class
    }

    pub fn data(&self) -> &RecordRef {
        &self.data
    }

    pub fn id(&self) -> Option<i64> {
        self.data.borrow().id
    }

    /// Value of a plain (untranslated) column
    pub fn attribute(&self, column: &str) -> Option<Value> {
        self.data.borrow().attributes.get(column).cloned()
    }

    pub fn set_attribute(&self, column: impl Into<String>, value: impl Into<Value>) {
        self.data
            .borrow_mut()
            .attributes
            .insert(column.into(), value.into());
    }

    /// Backend instance for `attribute`, built on first use
    pub fn backend_for(&self, attribute: &str) -> Result<BackendHandle> {
        let attribute = normalize(attribute);
        if let Some(handle) = self.backends.borrow().get(attribute) {
            return Ok(handle.clone());
        }

        let translations = self.translations(attribute)?;
        let class = translations
            .backend_class()
            .ok_or_else(|| self.unknown_attribute(attribute))?;
        let handle = class.build(self.data.clone(), attribute);

        self.backends
            .borrow_mut()
            .insert(attribute.to_string(), handle.clone());
        Ok(handle)
    }

    /// Reads `attribute` at the call's locale
    ///
    /// The locale is `options.locale`, else the thread's current locale, else
    /// the configured default; locales outside `available_locales` fail
    /// with `InvalidLocale`.
    pub fn read(&self, attribute: &str, options: &AccessOptions) -> Result<Option<Value>> {
        let attribute = normalize(attribute);
        let translations = self.translations(attribute)?;
        self.ensure_access(&translations, attribute, AccessorMode::Reader)?;

        let locale = resolve_locale(&translations, options)?;
        self.backend_for(attribute)?.read(&locale, options)
    }

    pub fn write(
        &self,
        attribute: &str,
        value: Option<Value>,
        options: &AccessOptions,
    ) -> Result<Option<Value>> {
        let attribute = normalize(attribute);
        let translations = self.translations(attribute)?;
        self.ensure_access(&translations, attribute, AccessorMode::Writer)?;

        let locale = resolve_locale(&translations, options)?;
        self.backend_for(attribute)?.write(&locale, value, options)
    }

    pub fn is_present(&self, attribute: &str, options: &AccessOptions) -> Result<bool> {
        let attribute = normalize(attribute);
        let translations = self.translations(attribute)?;
        self.ensure_access(&translations, attribute, AccessorMode::Reader)?;

        let locale = resolve_locale(&translations, options)?;
        self.backend_for(attribute)?.is_present(&locale, options)
    }

    /// Calls a reader accessor (`title`, `title_en`, `title_pt_br`)
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        let accessor = self.class.resolve_accessor(name)?;
        match accessor.kind {
            AccessorKind::Reader => self.in_locale(accessor.locale, || {
                self.read(&accessor.attribute, &AccessOptions::new())
            }),
            AccessorKind::Presence => self
                .in_locale(accessor.locale, || {
                    self.is_present(&accessor.attribute, &AccessOptions::new())
                })
                .map(|present| Some(Value::Bool(present))),
            AccessorKind::Writer | AccessorKind::Backend => Err(self.unknown_accessor(name)),
        }
    }

    /// Calls a writer accessor by its base name (`title`, `title_en`)
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<Option<Value>> {
        let writer = format!("{}=", name);
        let accessor = self.class.resolve_accessor(&writer)?;
        if accessor.kind != AccessorKind::Writer {
            return Err(self.unknown_accessor(&writer));
        }

        let value = match value.into() {
            Value::Null => None,
            value => Some(value),
        };
        self.in_locale(accessor.locale, || {
            self.write(&accessor.attribute, value, &AccessOptions::new())
        })
    }

    /// Calls a presence accessor by its base name (`title`, `title_en`)
    pub fn present(&self, name: &str) -> Result<bool> {
        let query = format!("{}?", name);
        match self.get(&query)? {
            Some(Value::Bool(present)) => Ok(present),
            _ => Err(self.unknown_accessor(&query)),
        }
    }

    fn in_locale<T>(&self, locale: Option<Locale>, f: impl FnOnce() -> T) -> T {
        match locale {
            Some(locale) => locale::with_locale(locale, f),
            None => f(),
        }
    }

    /// Copy without an id, saved rows or memoized backends
    pub fn dup(&self) -> Record {
        let mut data = self.data.borrow().clone();
        data.id = None;
        for row in data.associations.values_mut().flatten() {
            row.id = None;
            row.created_at = None;
            row.updated_at = None;
        }
        Record::from_data(self.class.clone(), data)
    }

    /// Clears the caches of every memoized backend
    pub fn reset_translation_caches(&self) {
        for handle in self.backends.borrow().values() {
            handle.clear_cache();
        }
    }

    /// Runs after a successful save: rolls changes and resets caches
    pub fn after_save(&self) {
        self.clear_changes();
    }

    /// Replaces the record's data with freshly loaded data
    pub fn reload_from(&self, data: RecordData) {
        *self.data.borrow_mut() = data;
        self.reset_translation_caches();
    }

    /// Unsaved changes as `title_en -> (from, to)`
    pub fn changes(&self) -> BTreeMap<String, (Option<Value>, Option<Value>)> {
        self.data
            .borrow()
            .changes
            .current()
            .iter()
            .map(|(key, change)| (key.clone(), (change.from.clone(), change.to.clone())))
            .collect()
    }

    /// Names of changed `attribute_locale` pairs
    pub fn changed(&self) -> Vec<String> {
        self.data.borrow().changes.current().keys().cloned().collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.data.borrow().changes.is_empty()
    }

    /// Returns true if `name` (`title` or `title_en`) has unsaved changes
    pub fn attribute_changed(&self, name: &str) -> bool {
        let data = self.data.borrow();
        data.changes
            .current()
            .iter()
            .any(|(key, change)| key == name || change.attribute == name)
    }

    /// Value of `attribute` at `locale` before the unsaved changes
    ///
    /// Reads the stored value from the backend directly, so this also works
    /// for attributes declared write-only.
    pub fn attribute_was(&self, attribute: &str, locale: &Locale) -> Result<Option<Value>> {
        let attribute = normalize(attribute);
        if let Some(change) = self.data.borrow().changes.get(attribute, locale) {
            return Ok(change.from.clone());
        }
        self.backend_for(attribute)?
            .read(locale, &stored_value(locale))
    }

    /// Changes of the last save
    pub fn previous_changes(&self) -> BTreeMap<String, (Option<Value>, Option<Value>)> {
        self.data
            .borrow()
            .changes
            .previous()
            .iter()
            .map(|(key, change)| (key.clone(), (change.from.clone(), change.to.clone())))
            .collect()
    }

    /// Writes back the value `attribute` had at `locale` before the unsaved changes
    pub fn restore_attribute(&self, attribute: &str, locale: &Locale) -> Result<()> {
        let attribute = normalize(attribute);
        let original = match self.data.borrow().changes.get(attribute, locale) {
            Some(change) => change.from.clone(),
            None => return Ok(()),
        };

        self.write(attribute, original, &stored_value(locale).without_presence())?;
        self.data.borrow_mut().changes.remove(attribute, locale);
        Ok(())
    }

    /// Rolls unsaved changes into `previous_changes` and resets caches
    pub fn clear_changes(&self) {
        self.data.borrow_mut().changes.commit();
        self.reset_translation_caches();
    }

    fn translations(&self, attribute: &str) -> Result<Arc<Translations>, AttributeError> {
        self.class
            .translations_for(attribute)
            .cloned()
            .ok_or_else(|| self.unknown_attribute(attribute))
    }

    fn ensure_access(
        &self,
        translations: &Translations,
        attribute: &str,
        needed: AccessorMode,
    ) -> Result<(), AttributeError> {
        let mode = translations.mode();
        let allowed = match needed {
            AccessorMode::Writer => mode.writes(),
            _ => mode.reads(),
        };
        if allowed {
            return Ok(());
        }

        Err(AttributeError::AccessDenied {
            model: self.class.name().to_string(),
            attribute: attribute.to_string(),
            mode,
            action: if needed.writes() { "write" } else { "read" },
        })
    }

    fn unknown_attribute(&self, attribute: &str) -> AttributeError {
        AttributeError::UnknownAttribute {
            model: self.class.name().to_string(),
            attribute: attribute.to_string(),
        }
    }

    fn unknown_accessor(&self, name: &str) -> crate::Error {
        AttributeError::UnknownAccessor {
            model: self.class.name().to_string(),
            name: name.to_string(),
        }
        .into()
    }
}

/// Options reading exactly what is stored at `locale`
fn stored_value(locale: &Locale) -> AccessOptions {
    AccessOptions::new()
        .locale(locale.clone())
        .without_fallback()
        .with_default(Value::Null)
}

/// Attribute names may be given with a leading `:`
fn normalize(attribute: &str) -> &str {
    attribute.trim_start_matches(':')
}

fn resolve_locale(translations: &Translations, options: &AccessOptions) -> Result<Locale> {
    let config = translations.config();
    let locale = options
        .locale
        .clone()
        .or_else(locale::current)
        .unwrap_or_else(|| config.default_locale.clone());

    config.enforce_locale(&locale)?;
    Ok(locale)
}
