//! # Host Models
//!
//! A minimal ORM-style host for translated attributes: [`ModelClass`] holds
//! the schema and the attribute sets declared on it, [`Record`] is one
//! instance of it.
//!
//! ```text
//! ModelClass "Post" (table posts)
//!  ├─ columns        id, published, title_en ...
//!  ├─ attribute sets [title, content] -> key_value
//!  ├─ accessors      title, title?, title=, title_en, title_backend ...
//!  ├─ associations   string_translations, post_translations ...
//!  └─ scopes         i18n
//! ```
//!
//! Accessor names are registered once when an attribute set is included and
//! resolved through [`ModelClass::resolve_accessor`], which also handles
//! `title_<locale>` names for attributes with fallthrough accessors.
//!
//! ## Key Types
//!
//! - [`ModelClass`] - Schema plus attribute sets
//! - [`Record`] - Model instance with memoized backends
//! - [`RecordRef`] - Shared handle to a record's data
//! - [`ChangeSet`] - Per-locale dirty tracking

mod changes;
mod record;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use changes::{Change, ChangeSet};
pub use record::{Record, RecordData, RecordRef, TranslationRow};

use crate::attributes::{AccessorMode, AttributeError, Translations};
use crate::config;
use crate::locale::Locale;
use crate::plugin::Pluggable;
use crate::query::I18nScope;
use crate::{Options, Result};

/// Storage type of a model column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Real,
    Boolean,
    Text,
    Json,
}

impl ColumnType {
    /// SQL type used when creating the column
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Json => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Json => "json",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

/// Row layout of a translation association
#[derive(Debug, Clone, PartialEq)]
pub enum AssociationLayout {
    /// Shared table of (translatable, key, locale, value) rows
    KeyValue { value_type: ColumnType },

    /// Model-specific table with one row per locale and a column per attribute
    Table {
        foreign_key: String,
        columns: Vec<String>,
    },
}

/// A translation table owned by the model
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub name: String,
    pub table: String,
    pub layout: AssociationLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    /// `title`, `title_en`
    Reader,
    /// `title?`, `title_en?`
    Presence,
    /// `title=`, `title_en=`
    Writer,
    /// `title_backend`
    Backend,
}

/// What a generated accessor name dispatches to
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub attribute: String,
    pub kind: AccessorKind,

    /// Locale fixed by a locale accessor
    pub locale: Option<Locale>,
}

/// A model class hosting translated attributes
#[derive(Debug, Clone)]
pub struct ModelClass {
    name: String,
    base_name: String,
    parent: Option<String>,
    table_name: String,
    columns: Vec<ColumnDef>,
    attribute_sets: Vec<Arc<Translations>>,
    accessors: BTreeMap<String, Accessor>,
    fallthrough: BTreeSet<String>,
    associations: Vec<Association>,
    scopes: BTreeSet<String>,
}

impl ModelClass {
    /// Creates a root model class; the table name is derived from `name`
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let table_name = pluralize(&snake_case(&name));
        Self {
            base_name: name.clone(),
            name,
            parent: None,
            table_name,
            columns: Vec::new(),
            attribute_sets: Vec::new(),
            accessors: BTreeMap::new(),
            fallthrough: BTreeSet::new(),
            associations: Vec::new(),
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    /// Adds a column (builder form of [`ModelClass::add_column`])
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.add_column(name, ty);
        self
    }

    /// Adds a column unless one with that name exists
    pub fn add_column(&mut self, name: impl Into<String>, ty: ColumnType) {
        let name = name.into();
        if self.column_type(&name).is_none() {
            self.columns.push(ColumnDef { name, ty });
        }
    }

    /// Subclass sharing the parent's table and attribute sets
    ///
    /// Inherited attribute sets are shared, not copied, so their names stay
    /// fixed; sets declared on the subclass do not affect the parent.
    pub fn inherit(parent: &ModelClass, name: impl Into<String>) -> Self {
        let mut child = parent.clone();
        child.name = name.into();
        child.parent = Some(parent.name.clone());
        child
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the root class of the hierarchy
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.ty)
    }

    /// Declares translated attributes with the global configuration
    ///
    /// Builds the composed plugin type from `config::global()` and includes a
    /// read-write attribute set.
    pub fn translates(&mut self, names: &[&str], options: Options) -> Result<Arc<Translations>> {
        let pluggable = Arc::new(Pluggable::from_config(config::global())?);
        self.translates_with(pluggable, AccessorMode::Accessor, names, options)
    }

    /// Declares translated attributes with an explicit plugin composition
    pub fn translates_with(
        &mut self,
        pluggable: Arc<Pluggable>,
        mode: AccessorMode,
        names: &[&str],
        options: Options,
    ) -> Result<Arc<Translations>> {
        Translations::new(pluggable, mode, names, options)?.include_into(self)
    }

    /// Declares translated attributes with a mode given by name
    /// (`accessor`, `reader` or `writer`)
    pub fn declare(&mut self, mode: &str, names: &[&str], options: Options) -> Result<Arc<Translations>> {
        let mode = AccessorMode::from_str(mode)?;
        let pluggable = Arc::new(Pluggable::from_config(config::global())?);
        self.translates_with(pluggable, mode, names, options)
    }

    /// Attribute sets in declaration order, inherited ones first
    pub fn translations(&self) -> &[Arc<Translations>] {
        &self.attribute_sets
    }

    /// Attribute set handling `attribute` (the latest declaration wins)
    pub fn translations_for(&self, attribute: &str) -> Option<&Arc<Translations>> {
        self.attribute_sets
            .iter()
            .rev()
            .find(|set| set.names().iter().any(|n| n == attribute))
    }

    pub fn translated_attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for set in &self.attribute_sets {
            for name in set.names() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    pub(crate) fn register_translations(&mut self, translations: Arc<Translations>) {
        self.attribute_sets.push(translations);
    }

    pub fn define_accessor(&mut self, name: impl Into<String>, accessor: Accessor) {
        self.accessors.insert(name.into(), accessor);
    }

    pub fn accessor(&self, name: &str) -> Option<&Accessor> {
        self.accessors.get(name)
    }

    pub fn accessor_names(&self) -> impl Iterator<Item = &str> {
        self.accessors.keys().map(String::as_str)
    }

    /// Resolves `title_<locale>` style names for `attribute` at dispatch time
    pub fn enable_fallthrough(&mut self, attribute: impl Into<String>) {
        self.fallthrough.insert(attribute.into());
    }

    /// Resolves an accessor name
    ///
    /// Registered names win; otherwise fallthrough attributes match
    /// `<attribute>_<xx>[_<yy>]` followed by an optional `?` or `=`.
    pub fn resolve_accessor(&self, name: &str) -> Result<Accessor, AttributeError> {
        if let Some(accessor) = self.accessors.get(name) {
            return Ok(accessor.clone());
        }

        self.resolve_fallthrough(name)
            .ok_or_else(|| AttributeError::UnknownAccessor {
                model: self.name.clone(),
                name: name.to_string(),
            })
    }

    fn resolve_fallthrough(&self, name: &str) -> Option<Accessor> {
        let (stem, kind) = if let Some(stem) = name.strip_suffix('?') {
            (stem, AccessorKind::Presence)
        } else if let Some(stem) = name.strip_suffix('=') {
            (stem, AccessorKind::Writer)
        } else {
            (name, AccessorKind::Reader)
        };

        let mut attributes: Vec<&String> = self.fallthrough.iter().collect();
        attributes.sort_by_key(|a| std::cmp::Reverse(a.len()));

        attributes.into_iter().find_map(|attribute| {
            let suffix = stem.strip_prefix(attribute.as_str())?.strip_prefix('_')?;
            if !is_locale_suffix(suffix) {
                return None;
            }

            let mode = self.translations_for(attribute)?.mode();
            let allowed = match kind {
                AccessorKind::Writer => mode.writes(),
                _ => mode.reads(),
            };
            if !allowed {
                return None;
            }

            Some(Accessor {
                attribute: attribute.clone(),
                kind,
                locale: Some(Locale::from_accessor_suffix(suffix).ok()?),
            })
        })
    }

    /// Adds a translation association, merging table columns by name
    pub fn add_association(&mut self, association: Association) {
        let existing = self
            .associations
            .iter_mut()
            .find(|a| a.name == association.name);

        match existing {
            Some(existing) => {
                if let (
                    AssociationLayout::Table { columns, .. },
                    AssociationLayout::Table { columns: added, .. },
                ) = (&mut existing.layout, association.layout)
                {
                    for column in added {
                        if !columns.contains(&column) {
                            columns.push(column);
                        }
                    }
                }
            }
            None => self.associations.push(association),
        }
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn register_scope(&mut self, name: impl Into<String>) {
        self.scopes.insert(name.into());
    }

    pub fn has_scope(&self, name: &str) -> bool {
        self.scopes.contains(name)
    }

    /// Opens a query scope registered by the `query` plugin
    pub fn scope(self: &Arc<Self>, name: &str) -> Result<I18nScope, AttributeError> {
        if !self.has_scope(name) {
            return Err(AttributeError::UnknownScope {
                model: self.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(I18nScope::new(self.clone()))
    }
}

/// `xx` or `xx_yy` in lowercase ASCII
pub(crate) fn is_locale_suffix(suffix: &str) -> bool {
    let two_letters = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_lowercase());
    match suffix.split_once('_') {
        Some((language, region)) => two_letters(language) && two_letters(region),
        None => two_letters(suffix),
    }
}

/// `BlogPost` -> `blog_post`
pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub(crate) fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

pub(crate) fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{}y", stem);
    }
    for suffix in ["ses", "xes", "ches", "shes"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            return format!("{}{}", stem, &suffix[..suffix.len() - 2]);
        }
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflections() {
        assert_eq!(snake_case("BlogPost"), "blog_post");
        assert_eq!(pluralize("post"), "posts");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(singularize("posts"), "post");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(ModelClass::new("BlogPost").table_name(), "blog_posts");
    }

    #[test]
    fn locale_suffixes() {
        assert!(is_locale_suffix("en"));
        assert!(is_locale_suffix("pt_br"));
        assert!(!is_locale_suffix("english"));
        assert!(!is_locale_suffix("short_en"));
        assert!(!is_locale_suffix("EN"));
    }

    #[test]
    fn table_associations_merge_columns() {
        let mut model = ModelClass::new("Post");
        let table = |columns: &[&str]| Association {
            name: "translations".into(),
            table: "post_translations".into(),
            layout: AssociationLayout::Table {
                foreign_key: "post_id".into(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        };

        model.add_association(table(&["title"]));
        model.add_association(table(&["content", "title"]));

        assert_eq!(model.associations().len(), 1);
        assert_eq!(
            model.association("translations").unwrap().layout,
            AssociationLayout::Table {
                foreign_key: "post_id".into(),
                columns: vec!["title".into(), "content".into()],
            }
        );
    }

    #[test]
    fn unknown_accessor_names_the_model() {
        let model = ModelClass::new("Post");
        let err = model.resolve_accessor("title_en").unwrap_err();
        assert_eq!(err.to_string(), "Post has no accessor 'title_en'");
    }
}
