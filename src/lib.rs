//! transattr - Translated model attributes with pluggable storage
//!
//! Model classes declare groups of translated attributes. Each group is
//! stored by a backend (columns, key-value rows, a translation table, JSON
//! or serialized text) and decorated by composable plugins such as caching,
//! locale fallbacks and dirty tracking. Backends that keep translations in
//! joined tables infer INNER vs OUTER joins from query predicates.
//!
//! ```text
//! ModelClass::translates(["title"], {backend: "key_value"})
//!   └─ Translations ── plugins (resolved order) ── BackendClass ── layers
//! Record::get("title_en") -> BackendHandle -> default/presence/fallbacks/cache -> storage
//! ModelClass::scope("i18n") -> Node -> join visitors -> Query -> SqliteStore
//! ```

pub mod attributes;
pub mod backend;
pub mod config;
pub mod error;
pub mod locale;
pub mod model;
pub mod plugin;
pub mod query;
pub mod registry;
pub mod store;

use std::collections::BTreeMap;

pub use serde_json::Value;

pub use attributes::{AccessorMode, AttributeError, Translations};
pub use backend::{AccessOptions, Backend, BackendClass, BackendError, BackendFactory, BackendHandle};
pub use config::Config;
pub use error::{Error, Result};
pub use locale::Locale;
pub use model::{ColumnType, ModelClass, Record};
pub use plugin::{Pluggable, Plugin, PluginError};
pub use query::{I18nScope, JoinType, Node, Query};
pub use store::SqliteStore;

/// Option map passed to declarations: plugin name -> option value
pub type Options = BTreeMap<String, Value>;
