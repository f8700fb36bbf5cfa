//! Composition tests for translated attributes
//!
//! These tests declare attributes on model classes and exercise plugins,
//! backends and records together through the public API.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};
use transattr::attributes::{options, AccessorMode, AttributeError};
use transattr::backend::{self, AccessOptions, Backend, BackendClass, BackendFactory};
use transattr::config::Config;
use transattr::locale::{self, Locale};
use transattr::model::{ModelClass, Record, RecordRef};
use transattr::plugin::{self, Dependency, LoadOrder, Pluggable, Plugin, PluginError};
use transattr::Error;

fn l(s: &str) -> Locale {
    s.parse().unwrap()
}

fn config(f: impl FnOnce(&mut Config)) -> Arc<Config> {
    let mut config = Config::default();
    f(&mut config);
    Arc::new(config)
}

/// Composed type with exactly the requested plugins
fn pluggable(config: Arc<Config>, plugins: &[&str]) -> Arc<Pluggable> {
    let mut pluggable = Pluggable::new(config).named("TestTranslations");
    pluggable
        .plugins(|dsl| {
            for name in plugins {
                dsl.plugin(*name)?;
            }
            Ok(())
        })
        .unwrap();
    Arc::new(pluggable)
}

/// In-memory backend storing values on the record, counting raw reads
#[derive(Debug)]
struct Memory {
    name: &'static str,
    reads: Arc<AtomicUsize>,
}

impl Memory {
    fn register(name: &'static str) -> Arc<AtomicUsize> {
        let reads = Arc::new(AtomicUsize::new(0));
        backend::register(Arc::new(Memory {
            name,
            reads: reads.clone(),
        }));
        reads
    }
}

impl BackendFactory for Memory {
    fn name(&self) -> &str {
        self.name
    }

    fn build(&self, _class: &Arc<BackendClass>, record: RecordRef, attribute: &str) -> Rc<dyn Backend> {
        Rc::new(MemoryBackend {
            record,
            attribute: attribute.to_string(),
            reads: self.reads.clone(),
        })
    }
}

#[derive(Debug)]
struct MemoryBackend {
    record: RecordRef,
    attribute: String,
    reads: Arc<AtomicUsize>,
}

impl MemoryBackend {
    fn key(&self, locale: &Locale) -> String {
        format!("{}@{}", self.attribute, locale)
    }
}

impl Backend for MemoryBackend {
    fn read(&self, locale: &Locale, _options: &AccessOptions) -> transattr::Result<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.record.borrow().attributes.get(&self.key(locale)).cloned())
    }

    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        _options: &AccessOptions,
    ) -> transattr::Result<Option<Value>> {
        let key = self.key(locale);
        match &value {
            Some(v) => self.record.borrow_mut().attributes.insert(key, v.clone()),
            None => self.record.borrow_mut().attributes.remove(&key),
        };
        Ok(value)
    }
}

#[derive(Debug)]
struct TestPlugin {
    name: &'static str,
    dependencies: Vec<Dependency>,
}

impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        self.name
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies.clone()
    }
}

fn register_plugin(name: &'static str, dependencies: Vec<Dependency>) {
    plugin::register(Arc::new(TestPlugin { name, dependencies }));
}

fn at(locale: &str) -> AccessOptions {
    AccessOptions::new().locale(l(locale))
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_plain_backend_reads_what_was_written() {
    Memory::register("memory_plain");

    let mut post = ModelClass::new("Post");
    post.translates_with(
        pluggable(config(|_| {}), &["backend"]),
        AccessorMode::Accessor,
        &["title"],
        options(json!({ "backend": "memory_plain" })),
    )
    .unwrap();
    let record = Record::new(Arc::new(post));

    record.write("title", Some(json!("foo")), &at("en")).unwrap();

    assert_eq!(record.read("title", &at("en")).unwrap(), Some(json!("foo")));
    assert_eq!(record.read("title", &at("ja")).unwrap(), None);
}

#[test]
fn test_cache_sees_fallback_resolved_values() {
    let reads = Memory::register("memory_fallbacks");
    let config = config(|c| c.default_locale = l("de"));

    let mut post = ModelClass::new("Post");
    let translations = post
        .translates_with(
            pluggable(config, &["backend", "fallbacks", "cache"]),
            AccessorMode::Accessor,
            &["title"],
            options(json!({ "backend": "memory_fallbacks" })),
        )
        .unwrap();
    assert_eq!(
        translations.backend_class().unwrap().layer_names(),
        vec!["fallbacks", "cache"]
    );

    let record = Record::new(Arc::new(post));
    record.write("title", Some(json!("Titel")), &at("de")).unwrap();
    reads.store(0, Ordering::SeqCst);

    let first = locale::with_locale(l("en"), || record.read("title", &AccessOptions::new())).unwrap();
    assert_eq!(first, Some(json!("Titel")));
    assert_eq!(reads.load(Ordering::SeqCst), 2);

    let second = locale::with_locale(l("en"), || record.read("title", &AccessOptions::new())).unwrap();
    assert_eq!(second, Some(json!("Titel")));
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_after_dependency_on_included_plugin_conflicts() {
    register_plugin("scenario_bar", vec![]);
    register_plugin(
        "scenario_foo",
        vec![Dependency::requires("scenario_bar", LoadOrder::After)],
    );

    let mut pluggable = Pluggable::new(config(|_| {})).named("TestTranslations");
    pluggable
        .plugins(|dsl| {
            dsl.plugin("scenario_bar")?;
            Ok(())
        })
        .unwrap();

    let err = pluggable
        .plugins(|dsl| {
            dsl.plugin("scenario_foo")?;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, PluginError::DependencyConflict { .. }));
    assert_eq!(
        err.to_string(),
        "'scenario_bar' plugin must come after 'scenario_foo' plugin"
    );
    assert!(!pluggable.includes("scenario_foo"));
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn test_resolution_is_deterministic() {
    let names = || {
        Pluggable::from_config(config(|_| {}))
            .unwrap()
            .included_plugins()
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>()
    };

    let first = names();
    assert_eq!(first, names());
    assert_eq!(first.first().map(String::as_str), Some("backend"));
    assert_eq!(first.len(), Config::default().plugins.len());
}

const BUILTIN: &[&str] = &[
    "backend",
    "query",
    "cache",
    "fallbacks",
    "presence",
    "default",
    "dirty",
    "locale_accessors",
    "fallthrough_accessors",
];

fn resolved(requested: &[&str]) -> Vec<String> {
    pluggable(config(|_| {}), requested)
        .included_plugins()
        .iter()
        .map(|p| p.name().to_string())
        .collect()
}

proptest! {
    #[test]
    fn test_any_request_order_resolves_deterministically(
        requested in prop::sample::subsequence(BUILTIN.to_vec(), 1..=BUILTIN.len()).prop_shuffle()
    ) {
        let first = resolved(&requested);
        prop_assert_eq!(&first, &resolved(&requested));
        prop_assert_eq!(first.first().map(String::as_str), Some("backend"));
        for name in &requested {
            prop_assert!(first.iter().any(|n| n == name));
        }
    }
}

#[test]
fn test_mutual_dependencies_are_cyclic() {
    register_plugin("cycle_beta", vec![Dependency::before("cycle_alpha")]);
    register_plugin("cycle_alpha", vec![Dependency::before("cycle_beta")]);

    let mut pluggable = Pluggable::new(config(|_| {})).named("TestTranslations");
    let err = pluggable
        .plugins(|dsl| {
            dsl.plugin("cycle_beta")?;
            Ok(())
        })
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Dependencies cannot be resolved between: cycle_alpha, cycle_beta in TestTranslations"
    );
    assert!(pluggable.included_plugins().is_empty());
}

#[test]
fn test_rerequesting_included_plugin_is_noop() {
    let mut pluggable = Pluggable::new(config(|_| {}));
    pluggable
        .plugins(|dsl| {
            dsl.plugin("cache")?;
            Ok(())
        })
        .unwrap();
    let count = pluggable.included_plugins().len();

    pluggable
        .plugins(|dsl| {
            dsl.plugin("cache")?.plugin("backend")?;
            Ok(())
        })
        .unwrap();

    assert_eq!(pluggable.included_plugins().len(), count);
}

// =============================================================================
// Records
// =============================================================================

#[test]
fn test_backend_instances_are_memoized_per_record() {
    let mut post = ModelClass::new("Post");
    post.translates_with(
        pluggable(config(|_| {}), &["backend", "cache"]),
        AccessorMode::Accessor,
        &["title"],
        options(json!({ "backend": "null" })),
    )
    .unwrap();
    let record = Record::new(Arc::new(post));

    let first = record.backend_for("title").unwrap();
    let again = record.backend_for(":title").unwrap();
    assert!(first.ptr_eq(&again));
    assert_eq!(first, again);

    let copy = record.dup();
    let copied = copy.backend_for("title").unwrap();
    assert!(!first.ptr_eq(&copied));
    assert_ne!(first, copied);
}

#[test]
fn test_locales_outside_available_locales_are_rejected() {
    let config = config(|c| c.available_locales = vec![l("en"), l("pt-BR")]);

    let mut post = ModelClass::new("Post");
    post.translates_with(
        pluggable(config, &["backend"]),
        AccessorMode::Accessor,
        &["title"],
        options(json!({ "backend": "column" })),
    )
    .unwrap();
    let record = Record::new(Arc::new(post));

    let err = record.read("title", &at("ja")).unwrap_err();
    assert!(matches!(
        err,
        Error::Attribute(AttributeError::InvalidLocale { .. })
    ));

    record
        .write("title", Some(json!("Olá")), &at(":pt-BR"))
        .unwrap();
    assert_eq!(record.read("title", &at("pt-BR")).unwrap(), Some(json!("Olá")));
}

#[test]
fn test_default_plugins_with_column_backend() {
    let config = config(|c| {
        c.default_backend = Some(json!("column"));
        c.available_locales = vec![l("en"), l("fr")];
    });
    let pluggable = Arc::new(Pluggable::from_config(config).unwrap());

    let mut post = ModelClass::new("Post");
    post.translates_with(
        pluggable,
        AccessorMode::Accessor,
        &["title"],
        options(json!({ "default": "Untitled" })),
    )
    .unwrap();
    assert!(post.column_type("title_fr").is_some());
    assert!(post.accessor("title_en=").is_some());

    let post = Arc::new(post);
    let record = Record::new(post.clone());

    record.set("title_en", "Hello").unwrap();
    assert_eq!(record.attribute("title_en"), Some(json!("Hello")));
    assert_eq!(record.get("title_en").unwrap(), Some(json!("Hello")));
    assert_eq!(record.get("title_fr").unwrap(), Some(json!("Hello")));
    assert!(record.present("title_fr").unwrap());

    // explicit locales skip fallbacks
    assert_eq!(record.read("title", &at("fr")).unwrap(), Some(json!("Untitled")));

    record.set("title_en", "").unwrap();
    assert_eq!(record.get("title_en").unwrap(), Some(json!("Untitled")));

    let err = record.get("content").unwrap_err();
    assert_eq!(err.to_string(), "Post has no accessor 'content'");
}

#[test]
fn test_reader_mode_rejects_writes() {
    let mut post = ModelClass::new("Post");
    post.translates_with(
        pluggable(config(|_| {}), &["backend", "fallthrough_accessors"]),
        AccessorMode::Reader,
        &["title"],
        options(json!({ "backend": "column" })),
    )
    .unwrap();
    assert!(post.accessor("title=").is_none());

    let record = Record::new(Arc::new(post));
    let err = record.write("title", Some(json!("x")), &at("en")).unwrap_err();
    assert!(matches!(
        err,
        Error::Attribute(AttributeError::AccessDenied { .. })
    ));
    assert!(record.set("title_de", "x").is_err());
    assert_eq!(record.get("title_de").unwrap(), None);
}

#[test]
fn test_dirty_tracking_per_locale() {
    let config = config(|c| c.available_locales = vec![l("en"), l("pt-BR")]);

    let mut post = ModelClass::new("Post");
    post.translates_with(
        pluggable(config, &["backend", "dirty"]),
        AccessorMode::Accessor,
        &["title"],
        options(json!({ "backend": "column" })),
    )
    .unwrap();
    let record = Record::new(Arc::new(post));

    record.set("title_en", "First").unwrap();
    record.clear_changes();
    assert!(!record.has_changes());

    record.set("title_en", "Second").unwrap();
    record.set("title_pt_br", "Segundo").unwrap();

    assert_eq!(record.changed(), vec!["title_en", "title_pt_br"]);
    assert!(record.attribute_changed("title"));
    assert_eq!(
        record.attribute_was("title", &l("en")).unwrap(),
        Some(json!("First"))
    );

    record.restore_attribute("title", &l("en")).unwrap();
    assert_eq!(record.get("title_en").unwrap(), Some(json!("First")));
    assert_eq!(record.changed(), vec!["title_pt_br"]);

    record.clear_changes();
    assert!(!record.has_changes());
    assert_eq!(
        record.previous_changes()["title_pt_br"],
        (None, Some(json!("Segundo")))
    );
}

#[test]
fn test_writer_mode_tracks_previous_values() {
    let mut post = ModelClass::new("Post");
    post.translates_with(
        pluggable(config(|_| {}), &["backend", "dirty"]),
        AccessorMode::Writer,
        &["title"],
        options(json!({ "backend": "column" })),
    )
    .unwrap();
    let record = Record::new(Arc::new(post));

    record
        .write("title", Some(json!("First")), &at("en"))
        .unwrap();
    record.clear_changes();
    assert_eq!(
        record.attribute_was("title", &l("en")).unwrap(),
        Some(json!("First"))
    );

    record
        .write("title", Some(json!("Second")), &at("en"))
        .unwrap();
    assert!(record.attribute_changed("title"));
    assert_eq!(
        record.attribute_was("title", &l("en")).unwrap(),
        Some(json!("First"))
    );
    assert!(record.read("title", &at("en")).is_err());
}

#[test]
fn test_inherited_attribute_sets_are_shared() {
    let mut post = ModelClass::new("Post");
    post.translates_with(
        pluggable(config(|_| {}), &["backend"]),
        AccessorMode::Accessor,
        &["title"],
        options(json!({ "backend": "column" })),
    )
    .unwrap();

    let mut article = ModelClass::inherit(&post, "Article");
    article
        .translates_with(
            pluggable(config(|_| {}), &["backend"]),
            AccessorMode::Accessor,
            &["summary"],
            options(json!({ "backend": "column" })),
        )
        .unwrap();

    assert_eq!(post.translated_attribute_names(), vec!["title"]);
    assert_eq!(article.translated_attribute_names(), vec!["title", "summary"]);
    assert!(Arc::ptr_eq(
        &post.translations()[0],
        &article.translations()[0]
    ));
    assert_eq!(article.table_name(), "posts");
    assert_eq!(article.base_name(), "Post");
}
