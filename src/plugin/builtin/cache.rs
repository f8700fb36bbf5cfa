//! Read cache
//!
//! Memoizes reads per locale on each backend instance. Any write clears the
//! whole cache, as do reloads, save completion and `clear_changes` through
//! [`Backend::clear_cache`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::{AccessOptions, Backend, BackendLayer};
use crate::config::Config;
use crate::locale::Locale;
use crate::model::RecordRef;
use crate::plugin::protocol::{enabled, Dependency, IncludeContext, Plugin};
use crate::Result;

#[derive(Debug)]
pub struct Cache;

impl Plugin for Cache {
    fn name(&self) -> &str {
        "cache"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::before("backend")]
    }

    fn default_value(&self, _config: &Config) -> Option<Value> {
        Some(Value::Bool(true))
    }

    fn backend_layer(&self, ctx: &IncludeContext<'_>) -> Result<Option<Arc<dyn BackendLayer>>> {
        if !enabled(ctx.option(self.name())) {
            return Ok(None);
        }
        Ok(Some(Arc::new(CacheLayer)))
    }
}

#[derive(Debug)]
struct CacheLayer;

impl BackendLayer for CacheLayer {
    fn name(&self) -> &str {
        "cache"
    }

    fn wrap(&self, inner: Rc<dyn Backend>, _record: &RecordRef, _attribute: &str) -> Rc<dyn Backend> {
        Rc::new(Cached {
            inner,
            entries: RefCell::default(),
        })
    }
}

/// Cache key: the locale and whether it was passed explicitly
type Key = (Locale, bool);

#[derive(Debug)]
struct Cached {
    inner: Rc<dyn Backend>,
    entries: RefCell<HashMap<Key, Option<Value>>>,
}

impl Backend for Cached {
    fn read(&self, locale: &Locale, options: &AccessOptions) -> Result<Option<Value>> {
        if !options.is_cacheable() {
            return self.inner.read(locale, options);
        }

        let key = (locale.clone(), options.locale.is_some());
        if let Some(value) = self.entries.borrow().get(&key) {
            return Ok(value.clone());
        }

        let value = self.inner.read(locale, options)?;
        self.entries.borrow_mut().insert(key, value.clone());
        Ok(value)
    }

    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        options: &AccessOptions,
    ) -> Result<Option<Value>> {
        self.entries.borrow_mut().clear();
        self.inner.write(locale, value, options)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        self.inner.locales()
    }

    fn clear_cache(&self) {
        self.entries.borrow_mut().clear();
        self.inner.clear_cache();
    }
}
