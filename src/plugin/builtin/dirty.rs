//! Dirty tracking
//!
//! Every write records the value it replaced in the record's
//! [`ChangeSet`](crate::model::ChangeSet), keyed by `title_en`-style names.
//! Writing the original value back removes the change.

use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::{AccessOptions, Backend, BackendLayer};
use crate::config::Config;
use crate::locale::Locale;
use crate::model::RecordRef;
use crate::plugin::protocol::{enabled, Dependency, IncludeContext, LoadOrder, Plugin};
use crate::Result;

#[derive(Debug)]
pub struct Dirty;

impl Plugin for Dirty {
    fn name(&self) -> &str {
        "dirty"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![
            Dependency::before("backend"),
            Dependency::requires("fallthrough_accessors", LoadOrder::Include),
        ]
    }

    fn default_value(&self, _config: &Config) -> Option<Value> {
        Some(Value::Bool(true))
    }

    fn backend_layer(&self, ctx: &IncludeContext<'_>) -> Result<Option<Arc<dyn BackendLayer>>> {
        if !enabled(ctx.option(self.name())) {
            return Ok(None);
        }
        Ok(Some(Arc::new(DirtyLayer)))
    }
}

#[derive(Debug)]
struct DirtyLayer;

impl BackendLayer for DirtyLayer {
    fn name(&self) -> &str {
        "dirty"
    }

    fn wrap(&self, inner: Rc<dyn Backend>, record: &RecordRef, attribute: &str) -> Rc<dyn Backend> {
        Rc::new(Tracked {
            inner,
            record: record.clone(),
            attribute: attribute.to_string(),
        })
    }
}

#[derive(Debug)]
struct Tracked {
    inner: Rc<dyn Backend>,
    record: RecordRef,
    attribute: String,
}

impl Backend for Tracked {
    fn read(&self, locale: &Locale, options: &AccessOptions) -> Result<Option<Value>> {
        self.inner.read(locale, options)
    }

    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        options: &AccessOptions,
    ) -> Result<Option<Value>> {
        let stored = AccessOptions::new().without_fallback().with_default(Value::Null);
        let before = self.inner.read(locale, &stored)?;
        let after = self.inner.write(locale, value, options)?;

        self.record
            .borrow_mut()
            .changes
            .track(&self.attribute, locale, before, after.clone());
        Ok(after)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        self.inner.locales()
    }

    fn clear_cache(&self) {
        self.inner.clear_cache();
    }
}
