use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::{AccessOptions, Backend, BackendLayer};
use crate::locale::Locale;
use crate::model::RecordRef;
use crate::plugin::protocol::{Dependency, IncludeContext, Plugin};
use crate::Result;

/// Substitutes a default when a read yields nil
///
/// The attribute set option is the default value. A per-call
/// [`AccessOptions::with_default`] overrides it; passing `null` there forces
/// nil even when the attribute set has a default.
#[derive(Debug)]
pub struct DefaultValue;

impl Plugin for DefaultValue {
    fn name(&self) -> &str {
        "default"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::before("backend")]
    }

    fn backend_layer(&self, ctx: &IncludeContext<'_>) -> Result<Option<Arc<dyn BackendLayer>>> {
        let default = ctx.option(self.name()).filter(|v| !v.is_null()).cloned();
        Ok(Some(Arc::new(DefaultLayer { default })))
    }
}

#[derive(Debug)]
struct DefaultLayer {
    default: Option<Value>,
}

impl BackendLayer for DefaultLayer {
    fn name(&self) -> &str {
        "default"
    }

    fn wrap(&self, inner: Rc<dyn Backend>, _record: &RecordRef, _attribute: &str) -> Rc<dyn Backend> {
        Rc::new(WithDefault {
            inner,
            default: self.default.clone(),
        })
    }
}

#[derive(Debug)]
struct WithDefault {
    inner: Rc<dyn Backend>,
    default: Option<Value>,
}

impl Backend for WithDefault {
    fn read(&self, locale: &Locale, options: &AccessOptions) -> Result<Option<Value>> {
        let value = self.inner.read(locale, options)?;
        if value.as_ref().is_some_and(|v| !v.is_null()) {
            return Ok(value);
        }

        Ok(match &options.default {
            Some(Value::Null) => None,
            Some(default) => Some(default.clone()),
            None => self.default.clone(),
        })
    }

    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        options: &AccessOptions,
    ) -> Result<Option<Value>> {
        self.inner.write(locale, value, options)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        self.inner.locales()
    }

    fn clear_cache(&self) {
        self.inner.clear_cache();
    }
}
