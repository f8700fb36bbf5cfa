//! Blank values read and write as nil unless the call passes
//! [`AccessOptions::without_presence`].

use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::{is_blank, AccessOptions, Backend, BackendLayer};
use crate::config::Config;
use crate::locale::Locale;
use crate::model::RecordRef;
use crate::plugin::protocol::{enabled, Dependency, IncludeContext, Plugin};
use crate::Result;

#[derive(Debug)]
pub struct Presence;

impl Plugin for Presence {
    fn name(&self) -> &str {
        "presence"
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
        Ok(Some(Arc::new(PresenceLayer)))
    }
}

#[derive(Debug)]
struct PresenceLayer;

impl BackendLayer for PresenceLayer {
    fn name(&self) -> &str {
        "presence"
    }

    fn wrap(&self, inner: Rc<dyn Backend>, _record: &RecordRef, _attribute: &str) -> Rc<dyn Backend> {
        Rc::new(Present { inner })
    }
}

#[derive(Debug)]
struct Present {
    inner: Rc<dyn Backend>,
}

impl Backend for Present {
    fn read(&self, locale: &Locale, options: &AccessOptions) -> Result<Option<Value>> {
        let value = self.inner.read(locale, options)?;
        if options.skip_presence || !is_blank(value.as_ref()) {
            Ok(value)
        } else {
            Ok(None)
        }
    }

    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        options: &AccessOptions,
    ) -> Result<Option<Value>> {
        let value = if options.skip_presence || !is_blank(value.as_ref()) {
            value
        } else {
            None
        };
        self.inner.write(locale, value, options)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        self.inner.locales()
    }

    fn clear_cache(&self) {
        self.inner.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::builtin::testing::{l, Memory};
    use serde_json::json;

    #[test]
    fn blank_strings_become_nil() {
        let memory = Rc::new(Memory::with(&[("en", json!("  "))]));
        let backend = PresenceLayer.wrap(memory.clone(), &RecordRef::default(), "title");

        assert_eq!(backend.read(&l("en"), &AccessOptions::new()).unwrap(), None);

        let raw = AccessOptions::new().without_presence();
        assert_eq!(backend.read(&l("en"), &raw).unwrap(), Some(json!("  ")));

        backend.write(&l("de"), Some(json!("")), &AccessOptions::new()).unwrap();
        assert!(!memory.values.borrow().contains_key(&l("de")));
    }
}
