//! Built-in plugins
//!
//! Registered lazily: the registry stores a loader per name and creates the
//! plugin the first time it is requested.

mod accessors;
mod backend;
mod cache;
mod default;
mod dirty;
mod fallbacks;
mod presence;
mod query;

use std::sync::Arc;

pub use accessors::{FallthroughAccessors, LocaleAccessors};
pub use backend::BackendPlugin;
pub use cache::Cache;
pub use default::DefaultValue;
pub use dirty::Dirty;
pub use fallbacks::Fallbacks;
pub use presence::Presence;
pub use query::QueryPlugin;

use super::protocol::Plugin;
use crate::registry::Registry;

pub(super) fn register_loaders(registry: &mut Registry<dyn Plugin>) {
    registry.register_loader("backend", |r| r.register("backend", Arc::new(BackendPlugin)));
    registry.register_loader("query", |r| r.register("query", Arc::new(QueryPlugin)));
    registry.register_loader("cache", |r| r.register("cache", Arc::new(Cache)));
    registry.register_loader("fallbacks", |r| r.register("fallbacks", Arc::new(Fallbacks)));
    registry.register_loader("presence", |r| r.register("presence", Arc::new(Presence)));
    registry.register_loader("default", |r| r.register("default", Arc::new(DefaultValue)));
    registry.register_loader("dirty", |r| r.register("dirty", Arc::new(Dirty)));
    registry.register_loader("locale_accessors", |r| {
        r.register("locale_accessors", Arc::new(LocaleAccessors))
    });
    registry.register_loader("fallthrough_accessors", |r| {
        r.register("fallthrough_accessors", Arc::new(FallthroughAccessors))
    });
}

/// In-memory backend shared by the layer tests
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    use serde_json::Value;

    use crate::backend::{AccessOptions, Backend};
    use crate::locale::Locale;
    use crate::Result;

    #[derive(Debug, Default)]
    pub(crate) struct Memory {
        pub values: RefCell<HashMap<Locale, Value>>,
        pub reads: Cell<usize>,
    }

    impl Memory {
        pub fn with(values: &[(&str, Value)]) -> Self {
            let memory = Self::default();
            for (locale, value) in values {
                memory
                    .values
                    .borrow_mut()
                    .insert(locale.parse().unwrap(), value.clone());
            }
            memory
        }
    }

    impl Backend for Memory {
        fn read(&self, locale: &Locale, _options: &AccessOptions) -> Result<Option<Value>> {
            self.reads.set(self.reads.get() + 1);
            Ok(self.values.borrow().get(locale).cloned())
        }

        fn write(
            &self,
            locale: &Locale,
            value: Option<Value>,
            _options: &AccessOptions,
        ) -> Result<Option<Value>> {
            match &value {
                Some(v) => self.values.borrow_mut().insert(locale.clone(), v.clone()),
                None => self.values.borrow_mut().remove(locale),
            };
            Ok(value)
        }

        fn locales(&self) -> Result<Vec<Locale>> {
            Ok(self.values.borrow().keys().cloned().collect())
        }
    }

    pub(crate) fn l(s: &str) -> Locale {
        s.parse().unwrap()
    }
}
