//! Fallback locales
//!
//! A read that yields a blank value tries the next locale of the chain. The
//! option is `true` (configured chain), a map such as
//! `{"en": ["de"], "pt-BR": "pt"}` (explicit chain) or `false` (off).
//! Per call, [`Fallback::Disabled`] or an explicit locale reads one locale
//! only and [`Fallback::Locales`] replaces the chain.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::{is_blank, AccessOptions, Backend, BackendLayer, Fallback};
use crate::config::Config;
use crate::locale::{FallbackChain, Locale};
use crate::model::RecordRef;
use crate::plugin::protocol::{Dependency, IncludeContext, Plugin};
use crate::plugin::PluginError;
use crate::Result;

#[derive(Debug)]
pub struct Fallbacks;

impl Fallbacks {
    fn parse_map(&self, map: &serde_json::Map<String, Value>) -> Result<BTreeMap<Locale, Vec<Locale>>> {
        let invalid = |message: String| PluginError::InvalidOption {
            plugin: self.name().to_string(),
            message,
        };

        let mut fallbacks = BTreeMap::new();
        for (locale, targets) in map {
            let targets = match targets {
                Value::String(target) => vec![target.parse::<Locale>()?],
                Value::Array(items) => items
                    .iter()
                    .map(|item| -> Result<Locale> {
                        match item {
                            Value::String(target) => Ok(target.parse::<Locale>()?),
                            other => {
                                Err(invalid(format!("expected a locale, got {}", other)).into())
                            }
                        }
                    })
                    .collect::<Result<Vec<Locale>>>()?,
                other => {
                    return Err(invalid(format!(
                        "fallbacks for '{}' must be a locale or a list, got {}",
                        locale, other
                    ))
                    .into())
                }
            };
            fallbacks.insert(locale.parse::<Locale>()?, targets);
        }
        Ok(fallbacks)
    }
}

impl Plugin for Fallbacks {
    fn name(&self) -> &str {
        "fallbacks"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::before("backend")]
    }

    fn default_value(&self, _config: &Config) -> Option<Value> {
        Some(Value::Bool(true))
    }

    fn backend_layer(&self, ctx: &IncludeContext<'_>) -> Result<Option<Arc<dyn BackendLayer>>> {
        let config = ctx.translations.config();
        let chain = match ctx.option(self.name()) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => return Ok(None),
            Some(Value::Object(map)) => config.new_fallbacks(self.parse_map(map)?),
            Some(_) => config.default_fallbacks(),
        };
        Ok(Some(Arc::new(FallbacksLayer { chain })))
    }
}

#[derive(Debug)]
struct FallbacksLayer {
    chain: FallbackChain,
}

impl BackendLayer for FallbacksLayer {
    fn name(&self) -> &str {
        "fallbacks"
    }

    fn wrap(&self, inner: Rc<dyn Backend>, _record: &RecordRef, _attribute: &str) -> Rc<dyn Backend> {
        Rc::new(WithFallbacks {
            inner,
            chain: self.chain.clone(),
        })
    }
}

#[derive(Debug)]
struct WithFallbacks {
    inner: Rc<dyn Backend>,
    chain: FallbackChain,
}

impl Backend for WithFallbacks {
    fn read(&self, locale: &Locale, options: &AccessOptions) -> Result<Option<Value>> {
        if options.locale.is_some() {
            return self.inner.read(locale, options);
        }

        let locales = match &options.fallback {
            Fallback::Disabled => return self.inner.read(locale, options),
            Fallback::Configured => self.chain.chain(locale),
            Fallback::Locales(locales) => std::iter::once(locale.clone())
                .chain(locales.iter().cloned())
                .collect(),
        };

        let mut first = None;
        for (i, candidate) in locales.iter().enumerate() {
            let value = self.inner.read(candidate, options)?;
            if !is_blank(value.as_ref()) {
                return Ok(value);
            }
            if i == 0 {
                first = value;
            }
        }
        Ok(first)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::builtin::testing::{l, Memory};
    use serde_json::json;

    fn with_chain(memory: Rc<Memory>, map: &[(&str, &[&str])]) -> Rc<dyn Backend> {
        let map = map
            .iter()
            .map(|(k, v)| (l(k), v.iter().map(|s| l(s)).collect()))
            .collect();
        let layer = FallbacksLayer {
            chain: FallbackChain::new(vec![l("en")], map),
        };
        layer.wrap(memory, &RecordRef::default(), "title")
    }

    #[test]
    fn reads_first_present_value_of_chain() {
        let memory = Rc::new(Memory::with(&[("de", json!("Titel")), ("en", json!("Title"))]));
        let backend = with_chain(memory, &[("fr", &["de"])]);

        let value = backend.read(&l("fr"), &AccessOptions::new()).unwrap();
        assert_eq!(value, Some(json!("Titel")));

        let value = backend.read(&l("ja"), &AccessOptions::new()).unwrap();
        assert_eq!(value, Some(json!("Title")));
    }

    #[test]
    fn blank_values_fall_through() {
        let memory = Rc::new(Memory::with(&[("fr", json!("")), ("en", json!("Title"))]));
        let backend = with_chain(memory, &[]);

        let value = backend.read(&l("fr"), &AccessOptions::new()).unwrap();
        assert_eq!(value, Some(json!("Title")));
    }

    #[test]
    fn disabled_and_explicit_locale_read_one_locale() {
        let memory = Rc::new(Memory::with(&[("en", json!("Title"))]));
        let backend = with_chain(memory, &[]);

        let disabled = AccessOptions::new().without_fallback();
        assert_eq!(backend.read(&l("fr"), &disabled).unwrap(), None);

        let explicit = AccessOptions::new().locale(l("fr"));
        assert_eq!(backend.read(&l("fr"), &explicit).unwrap(), None);
    }

    #[test]
    fn per_call_locales_replace_chain() {
        let memory = Rc::new(Memory::with(&[("ja", json!("タイトル")), ("en", json!("Title"))]));
        let backend = with_chain(memory, &[]);

        let options = AccessOptions::new().fallback_to(vec![l("ja")]);
        assert_eq!(backend.read(&l("fr"), &options).unwrap(), Some(json!("タイトル")));
    }

    #[test]
    fn parses_fallback_maps() {
        let map = json!({ "pt-BR": "pt", "fr": ["de", "en"] });
        let parsed = Fallbacks.parse_map(map.as_object().unwrap()).unwrap();

        assert_eq!(parsed[&l("pt-BR")], vec![l("pt")]);
        assert_eq!(parsed[&l("fr")], vec![l("de"), l("en")]);

        let bad = json!({ "fr": 3 });
        assert!(Fallbacks.parse_map(bad.as_object().unwrap()).is_err());
    }
}
