//! Locale accessors
//!
//! `locale_accessors` registers `title_en`, `title_en?` and `title_en=` in
//! the model's accessor map for a fixed list of locales.
//! `fallthrough_accessors` lets the model resolve the same shapes for any
//! locale when the name is dispatched.

use serde_json::Value;

use crate::config::Config;
use crate::locale::Locale;
use crate::model::{Accessor, AccessorKind};
use crate::plugin::protocol::{enabled, Dependency, IncludeContext, Plugin};
use crate::plugin::PluginError;
use crate::Result;

#[derive(Debug)]
pub struct LocaleAccessors;

impl LocaleAccessors {
    fn locales(&self, ctx: &IncludeContext<'_>) -> Result<Vec<Locale>> {
        match ctx.option(self.name()) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| -> Result<Locale> {
                    match item {
                        Value::String(locale) => Ok(locale.parse::<Locale>()?),
                        other => Err(PluginError::InvalidOption {
                            plugin: self.name().to_string(),
                            message: format!("expected a locale, got {}", other),
                        }
                        .into()),
                    }
                })
                .collect(),
            _ => Ok(ctx.translations.config().accessor_locales()),
        }
    }
}

impl Plugin for LocaleAccessors {
    fn name(&self) -> &str {
        "locale_accessors"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::before("backend")]
    }

    fn default_value(&self, _config: &Config) -> Option<Value> {
        Some(Value::Bool(true))
    }

    fn on_included(&self, ctx: &mut IncludeContext<'_>) -> Result<()> {
        if !enabled(ctx.option(self.name())) {
            return Ok(());
        }

        let locales = self.locales(ctx)?;
        let translations = ctx.translations;
        let mode = translations.mode();

        for attribute in translations.names() {
            for locale in &locales {
                let name = format!("{}_{}", attribute, locale.accessor_suffix());
                let accessor = |kind| Accessor {
                    attribute: attribute.clone(),
                    kind,
                    locale: Some(locale.clone()),
                };

                if mode.reads() {
                    ctx.model.define_accessor(name.clone(), accessor(AccessorKind::Reader));
                    ctx.model
                        .define_accessor(format!("{}?", name), accessor(AccessorKind::Presence));
                }
                if mode.writes() {
                    ctx.model
                        .define_accessor(format!("{}=", name), accessor(AccessorKind::Writer));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FallthroughAccessors;

impl Plugin for FallthroughAccessors {
    fn name(&self) -> &str {
        "fallthrough_accessors"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::before("backend")]
    }

    fn default_value(&self, _config: &Config) -> Option<Value> {
        Some(Value::Bool(true))
    }

    fn on_included(&self, ctx: &mut IncludeContext<'_>) -> Result<()> {
        if !enabled(ctx.option(self.name())) {
            return Ok(());
        }

        for attribute in ctx.translations.names() {
            ctx.model.enable_fallthrough(attribute.clone());
        }
        Ok(())
    }
}
