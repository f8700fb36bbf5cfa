//! Locale identifiers, the current-locale context and fallback chains
//!
//! Locales keep their original casing (`pt-BR`); accessor names use the
//! normalized suffix (`pt_br`).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LocaleError {
    #[error("Invalid locale: '{0}' (expected letters, digits, '-' or '_')")]
    Invalid(String),
}

/// A locale such as `en` or `pt-BR`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    /// Parses and validates a locale
    pub fn new(locale: impl AsRef<str>) -> Result<Self, LocaleError> {
        locale.as_ref().parse()
    }

    /// Builds a locale from a literal known to be valid
    pub(crate) fn from_static(locale: &'static str) -> Self {
        Self(locale.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalized form used in generated accessor names (`pt-BR` -> `pt_br`)
    pub fn accessor_suffix(&self) -> String {
        self.0.to_ascii_lowercase().replace('-', "_")
    }

    /// Rebuilds a locale from an accessor suffix (`pt_br` -> `pt-BR`)
    pub fn from_accessor_suffix(suffix: &str) -> Result<Self, LocaleError> {
        let locale = suffix
            .split('_')
            .enumerate()
            .map(|(i, part)| {
                if i == 0 {
                    part.to_string()
                } else {
                    part.to_ascii_uppercase()
                }
            })
            .collect::<Vec<_>>()
            .join("-");
        locale.parse()
    }

    /// Language parent of a regional locale (`pt-BR` -> `pt`)
    pub fn parent(&self) -> Option<Locale> {
        self.0
            .rsplit_once('-')
            .map(|(parent, _)| Locale(parent.to_string()))
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Locale {
    type Err = LocaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches(':');
        let valid = !s.is_empty()
            && !s.starts_with('-')
            && !s.ends_with('-')
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if !valid {
            return Err(LocaleError::Invalid(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Locale {
    type Error = LocaleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<&str> for Locale {
    type Error = LocaleError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.0
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Locale>> = const { RefCell::new(None) };
}

/// Returns the locale set for the current thread, if any
pub fn current() -> Option<Locale> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Sets (or clears) the locale for the current thread
pub fn set(locale: Option<Locale>) {
    CURRENT.with(|current| *current.borrow_mut() = locale);
}

/// Runs `f` with `locale` as the current locale, restoring the previous one afterwards
pub fn with_locale<T>(locale: Locale, f: impl FnOnce() -> T) -> T {
    struct Restore(Option<Locale>);

    impl Drop for Restore {
        fn drop(&mut self) {
            set(self.0.take());
        }
    }

    let _restore = Restore(current());
    set(Some(locale));
    f()
}

/// Ordered fallback locales, computed per locale
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackChain {
    defaults: Vec<Locale>,
    map: BTreeMap<Locale, Vec<Locale>>,
}

impl FallbackChain {
    pub fn new(defaults: Vec<Locale>, map: BTreeMap<Locale, Vec<Locale>>) -> Self {
        Self { defaults, map }
    }

    /// Locales to try for `locale`, most specific first
    ///
    /// Order: the locale and its parents, then each mapped fallback with its
    /// parents, then the defaults. Duplicates keep their first position.
    pub fn chain(&self, locale: &Locale) -> Vec<Locale> {
        fn push_with_parents(locale: &Locale, chain: &mut Vec<Locale>) {
            let mut next = Some(locale.clone());
            while let Some(l) = next {
                next = l.parent();
                if !chain.contains(&l) {
                    chain.push(l);
                }
            }
        }

        let mut chain = Vec::new();

        push_with_parents(locale, &mut chain);
        for mapped in self.map.get(locale).into_iter().flatten() {
            push_with_parents(mapped, &mut chain);
        }
        for default in &self.defaults {
            push_with_parents(default, &mut chain);
        }

        chain
    }
}
