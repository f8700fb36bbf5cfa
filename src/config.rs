//! Configuration handling
//!
//! Configuration is assembled from defaults, an optional global file at
//! `~/.config/transattr/config.toml` and programmatic overrides through
//! [`configure`]. Composed plugin types capture an `Arc<Config>` snapshot
//! when they are built, so changing the global configuration never alters
//! models that were already declared.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::attributes::AttributeError;
use crate::locale::{FallbackChain, Locale};
use crate::Options;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Default options cannot set reserved key '{0}'")]
    ReservedOptionKey(String),
}

/// Option keys that plugins may never claim as defaults
pub const RESERVED_OPTION_KEYS: &[&str] = &["backend", "model_class"];

/// Top-level keys understood by [`Config`]
const KNOWN_KEYS: &[&str] = &[
    "default_backend",
    "default_options",
    "accessor_method",
    "query_method",
    "default_locale",
    "available_locales",
    "enforce_available_locales",
    "default_accessor_locales",
    "fallbacks",
    "plugins",
];

/// Global configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend used when an attribute set does not name one
    /// (`"key_value"` or `["key_value", { type = "string" }]`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<Value>,

    /// Plugin name -> default option value
    pub default_options: Options,

    /// Name of the declaration entry point
    pub accessor_method: String,

    /// Name of the query scope registered by the `query` plugin
    pub query_method: String,

    /// Locale used when no thread-local locale is set
    pub default_locale: Locale,

    /// Locales readers and writers accept (empty accepts any)
    pub available_locales: Vec<Locale>,

    /// Reject locales outside `available_locales`
    pub enforce_available_locales: bool,

    /// Locales for generated locale accessors (empty means `available_locales`)
    pub default_accessor_locales: Vec<Locale>,

    /// Explicit fallback map used by [`Config::default_fallbacks`]
    pub fallbacks: BTreeMap<Locale, Vec<Locale>>,

    /// Plugins composed into the default translations type, in request order
    pub plugins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_backend: None,
            default_options: Options::new(),
            accessor_method: "translates".to_string(),
            query_method: "i18n".to_string(),
            default_locale: Locale::from_static("en"),
            available_locales: Vec::new(),
            enforce_available_locales: true,
            default_accessor_locales: Vec::new(),
            fallbacks: BTreeMap::new(),
            plugins: [
                "backend",
                "query",
                "cache",
                "fallbacks",
                "presence",
                "default",
                "fallthrough_accessors",
                "locale_accessors",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Config {
    /// Loads configuration from the global config file, if present
    pub fn load() -> Result<Self> {
        let path = match Self::global_config_dir() {
            Some(dir) => dir.join("config.toml"),
            None => return Ok(Self::default()),
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::from_path(&path)
    }

    /// Loads configuration from a specific file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config: {}", path.display()))
    }

    /// Parses and validates configuration from TOML
    ///
    /// Unknown top-level keys are ignored with a warning.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        for key in table.keys().filter(|key| !KNOWN_KEYS.contains(&key.as_str())) {
            warn!(key = %key, "ignoring unknown configuration key");
        }

        let config: Config = toml::Value::Table(table)
            .try_into()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "transattr", "transattr")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Checks invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(key) = self
            .default_options
            .keys()
            .find(|key| RESERVED_OPTION_KEYS.contains(&key.as_str()))
        {
            return Err(ConfigError::ReservedOptionKey(key.clone()));
        }

        if self.accessor_method.trim().is_empty() {
            return Err(ConfigError::Invalid("accessor_method cannot be empty".into()));
        }

        if self.query_method.trim().is_empty() {
            return Err(ConfigError::Invalid("query_method cannot be empty".into()));
        }

        if !self.available_locales.is_empty()
            && self.enforce_available_locales
            && !self.available_locales.contains(&self.default_locale)
        {
            return Err(ConfigError::Invalid(format!(
                "default_locale '{}' is not in available_locales",
                self.default_locale
            )));
        }

        Ok(())
    }

    /// Fallback chain built from the configured map and the default locale
    pub fn default_fallbacks(&self) -> FallbackChain {
        self.new_fallbacks(self.fallbacks.clone())
    }

    /// Fallback chain for an explicit map, still ending in the default locale
    pub fn new_fallbacks(&self, map: BTreeMap<Locale, Vec<Locale>>) -> FallbackChain {
        FallbackChain::new(vec![self.default_locale.clone()], map)
    }

    /// Locales that get generated locale accessors by default
    pub fn accessor_locales(&self) -> Vec<Locale> {
        if !self.default_accessor_locales.is_empty() {
            self.default_accessor_locales.clone()
        } else if !self.available_locales.is_empty() {
            self.available_locales.clone()
        } else {
            vec![self.default_locale.clone()]
        }
    }

    /// Fails with `InvalidLocale` when `locale` is not permitted
    pub fn enforce_locale(&self, locale: &Locale) -> Result<(), AttributeError> {
        if !self.enforce_available_locales
            || self.available_locales.is_empty()
            || self.available_locales.contains(locale)
        {
            return Ok(());
        }

        Err(AttributeError::InvalidLocale {
            locale: locale.clone(),
            available: self.available_locales.clone(),
        })
    }
}

fn global_cell() -> &'static RwLock<Arc<Config>> {
    static GLOBAL: OnceLock<RwLock<Arc<Config>>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(Arc::new(Config::default())))
}

/// Snapshot of the process-wide configuration
pub fn global() -> Arc<Config> {
    global_cell()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Updates the process-wide configuration
///
/// Model definition is not synchronized: callers defining models from
/// several threads must serialize configuration and declaration themselves.
pub fn configure(f: impl FnOnce(&mut Config)) -> Result<(), ConfigError> {
    let mut config = (*global()).clone();
    f(&mut config);
    config.validate()?;

    let mut slot = global_cell()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Arc::new(config);
    Ok(())
}
