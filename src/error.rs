//! Crate-level error type
//!
//! Each module declares its own error enum; [`Error`] aggregates them so the
//! public entry points can return a single `Result`.

use thiserror::Error;

use crate::attributes::AttributeError;
use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::locale::LocaleError;
use crate::plugin::PluginError;
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Attribute(#[from] AttributeError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Locale(#[from] LocaleError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
