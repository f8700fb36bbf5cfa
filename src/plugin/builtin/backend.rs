use serde_json::Value;

use crate::attributes::Translations;
use crate::backend;
use crate::config::Config;
use crate::plugin::protocol::Plugin;
use crate::Result;

/// Holds the backend spec of an attribute set
#[derive(Debug)]
pub struct BackendPlugin;

impl Plugin for BackendPlugin {
    fn name(&self) -> &str {
        "backend"
    }

    fn default_value(&self, config: &Config) -> Option<Value> {
        config.default_backend.clone()
    }

    fn on_initialize(&self, translations: &mut Translations) -> Result<()> {
        let spec = translations.backend_spec()?;
        backend::load(spec.name.as_str())?;
        Ok(())
    }
}
