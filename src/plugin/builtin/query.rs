use serde_json::Value;

use crate::config::Config;
use crate::plugin::protocol::{Dependency, IncludeContext, Plugin};
use crate::Result;

/// Registers the query scope on the model class
#[derive(Debug)]
pub struct QueryPlugin;

impl Plugin for QueryPlugin {
    fn name(&self) -> &str {
        "query"
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::before("backend")]
    }

    fn default_value(&self, config: &Config) -> Option<Value> {
        Some(Value::String(config.query_method.clone()))
    }

    fn on_included(&self, ctx: &mut IncludeContext<'_>) -> Result<()> {
        if let Some(Value::String(scope)) = ctx.option(self.name()) {
            let scope = scope.clone();
            ctx.model.register_scope(scope);
        }
        Ok(())
    }
}
