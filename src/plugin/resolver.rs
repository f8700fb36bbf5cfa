//! Plugin resolution
//!
//! A [`Pluggable`] is the composed type that plugins are included into.
//! [`Pluggable::plugins`] evaluates a declarative block of plugin requests,
//! builds a [`DependencyTree`] from their declared dependencies and appends
//! the resulting inclusion order in one step.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::graph::DependencyTree;
use super::protocol::{LoadOrder, Plugin};
use super::PluginRef;
use crate::config::Config;
use crate::registry::{same, RegistryError};
use crate::Options;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    Load(#[from] RegistryError),

    #[error("Dependencies cannot be resolved between: {}{}", .participants.join(", "), in_target(.target))]
    CyclicDependency {
        participants: Vec<String>,
        target: Option<String>,
    },

    #[error("'{dependency}' plugin must come after '{plugin}' plugin")]
    DependencyConflict { plugin: String, dependency: String },

    #[error("Invalid option for '{plugin}' plugin: {message}")]
    InvalidOption { plugin: String, message: String },
}

fn in_target(target: &Option<String>) -> String {
    target
        .as_ref()
        .map(|name| format!(" in {}", name))
        .unwrap_or_default()
}

/// Receiver of a declarative plugin block
///
/// Each request loads the plugin by name and records its default: an
/// explicit value always wins, otherwise the plugin's own default is used
/// unless the defaults map already has an entry.
pub struct PluginDsl<'a> {
    config: &'a Config,
    defaults: &'a mut Options,
    requested: Vec<Arc<dyn Plugin>>,
}

impl<'a> PluginDsl<'a> {
    fn new(config: &'a Config, defaults: &'a mut Options) -> Self {
        Self {
            config,
            defaults,
            requested: Vec::new(),
        }
    }

    /// Requests a plugin with its default option value
    pub fn plugin(&mut self, plugin: impl Into<PluginRef>) -> Result<&mut Self, PluginError> {
        self.request(plugin.into(), None)
    }

    /// Requests a plugin and sets its default option value
    pub fn plugin_with(
        &mut self,
        plugin: impl Into<PluginRef>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, PluginError> {
        self.request(plugin.into(), Some(value.into()))
    }

    fn request(&mut self, plugin: PluginRef, value: Option<Value>) -> Result<&mut Self, PluginError> {
        let plugin = super::load(plugin)?;
        let key = plugin.name().to_string();

        match value {
            Some(value) => {
                self.defaults.insert(key, value);
            }
            None => {
                if !self.defaults.contains_key(&key) {
                    if let Some(default) = plugin.default_value(self.config) {
                        self.defaults.insert(key, default);
                    }
                }
            }
        }

        if !self.requested.iter().any(|p| same(p, &plugin)) {
            self.requested.push(plugin);
        }

        Ok(self)
    }
}

/// A composed type that plugins are included into
#[derive(Debug, Clone)]
pub struct Pluggable {
    /// Name used in error messages
    name: Option<String>,

    /// Configuration snapshot taken when the type was created
    config: Arc<Config>,

    /// Plugins in inclusion order (first entry sits deepest)
    included: Vec<Arc<dyn Plugin>>,

    /// Plugin name -> default option value
    defaults: Options,
}

impl Pluggable {
    /// Creates an empty composed type
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            name: None,
            config,
            included: Vec::new(),
            defaults: Options::new(),
        }
    }

    /// Sets the name reported in resolution errors
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the default composed type from a configuration
    ///
    /// Includes `config.plugins` in order, then applies
    /// `config.default_options` over the plugin defaults.
    pub fn from_config(config: Arc<Config>) -> Result<Self, PluginError> {
        let mut pluggable = Self::new(config.clone()).named("Translations");
        pluggable.plugins(|dsl| {
            for name in &config.plugins {
                dsl.plugin(name.as_str())?;
            }
            Ok(())
        })?;

        for (key, value) in &config.default_options {
            pluggable.defaults.insert(key.clone(), value.clone());
        }

        Ok(pluggable)
    }

    /// Resolves a block of plugin requests and includes the result
    ///
    /// Nothing changes if resolution fails.
    pub fn plugins<F>(&mut self, block: F) -> Result<(), PluginError>
    where
        F: FnOnce(&mut PluginDsl<'_>) -> Result<(), PluginError>,
    {
        let mut defaults = self.defaults.clone();
        let requested = {
            let config = self.config.clone();
            let mut dsl = PluginDsl::new(&config, &mut defaults);
            block(&mut dsl)?;
            dsl.requested
        };

        let order = DependencyResolver::new(self).resolve(&requested)?;
        debug!(
            target_type = self.name.as_deref().unwrap_or("anonymous"),
            order = ?order.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "resolved plugin inclusion order"
        );

        self.included.extend(order);
        self.defaults = defaults;
        Ok(())
    }

    /// Plugins in inclusion order
    pub fn included_plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.included
    }

    /// Returns true if a plugin with this name has been included
    pub fn includes(&self, name: &str) -> bool {
        self.included.iter().any(|p| p.name() == name)
    }

    /// Returns true if every dependency of `plugin` has been included
    ///
    /// Dependencies the resolver includes itself are always present, so in
    /// practice this decides whether `Exclude` dependencies were supplied
    /// by some other request.
    pub fn dependencies_satisfied(&self, plugin: &dyn Plugin) -> bool {
        plugin
            .dependencies()
            .iter()
            .all(|dep| self.includes(&dep.name))
    }

    /// Plugin name -> default option value
    pub fn defaults(&self) -> &Options {
        &self.defaults
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Computes a safe inclusion order for requested plugins
struct DependencyResolver<'a> {
    pluggable: &'a Pluggable,
}

impl<'a> DependencyResolver<'a> {
    fn new(pluggable: &'a Pluggable) -> Self {
        Self { pluggable }
    }

    fn resolve(&self, requested: &[Arc<dyn Plugin>]) -> Result<Vec<Arc<dyn Plugin>>, PluginError> {
        let mut tree = DependencyTree::new();
        let mut visited: Vec<String> = Vec::new();

        for plugin in requested {
            self.traverse(&mut tree, plugin.clone(), &mut visited)?;
        }

        tree.inclusion_order()
            .map_err(|participants| PluginError::CyclicDependency {
                participants,
                target: self.pluggable.name.clone(),
            })
    }

    fn traverse(
        &self,
        tree: &mut DependencyTree,
        plugin: Arc<dyn Plugin>,
        visited: &mut Vec<String>,
    ) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        if self.pluggable.includes(&name) || visited.contains(&name) {
            return Ok(());
        }

        visited.push(name);
        tree.add(plugin.clone());

        for dep in plugin.dependencies() {
            if !dep.load_order.includes() {
                continue;
            }

            let dependency = super::load(dep.name.as_str())?;
            let already_included = self.pluggable.includes(dependency.name());

            match dep.load_order {
                LoadOrder::After if already_included => {
                    return Err(PluginError::DependencyConflict {
                        plugin: plugin.name().to_string(),
                        dependency: dependency.name().to_string(),
                    });
                }
                LoadOrder::After => tree.add_ordering(plugin.clone(), dependency.clone()),
                LoadOrder::Before if !already_included => {
                    tree.add_ordering(dependency.clone(), plugin.clone())
                }
                _ => {}
            }

            self.traverse(tree, dependency, visited)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{register, Dependency};
    use serde_json::json;

    #[derive(Debug)]
    struct TestPlugin {
        name: &'static str,
        dependencies: Vec<Dependency>,
        default: Option<Value>,
    }

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn dependencies(&self) -> Vec<Dependency> {
            self.dependencies.clone()
        }

        fn default_value(&self, _config: &Config) -> Option<Value> {
            self.default.clone()
        }
    }

    fn define(name: &'static str, dependencies: Vec<Dependency>) {
        register(Arc::new(TestPlugin {
            name,
            dependencies,
            default: None,
        }));
    }

    fn pluggable() -> Pluggable {
        Pluggable::new(Arc::new(Config::default())).named("TestTranslations")
    }

    fn included(pluggable: &Pluggable) -> Vec<&str> {
        pluggable.included_plugins().iter().map(|p| p.name()).collect()
    }

    #[test]
    fn before_dependency_sits_deeper() {
        define("res_store", vec![]);
        define("res_reader", vec![Dependency::before("res_store")]);

        let mut p = pluggable();
        p.plugins(|dsl| {
            dsl.plugin("res_reader")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(included(&p), vec!["res_store", "res_reader"]);
    }

    #[test]
    fn after_dependency_wraps_dependent() {
        define("res_inner", vec![Dependency::after("res_outer")]);
        define("res_outer", vec![]);

        let mut p = pluggable();
        p.plugins(|dsl| {
            dsl.plugin("res_outer")?.plugin("res_inner")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(included(&p), vec!["res_inner", "res_outer"]);
    }

    #[test]
    fn resolution_is_deterministic() {
        define("det_base", vec![]);
        define("det_a", vec![Dependency::before("det_base")]);
        define("det_b", vec![Dependency::before("det_base")]);
        define("det_c", vec![Dependency::before("det_a"), Dependency::after("det_b")]);

        let resolve = || {
            let mut p = pluggable();
            p.plugins(|dsl| {
                dsl.plugin("det_c")?.plugin("det_b")?.plugin("det_a")?;
                Ok(())
            })
            .unwrap();
            included(&p).iter().map(|s| s.to_string()).collect::<Vec<_>>()
        };

        let first = resolve();
        assert_eq!(first, resolve());
        assert_eq!(first, vec!["det_base", "det_a", "det_c", "det_b"]);
    }

    #[test]
    fn mutual_before_is_cyclic() {
        define("cyc_foo", vec![Dependency::before("cyc_bar")]);
        define("cyc_bar", vec![Dependency::before("cyc_foo")]);

        let mut p = pluggable();
        let err = p
            .plugins(|dsl| {
                dsl.plugin("cyc_foo")?;
                Ok(())
            })
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Dependencies cannot be resolved between: cyc_bar, cyc_foo in TestTranslations"
        );
        assert!(p.included_plugins().is_empty());
    }

    #[test]
    fn mutual_after_is_cyclic() {
        define("acyc_one", vec![Dependency::after("acyc_two")]);
        define("acyc_two", vec![Dependency::after("acyc_one")]);

        let mut p = Pluggable::new(Arc::new(Config::default()));
        let err = p
            .plugins(|dsl| {
                dsl.plugin("acyc_two")?;
                Ok(())
            })
            .unwrap_err();

        match err {
            PluginError::CyclicDependency {
                participants,
                target,
            } => {
                assert_eq!(participants, vec!["acyc_one", "acyc_two"]);
                assert!(target.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn after_dependency_already_included_conflicts() {
        define("conf_bar", vec![]);
        define("conf_foo", vec![Dependency::after("conf_bar")]);

        let mut p = pluggable();
        p.plugins(|dsl| {
            dsl.plugin("conf_bar")?;
            Ok(())
        })
        .unwrap();

        let err = p
            .plugins(|dsl| {
                dsl.plugin("conf_foo")?;
                Ok(())
            })
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "'conf_bar' plugin must come after 'conf_foo' plugin"
        );
        assert_eq!(included(&p), vec!["conf_bar"]);
    }

    #[test]
    fn requesting_included_plugin_is_noop() {
        define("idem_one", vec![]);

        let mut p = pluggable();
        for _ in 0..2 {
            p.plugins(|dsl| {
                dsl.plugin("idem_one")?.plugin("idem_one")?;
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(included(&p), vec!["idem_one"]);
    }

    #[test]
    fn before_dependency_from_earlier_pass_is_not_readded() {
        define("pass_base", vec![]);
        define("pass_top", vec![Dependency::before("pass_base")]);

        let mut p = pluggable();
        p.plugins(|dsl| {
            dsl.plugin("pass_base")?;
            Ok(())
        })
        .unwrap();
        p.plugins(|dsl| {
            dsl.plugin("pass_top")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(included(&p), vec!["pass_base", "pass_top"]);
    }

    #[test]
    fn excluded_dependency_controls_satisfaction() {
        define("opt_target", vec![]);
        define(
            "opt_user",
            vec![Dependency::requires("opt_target", LoadOrder::Exclude)],
        );

        let mut p = pluggable();
        p.plugins(|dsl| {
            dsl.plugin("opt_user")?;
            Ok(())
        })
        .unwrap();

        let user = crate::plugin::load("opt_user").unwrap();
        assert_eq!(included(&p), vec!["opt_user"]);
        assert!(!p.dependencies_satisfied(user.as_ref()));

        p.plugins(|dsl| {
            dsl.plugin("opt_target")?;
            Ok(())
        })
        .unwrap();
        assert!(p.dependencies_satisfied(user.as_ref()));
    }

    #[test]
    fn defaults_are_registered_once() {
        register(Arc::new(TestPlugin {
            name: "def_plugin",
            dependencies: vec![],
            default: Some(json!("builtin")),
        }));

        let mut p = pluggable();
        p.plugins(|dsl| {
            dsl.plugin_with("def_plugin", "explicit")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(p.defaults().get("def_plugin"), Some(&json!("explicit")));

        p.plugins(|dsl| {
            dsl.plugin("def_plugin")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(p.defaults().get("def_plugin"), Some(&json!("explicit")));
    }

    #[test]
    fn unknown_plugin_fails_to_load() {
        let mut p = pluggable();
        let err = p
            .plugins(|dsl| {
                dsl.plugin("no_such_plugin")?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, PluginError::Load(_)));
    }
}
