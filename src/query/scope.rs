//! The query scope registered by the `query` plugin

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::builder::Query;
use super::node::Node;
use super::visitor::JoinType;
use crate::attributes::AttributeError;
use crate::config;
use crate::locale::{self, Locale};
use crate::model::ModelClass;
use crate::{Options, Result};

/// Query over a model class that understands translated attributes
///
/// Conditions on translated attributes are turned into backend nodes; each
/// attribute set's backend then adds the joins the predicate needs.
#[derive(Debug, Clone)]
pub struct I18nScope {
    model: Arc<ModelClass>,
    locale: Locale,
    query: Query,
}

impl I18nScope {
    /// Scope at the current locale, else the configured default
    pub fn new(model: Arc<ModelClass>) -> Self {
        let locale = locale::current().unwrap_or_else(|| {
            model
                .translations()
                .first()
                .map(|set| set.config().default_locale.clone())
                .unwrap_or_else(|| config::global().default_locale.clone())
        });
        let query = Query::new(model.table_name());

        Self {
            model,
            locale,
            query,
        }
    }

    /// Switches the locale used for nodes built from here on
    pub fn locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn current_locale(&self) -> &Locale {
        &self.locale
    }

    pub fn model(&self) -> &Arc<ModelClass> {
        &self.model
    }

    /// Node for a translated attribute or a plain column
    pub fn attr(&self, name: &str) -> Result<Node> {
        if let Some(set) = self.model.translations_for(name) {
            let class = set.backend_class().ok_or_else(|| self.unknown_attribute(name))?;
            return Ok(class.build_node(name, &self.locale)?);
        }

        if name == "id" || self.model.column_type(name).is_some() {
            return Ok(Node::column(self.model.table_name(), name));
        }

        Err(self.unknown_attribute(name).into())
    }

    /// Adds equality conditions; arrays become `IN` lists and null matches
    /// missing values
    pub fn filter(self, conditions: Options) -> Result<Self> {
        let predicate = self.conditions(conditions)?;
        self.filter_by(predicate)
    }

    /// Adds negated equality conditions; no conditions excludes nothing
    pub fn exclude(self, conditions: Options) -> Result<Self> {
        if conditions.is_empty() {
            return Ok(self);
        }
        let predicate = self.conditions(conditions)?;
        self.filter_by(predicate.not())
    }

    /// Adds an arbitrary predicate, joining what it needs
    pub fn filter_by(mut self, predicate: Node) -> Result<Self> {
        for set in self.model.translations() {
            if let Some(class) = set.backend_class() {
                class.apply_scope(&mut self.query, &predicate, &self.locale)?;
            }
        }

        debug!(
            model = self.model.name(),
            locale = %self.locale,
            joins = self.query.joins().len(),
            "scoped predicate"
        );
        self.query.filter(predicate);
        Ok(self)
    }

    /// Orders by an attribute; translated attributes are OUTER joined so
    /// records without a translation stay in the result
    pub fn order_by(mut self, name: &str, descending: bool) -> Result<Self> {
        let node = self.attr(name)?;
        if let Some(class) = self
            .model
            .translations_for(name)
            .and_then(|set| set.backend_class())
        {
            class.ensure_join(&mut self.query, name, &self.locale, JoinType::Outer)?;
        }

        self.query.order_by(node, descending);
        Ok(self)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit(limit);
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn into_query(self) -> Query {
        self.query
    }

    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.query.to_sql()
    }

    fn conditions(&self, conditions: Options) -> Result<Node> {
        let mut predicate: Option<Node> = None;
        for (name, value) in conditions {
            let node = self.attr(&name)?;
            let condition = match value {
                Value::Array(items) => node.in_list(items),
                value => node.eq(value),
            };
            predicate = Some(match predicate {
                Some(p) => p.and(condition),
                None => condition,
            });
        }
        Ok(predicate.unwrap_or_else(|| Node::And(Vec::new())))
    }

    fn unknown_attribute(&self, name: &str) -> AttributeError {
        AttributeError::UnknownAttribute {
            model: self.model.name().to_string(),
            attribute: name.to_string(),
        }
    }
}
