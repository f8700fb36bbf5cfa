//! Translation-table backend
//!
//! Each model gets its own translation table (`post_translations`) holding
//! one row per locale and one column per translated attribute. All
//! attributes of a model share a single join per locale.

use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use super::{AccessOptions, Backend, BackendClass, BackendError, BackendFactory};
use crate::locale::Locale;
use crate::model::{
    singularize, snake_case, Association, AssociationLayout, ModelClass, RecordRef, TranslationRow,
};
use crate::query::{JoinType, Node, Query, TableJoinVisitor};
use crate::{Options, Result};

#[derive(Debug)]
pub struct Table;

impl Table {
    fn table(class: &BackendClass) -> String {
        class
            .option_str("table_name")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_translations", singularize(class.table_name())))
    }

    fn association(class: &BackendClass) -> String {
        class
            .option_str("association_name")
            .unwrap_or("translations")
            .to_string()
    }

    fn foreign_key(class: &BackendClass) -> String {
        class
            .option_str("foreign_key")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_id", snake_case(class.base_model_name())))
    }

    /// Join alias for `locale`: `post_translations_en`
    fn alias(class: &BackendClass, locale: &Locale) -> String {
        format!("{}_{}", Self::table(class), locale.accessor_suffix())
    }
}

impl BackendFactory for Table {
    fn name(&self) -> &str {
        "table"
    }

    /// Fills in `association_name`, `table_name` and `foreign_key`
    fn configure(
        &self,
        options: &mut Options,
        model: &ModelClass,
        _attributes: &[String],
    ) -> Result<(), BackendError> {
        for key in ["association_name", "table_name", "foreign_key"] {
            if let Some(value) = options.get(key).filter(|v| !v.is_null() && !v.is_string()) {
                return Err(BackendError::InvalidOption {
                    backend: self.name().to_string(),
                    option: key.to_string(),
                    message: format!("expected a string, got {}", value),
                });
            }
        }

        options
            .entry("association_name".to_string())
            .or_insert_with(|| Value::from("translations"));
        options
            .entry("table_name".to_string())
            .or_insert_with(|| Value::from(format!("{}_translations", singularize(model.table_name()))));
        options
            .entry("foreign_key".to_string())
            .or_insert_with(|| Value::from(format!("{}_id", snake_case(model.base_name()))));
        Ok(())
    }

    fn setup_model(&self, model: &mut ModelClass, class: &BackendClass) -> Result<(), BackendError> {
        model.add_association(Association {
            name: Self::association(class),
            table: Self::table(class),
            layout: AssociationLayout::Table {
                foreign_key: Self::foreign_key(class),
                columns: class.attributes().to_vec(),
            },
        });
        Ok(())
    }

    fn build(&self, class: &Arc<BackendClass>, record: RecordRef, attribute: &str) -> Rc<dyn Backend> {
        Rc::new(TableBackend {
            record,
            attribute: attribute.to_string(),
            association: Self::association(class),
        })
    }

    fn build_node(&self, class: &BackendClass, attribute: &str, locale: &Locale) -> Result<Node, BackendError> {
        Ok(Node::attribute(
            attribute,
            locale.clone(),
            class.id(),
            Some(Self::table(class)),
            Node::column(Self::alias(class, locale), attribute),
        ))
    }

    fn apply_scope(
        &self,
        class: &BackendClass,
        query: &mut Query,
        predicate: &Node,
        locale: &Locale,
    ) -> Result<(), BackendError> {
        let table = Self::table(class);
        match TableJoinVisitor::new(class.id(), &table, locale).visit(predicate) {
            Some(join) => {
                let attribute = class.attributes().first().map(String::as_str).unwrap_or_default();
                self.ensure_join(class, query, attribute, locale, join)
            }
            None => Ok(()),
        }
    }

    /// One join per locale, shared by every attribute
    fn ensure_join(
        &self,
        class: &BackendClass,
        query: &mut Query,
        _attribute: &str,
        locale: &Locale,
        join: JoinType,
    ) -> Result<(), BackendError> {
        let alias = Self::alias(class, locale);
        let on = Node::column(&alias, Self::foreign_key(class))
            .eq(Node::column(class.table_name(), "id"))
            .and(Node::column(&alias, "locale").eq(locale.as_str()));

        query.join(join, Self::table(class), alias, on);
        Ok(())
    }
}

#[derive(Debug)]
struct TableBackend {
    record: RecordRef,
    attribute: String,
    association: String,
}

impl Backend for TableBackend {
    fn read(&self, locale: &Locale, _options: &AccessOptions) -> Result<Option<Value>> {
        let record = self.record.borrow();
        Ok(record
            .associations
            .get(&self.association)
            .and_then(|rows| rows.iter().find(|row| &row.locale == locale))
            .and_then(|row| row.field(&self.attribute))
            .cloned())
    }

    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        _options: &AccessOptions,
    ) -> Result<Option<Value>> {
        let mut record = self.record.borrow_mut();
        let rows = record
            .associations
            .entry(self.association.clone())
            .or_default();

        let row = match rows.iter().position(|row| &row.locale == locale) {
            Some(i) => &mut rows[i],
            None => {
                rows.push(TranslationRow::new(locale.clone()));
                let last = rows.len() - 1;
                &mut rows[last]
            }
        };

        row.fields
            .insert(self.attribute.clone(), value.clone().unwrap_or(Value::Null));
        Ok(value)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        let record = self.record.borrow();
        Ok(record
            .associations
            .get(&self.association)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.field(&self.attribute).is_some())
                    .map(|row| row.locale.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
