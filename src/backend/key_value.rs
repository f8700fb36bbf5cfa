//! Key-value backend
//!
//! Every translation is a row of a shared table (`string_translations` or
//! `text_translations`) keyed by the owning record, the attribute name and
//! the locale. Queries join that table once per (attribute, locale).

use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use super::{AccessOptions, Backend, BackendClass, BackendError, BackendFactory};
use crate::locale::Locale;
use crate::model::{Association, AssociationLayout, ColumnType, ModelClass, RecordRef, TranslationRow};
use crate::query::{AttributeJoinVisitor, JoinType, Node, Query};
use crate::{Options, Result};

#[derive(Debug)]
pub struct KeyValue;

impl KeyValue {
    fn table(class: &BackendClass) -> String {
        format!("{}_translations", class.option_str("type").unwrap_or("string"))
    }

    fn association(class: &BackendClass) -> String {
        class
            .option_str("association_name")
            .map(str::to_string)
            .unwrap_or_else(|| Self::table(class))
    }

    /// Join alias for `attribute` at `locale`: `title_string_translations_en`
    fn alias(class: &BackendClass, attribute: &str, locale: &Locale) -> String {
        format!(
            "{}_{}_{}",
            attribute,
            Self::association(class),
            locale.accessor_suffix()
        )
    }
}

impl BackendFactory for KeyValue {
    fn name(&self) -> &str {
        "key_value"
    }

    /// Requires `type` (`string` or `text`); fills in `association_name`
    fn configure(
        &self,
        options: &mut Options,
        _model: &ModelClass,
        _attributes: &[String],
    ) -> Result<(), BackendError> {
        let ty = match options.get("type") {
            None | Some(Value::Null) => {
                return Err(BackendError::MissingOption {
                    backend: self.name().to_string(),
                    option: "type".to_string(),
                })
            }
            Some(Value::String(ty)) => ty.trim_start_matches(':').to_string(),
            Some(other) => return Err(BackendError::MissingTranslationClass(other.to_string())),
        };

        if ty != "string" && ty != "text" {
            return Err(BackendError::MissingTranslationClass(ty));
        }

        options
            .entry("association_name".to_string())
            .or_insert_with(|| Value::String(format!("{}_translations", ty)));
        options.insert("type".to_string(), Value::String(ty));
        Ok(())
    }

    fn setup_model(&self, model: &mut ModelClass, class: &BackendClass) -> Result<(), BackendError> {
        model.add_association(Association {
            name: Self::association(class),
            table: Self::table(class),
            layout: AssociationLayout::KeyValue {
                value_type: ColumnType::Text,
            },
        });
        Ok(())
    }

    fn build(&self, class: &Arc<BackendClass>, record: RecordRef, attribute: &str) -> Rc<dyn Backend> {
        Rc::new(KeyValueBackend {
            record,
            attribute: attribute.to_string(),
            association: Self::association(class),
        })
    }

    fn build_node(&self, class: &BackendClass, attribute: &str, locale: &Locale) -> Result<Node, BackendError> {
        let alias = Self::alias(class, attribute, locale);
        Ok(Node::attribute(
            attribute,
            locale.clone(),
            class.id(),
            Some(Self::table(class)),
            Node::column(alias, "value"),
        ))
    }

    fn apply_scope(
        &self,
        class: &BackendClass,
        query: &mut Query,
        predicate: &Node,
        locale: &Locale,
    ) -> Result<(), BackendError> {
        let joins = match AttributeJoinVisitor::new(class.id(), locale).visit(predicate) {
            Some(joins) => joins,
            None => return Ok(()),
        };

        for (attribute, join) in joins {
            self.ensure_join(class, query, &attribute, locale, join)?;
        }
        Ok(())
    }

    fn ensure_join(
        &self,
        class: &BackendClass,
        query: &mut Query,
        attribute: &str,
        locale: &Locale,
        join: JoinType,
    ) -> Result<(), BackendError> {
        let alias = Self::alias(class, attribute, locale);
        let on = Node::column(&alias, "translatable_id")
            .eq(Node::column(class.table_name(), "id"))
            .and(Node::column(&alias, "translatable_type").eq(class.base_model_name()))
            .and(Node::column(&alias, "key").eq(attribute))
            .and(Node::column(&alias, "locale").eq(locale.as_str()));

        query.join(join, Self::table(class), alias, on);
        Ok(())
    }
}

#[derive(Debug)]
struct KeyValueBackend {
    record: RecordRef,
    attribute: String,
    association: String,
}

impl Backend for KeyValueBackend {
    fn read(&self, locale: &Locale, _options: &AccessOptions) -> Result<Option<Value>> {
        let record = self.record.borrow();
        Ok(record
            .associations
            .get(&self.association)
            .and_then(|rows| {
                rows.iter().find(|row| {
                    row.key.as_deref() == Some(self.attribute.as_str()) && &row.locale == locale
                })
            })
            .and_then(|row| row.field("value"))
            .cloned())
    }

    /// Stages the value on the matching row; a nil value leaves an empty row
    /// that is deleted on save
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

        let position = rows.iter().position(|row| {
            row.key.as_deref() == Some(self.attribute.as_str()) && &row.locale == locale
        });
        let row = match position {
            Some(i) => &mut rows[i],
            None => {
                rows.push(TranslationRow::keyed(&self.attribute, locale.clone()));
                let last = rows.len() - 1;
                &mut rows[last]
            }
        };

        row.fields
            .insert("value".to_string(), value.clone().unwrap_or(Value::Null));
        Ok(value)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        let record = self.record.borrow();
        Ok(record
            .associations
            .get(&self.association)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.key.as_deref() == Some(self.attribute.as_str()))
                    .filter(|row| row.field("value").is_some())
                    .map(|row| row.locale.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
