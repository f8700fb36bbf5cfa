//! One column per (attribute, locale) on the model table: `title_en`,
//! `title_pt_br`. Missing columns for the accessor locales are added when
//! the model is set up. Writes at any other locale are rejected, since the
//! value would have no column to be saved to.

use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use super::{AccessOptions, Backend, BackendClass, BackendError, BackendFactory};
use crate::locale::Locale;
use crate::model::{is_locale_suffix, ColumnType, ModelClass, RecordRef};
use crate::query::Node;
use crate::Result;

#[derive(Debug)]
pub struct Column;

/// Column holding `attribute` at `locale`
pub fn column_name(attribute: &str, locale: &Locale) -> String {
    format!("{}_{}", attribute, locale.accessor_suffix())
}

impl BackendFactory for Column {
    fn name(&self) -> &str {
        "column"
    }

    fn setup_model(&self, model: &mut ModelClass, class: &BackendClass) -> Result<(), BackendError> {
        let locales = class.config().accessor_locales();
        for attribute in class.attributes() {
            for locale in &locales {
                model.add_column(column_name(attribute, locale), ColumnType::Text);
            }
        }
        Ok(())
    }

    fn build(&self, class: &Arc<BackendClass>, record: RecordRef, attribute: &str) -> Rc<dyn Backend> {
        Rc::new(ColumnBackend {
            record,
            attribute: attribute.to_string(),
            model: class.model_name().to_string(),
            locales: class.config().accessor_locales(),
        })
    }

    fn build_node(&self, class: &BackendClass, attribute: &str, locale: &Locale) -> Result<Node, BackendError> {
        Ok(Node::attribute(
            attribute,
            locale.clone(),
            class.id(),
            None,
            Node::column(class.table_name(), column_name(attribute, locale)),
        ))
    }
}

#[derive(Debug)]
struct ColumnBackend {
    record: RecordRef,
    attribute: String,
    model: String,
    /// Locales with a column on the model table
    locales: Vec<Locale>,
}

impl Backend for ColumnBackend {
    fn read(&self, locale: &Locale, _options: &AccessOptions) -> Result<Option<Value>> {
        let column = column_name(&self.attribute, locale);
        Ok(self
            .record
            .borrow()
            .attributes
            .get(&column)
            .filter(|v| !v.is_null())
            .cloned())
    }

    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        _options: &AccessOptions,
    ) -> Result<Option<Value>> {
        let column = column_name(&self.attribute, locale);
        if !self.locales.contains(locale) {
            return Err(BackendError::MissingColumn {
                backend: "column".into(),
                model: self.model.clone(),
                column,
            }
            .into());
        }
        self.record
            .borrow_mut()
            .attributes
            .insert(column, value.clone().unwrap_or(Value::Null));
        Ok(value)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        let prefix = format!("{}_", self.attribute);
        let record = self.record.borrow();
        Ok(record
            .attributes
            .iter()
            .filter(|(_, v)| !v.is_null())
            .filter_map(|(column, _)| column.strip_prefix(&prefix))
            .filter(|suffix| is_locale_suffix(suffix))
            .filter_map(|suffix| Locale::from_accessor_suffix(suffix).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_and_writes_locale_columns() {
        let record = RecordRef::default();
        let pt_br: Locale = "pt-BR".parse().unwrap();
        let backend = ColumnBackend {
            record: record.clone(),
            attribute: "title".into(),
            model: "Post".into(),
            locales: vec![pt_br.clone()],
        };
        let options = AccessOptions::new();

        backend.write(&pt_br, Some(json!("Olá")), &options).unwrap();
        assert_eq!(record.borrow().attributes["title_pt_br"], json!("Olá"));
        assert_eq!(backend.read(&pt_br, &options).unwrap(), Some(json!("Olá")));
        assert_eq!(backend.locales().unwrap(), vec![pt_br.clone()]);

        backend.write(&pt_br, None, &options).unwrap();
        assert_eq!(backend.read(&pt_br, &options).unwrap(), None);
    }

    #[test]
    fn rejects_writes_without_a_column() {
        let record = RecordRef::default();
        let backend = ColumnBackend {
            record: record.clone(),
            attribute: "title".into(),
            model: "Post".into(),
            locales: vec!["en".parse().unwrap()],
        };
        let ja: Locale = "ja".parse().unwrap();

        let err = backend
            .write(&ja, Some(json!("Konnichiwa")), &AccessOptions::new())
            .unwrap_err();
        assert!(err.to_string().contains("missing column 'title_ja'"));
        assert!(record.borrow().attributes.is_empty());
        assert_eq!(backend.read(&ja, &AccessOptions::new()).unwrap(), None);
    }
}
