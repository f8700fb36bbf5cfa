//! One JSON column per attribute holding `{"en": "Hello", "ja": "..."}`

use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use super::{locale_map, map_locales, AccessOptions, Backend, BackendClass, BackendError, BackendFactory};
use crate::locale::Locale;
use crate::model::{ColumnType, ModelClass, RecordRef};
use crate::query::Node;
use crate::{Options, Result};

#[derive(Debug)]
pub struct Json;

/// Checks that `column` exists on `model` with the JSON column type
pub(super) fn require_json_column(backend: &str, model: &ModelClass, column: &str) -> Result<(), BackendError> {
    match model.column_type(column) {
        Some(ColumnType::Json) => Ok(()),
        Some(found) => Err(BackendError::InvalidColumnType {
            backend: backend.to_string(),
            model: model.name().to_string(),
            column: column.to_string(),
            expected: ColumnType::Json.to_string(),
            found: found.to_string(),
        }),
        None => Err(BackendError::MissingColumn {
            backend: backend.to_string(),
            model: model.name().to_string(),
            column: column.to_string(),
        }),
    }
}

/// SQLite JSON path for a chain of object keys: `$."en"."title"`
pub(super) fn json_path(keys: &[&str]) -> String {
    keys.iter().fold("$".to_string(), |path, key| {
        format!("{}.\"{}\"", path, key.replace('"', "\\\""))
    })
}

impl BackendFactory for Json {
    fn name(&self) -> &str {
        "json"
    }

    fn configure(&self, _options: &mut Options, model: &ModelClass, attributes: &[String]) -> Result<(), BackendError> {
        for attribute in attributes {
            require_json_column(self.name(), model, attribute)?;
        }
        Ok(())
    }

    fn build(&self, _class: &Arc<BackendClass>, record: RecordRef, attribute: &str) -> Rc<dyn Backend> {
        Rc::new(JsonBackend {
            record,
            column: attribute.to_string(),
        })
    }

    fn build_node(&self, class: &BackendClass, attribute: &str, locale: &Locale) -> Result<Node, BackendError> {
        Ok(Node::attribute(
            attribute,
            locale.clone(),
            class.id(),
            None,
            Node::function(
                "json_extract",
                vec![
                    Node::column(class.table_name(), attribute),
                    Node::literal(json_path(&[locale.as_str()])),
                ],
            ),
        ))
    }
}

#[derive(Debug)]
struct JsonBackend {
    record: RecordRef,
    column: String,
}

impl Backend for JsonBackend {
    fn read(&self, locale: &Locale, _options: &AccessOptions) -> Result<Option<Value>> {
        let record = self.record.borrow();
        Ok(record
            .attributes
            .get(&self.column)
            .and_then(|map| map.get(locale.as_str()))
            .filter(|v| !v.is_null())
            .cloned())
    }

    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        _options: &AccessOptions,
    ) -> Result<Option<Value>> {
        let mut record = self.record.borrow_mut();
        let mut map = locale_map(record.attributes.get(&self.column));
        match &value {
            Some(v) => map.insert(locale.to_string(), v.clone()),
            None => map.remove(locale.as_str()),
        };
        record.attributes.insert(self.column.clone(), Value::Object(map));
        Ok(value)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        let record = self.record.borrow();
        Ok(map_locales(&locale_map(record.attributes.get(&self.column))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn column_must_be_json() {
        let model = ModelClass::new("Post")
            .column("title", ColumnType::Json)
            .column("content", ColumnType::Text);

        assert!(Json.configure(&mut Options::new(), &model, &["title".to_string()]).is_ok());

        let err = Json
            .configure(&mut Options::new(), &model, &["content".to_string()])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "json backend on Post: column 'content' must be of type json, found text"
        );

        assert!(matches!(
            Json.configure(&mut Options::new(), &model, &["summary".to_string()]),
            Err(BackendError::MissingColumn { .. })
        ));
    }

    #[test]
    fn stores_locale_map_in_column() {
        let record = RecordRef::default();
        let backend = JsonBackend {
            record: record.clone(),
            column: "title".into(),
        };
        let en: Locale = "en".parse().unwrap();
        let options = AccessOptions::new();

        backend.write(&en, Some(json!("Hello")), &options).unwrap();
        assert_eq!(record.borrow().attributes["title"], json!({ "en": "Hello" }));
        assert_eq!(backend.read(&en, &options).unwrap(), Some(json!("Hello")));

        backend.write(&en, None, &options).unwrap();
        assert_eq!(record.borrow().attributes["title"], json!({}));
        assert!(backend.locales().unwrap().is_empty());
    }

    #[test]
    fn json_paths_quote_keys() {
        assert_eq!(json_path(&["pt-BR", "title"]), "$.\"pt-BR\".\"title\"");
    }
}
