//! All translated attributes of a model in one JSON column, nested as
//! `{"en": {"title": "...", "content": "..."}}`

use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use super::json::{json_path, require_json_column};
use super::{is_blank, locale_map, AccessOptions, Backend, BackendClass, BackendError, BackendFactory};
use crate::locale::Locale;
use crate::model::{ModelClass, RecordRef};
use crate::query::Node;
use crate::{Options, Result};

const DEFAULT_COLUMN: &str = "translations";

#[derive(Debug)]
pub struct Container;

fn column_name(class: &BackendClass) -> String {
    class
        .option_str("column_name")
        .unwrap_or(DEFAULT_COLUMN)
        .to_string()
}

impl BackendFactory for Container {
    fn name(&self) -> &str {
        "container"
    }

    /// Defaults `column_name` and requires it to be a JSON column
    fn configure(&self, options: &mut Options, model: &ModelClass, _attributes: &[String]) -> Result<(), BackendError> {
        let column = match options.get("column_name") {
            None | Some(Value::Null) => DEFAULT_COLUMN.to_string(),
            Some(Value::String(name)) => name.trim_start_matches(':').to_string(),
            Some(other) => {
                return Err(BackendError::InvalidOption {
                    backend: self.name().to_string(),
                    option: "column_name".to_string(),
                    message: format!("expected a column name, got {}", other),
                })
            }
        };

        require_json_column(self.name(), model, &column)?;
        options.insert("column_name".to_string(), Value::String(column));
        Ok(())
    }

    fn build(&self, class: &Arc<BackendClass>, record: RecordRef, attribute: &str) -> Rc<dyn Backend> {
        Rc::new(ContainerBackend {
            record,
            column: column_name(class),
            attribute: attribute.to_string(),
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
                    Node::column(class.table_name(), column_name(class)),
                    Node::literal(json_path(&[locale.as_str(), attribute])),
                ],
            ),
        ))
    }
}

#[derive(Debug)]
struct ContainerBackend {
    record: RecordRef,
    column: String,
    attribute: String,
}

impl Backend for ContainerBackend {
    fn read(&self, locale: &Locale, _options: &AccessOptions) -> Result<Option<Value>> {
        let record = self.record.borrow();
        Ok(record
            .attributes
            .get(&self.column)
            .and_then(|container| container.get(locale.as_str()))
            .and_then(|translations| translations.get(&self.attribute))
            .filter(|v| !v.is_null())
            .cloned())
    }

    /// Writes into the locale's object; empty locale objects are dropped
    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        _options: &AccessOptions,
    ) -> Result<Option<Value>> {
        let mut record = self.record.borrow_mut();
        let mut container = locale_map(record.attributes.get(&self.column));
        let mut translations = locale_map(container.get(locale.as_str()));

        match &value {
            Some(v) => translations.insert(self.attribute.clone(), v.clone()),
            None => translations.remove(&self.attribute),
        };

        if translations.is_empty() {
            container.remove(locale.as_str());
        } else {
            container.insert(locale.to_string(), Value::Object(translations));
        }

        record
            .attributes
            .insert(self.column.clone(), Value::Object(container));
        Ok(value)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        let record = self.record.borrow();
        Ok(locale_map(record.attributes.get(&self.column))
            .iter()
            .filter(|(_, translations)| !is_blank(translations.get(&self.attribute)))
            .filter_map(|(locale, _)| Locale::new(locale).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ColumnType;
    use serde_json::json;

    #[test]
    fn column_name_defaults_and_must_be_json() {
        let model = ModelClass::new("Post").column("translations", ColumnType::Json);
        let mut options = Options::new();
        Container.configure(&mut options, &model, &[]).unwrap();
        assert_eq!(options["column_name"], json!("translations"));

        let model = ModelClass::new("Post").column("translations", ColumnType::Text);
        assert!(matches!(
            Container.configure(&mut Options::new(), &model, &[]),
            Err(BackendError::InvalidColumnType { .. })
        ));
    }

    #[test]
    fn nests_attributes_under_locales() {
        let record = RecordRef::default();
        let backend = |attribute: &str| ContainerBackend {
            record: record.clone(),
            column: "translations".into(),
            attribute: attribute.into(),
        };
        let en: Locale = "en".parse().unwrap();
        let ja: Locale = "ja".parse().unwrap();
        let options = AccessOptions::new();

        backend("title").write(&en, Some(json!("Hello")), &options).unwrap();
        backend("content").write(&en, Some(json!("Body")), &options).unwrap();
        backend("title").write(&ja, Some(json!("Konnichiwa")), &options).unwrap();

        assert_eq!(
            record.borrow().attributes["translations"],
            json!({ "en": { "title": "Hello", "content": "Body" }, "ja": { "title": "Konnichiwa" } })
        );
        assert_eq!(backend("content").locales().unwrap(), vec![en.clone()]);

        backend("title").write(&ja, None, &options).unwrap();
        assert_eq!(
            record.borrow().attributes["translations"],
            json!({ "en": { "title": "Hello", "content": "Body" } })
        );
        assert_eq!(backend("content").read(&ja, &options).unwrap(), None);
    }
}
