//! Locale map serialized into a text column as YAML (default) or JSON
//!
//! The stored text is opaque to the database, so this backend cannot be
//! queried.

use std::rc::Rc;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{map_locales, AccessOptions, Backend, BackendClass, BackendError, BackendFactory};
use crate::locale::Locale;
use crate::model::{ColumnType, ModelClass, RecordRef};
use crate::{Options, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn from_options(options: &Options) -> Format {
        match options.get("format").and_then(Value::as_str) {
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

#[derive(Debug)]
pub struct Serialized;

impl BackendFactory for Serialized {
    fn name(&self) -> &str {
        "serialized"
    }

    /// Accepts `format: yaml | json`, defaulting to YAML
    fn configure(&self, options: &mut Options, _model: &ModelClass, _attributes: &[String]) -> Result<(), BackendError> {
        let format = match options.get("format") {
            None | Some(Value::Null) => "yaml".to_string(),
            Some(Value::String(format)) => format.trim_start_matches(':').to_string(),
            Some(other) => other.to_string(),
        };

        if format != "yaml" && format != "json" {
            return Err(BackendError::InvalidOption {
                backend: self.name().to_string(),
                option: "format".to_string(),
                message: format!("'{}' is not a supported format (yaml or json)", format),
            });
        }

        options.insert("format".to_string(), Value::String(format));
        Ok(())
    }

    fn setup_model(&self, model: &mut ModelClass, class: &BackendClass) -> Result<(), BackendError> {
        for attribute in class.attributes() {
            model.add_column(attribute.clone(), ColumnType::Text);
        }
        Ok(())
    }

    fn build(&self, class: &Arc<BackendClass>, record: RecordRef, attribute: &str) -> Rc<dyn Backend> {
        Rc::new(SerializedBackend {
            record,
            column: attribute.to_string(),
            format: Format::from_options(class.options()),
        })
    }
}

#[derive(Debug)]
struct SerializedBackend {
    record: RecordRef,
    column: String,
    format: Format,
}

impl SerializedBackend {
    fn load(&self) -> Result<Map<String, Value>> {
        let record = self.record.borrow();
        let text = match record.attributes.get(&self.column) {
            Some(Value::String(text)) if !text.trim().is_empty() => text,
            _ => return Ok(Map::new()),
        };

        let parsed: Value = match self.format {
            Format::Yaml => serde_yaml::from_str(text).map_err(|e| self.error(e))?,
            Format::Json => serde_json::from_str(text).map_err(|e| self.error(e))?,
        };

        match parsed {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(self.error(format!("expected a map of locales, found {}", other)).into()),
        }
    }

    fn store(&self, map: Map<String, Value>) -> Result<()> {
        let map = Value::Object(map);
        let text = match self.format {
            Format::Yaml => serde_yaml::to_string(&map).map_err(|e| self.error(e))?,
            Format::Json => serde_json::to_string(&map).map_err(|e| self.error(e))?,
        };

        self.record
            .borrow_mut()
            .attributes
            .insert(self.column.clone(), Value::String(text));
        Ok(())
    }

    fn error(&self, message: impl ToString) -> BackendError {
        BackendError::Serialization {
            attribute: self.column.clone(),
            message: message.to_string(),
        }
    }
}

impl Backend for SerializedBackend {
    fn read(&self, locale: &Locale, _options: &AccessOptions) -> Result<Option<Value>> {
        Ok(self
            .load()?
            .remove(locale.as_str())
            .filter(|v| !v.is_null()))
    }

    fn write(
        &self,
        locale: &Locale,
        value: Option<Value>,
        _options: &AccessOptions,
    ) -> Result<Option<Value>> {
        let mut map = self.load()?;
        match &value {
            Some(v) => map.insert(locale.to_string(), v.clone()),
            None => map.remove(locale.as_str()),
        };
        self.store(map)?;
        Ok(value)
    }

    fn locales(&self) -> Result<Vec<Locale>> {
        Ok(map_locales(&self.load()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(format: Format) -> SerializedBackend {
        SerializedBackend {
            record: RecordRef::default(),
            column: "title".into(),
            format,
        }
    }

    #[test]
    fn yaml_round_trip_through_text_column() {
        let backend = backend(Format::Yaml);
        let en: Locale = "en".parse().unwrap();
        let options = AccessOptions::new();

        backend.write(&en, Some(json!("Hello")), &options).unwrap();
        let stored = backend.record.borrow().attributes["title"].clone();
        assert_eq!(stored, json!("en: Hello\n"));
        assert_eq!(backend.read(&en, &options).unwrap(), Some(json!("Hello")));
    }

    #[test]
    fn json_format_and_bad_payloads() {
        let backend = backend(Format::Json);
        backend
            .record
            .borrow_mut()
            .attributes
            .insert("title".into(), json!("{\"ja\":\"Konnichiwa\"}"));
        assert_eq!(backend.locales().unwrap(), vec!["ja".parse::<Locale>().unwrap()]);

        backend
            .record
            .borrow_mut()
            .attributes
            .insert("title".into(), json!("[1, 2]"));
        let err = backend.locales().unwrap_err();
        assert!(err.to_string().contains("Failed to (de)serialize translations of 'title'"));
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let model = ModelClass::new("Post");
        let mut options = Options::from([("format".to_string(), json!("xml"))]);
        assert!(matches!(
            Serialized.configure(&mut options, &model, &[]),
            Err(BackendError::InvalidOption { .. })
        ));
    }
}
