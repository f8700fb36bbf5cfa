//! # Persistence
//!
//! Records and their staged translation rows are saved to SQLite. Backends
//! only stage values on a record; nothing reaches the database until
//! [`SqliteStore::save`] runs.
//!
//! ## Schema
//!
//! | Table | Columns |
//! |-------|---------|
//! | model (`posts`) | `id` plus the model's columns |
//! | key-value (`string_translations`) | `id`, `locale`, `key`, `value`, `translatable_id`, `translatable_type`, timestamps |
//! | translation table (`post_translations`) | `id`, foreign key, `locale`, one column per attribute, timestamps |
//!
//! JSON columns are stored as text and decoded on load; booleans are stored
//! as integers.

mod sqlite;

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use thiserror::Error;

pub use sqlite::SqliteStore;

use crate::model::ColumnType;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{model} record has not been saved")]
    NotPersisted { model: String },

    #[error("{model} record {id} not found")]
    NotFound { model: String, id: i64 },

    #[error("Invalid locale '{locale}' stored in {table}")]
    InvalidLocale { table: String, locale: String },
}

/// Converts a JSON value to the SQLite value it is stored as
pub(crate) fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

/// Converts a loaded SQLite value back to JSON using the declared column type
pub(crate) fn from_sql(value: SqlValue, ty: Option<ColumnType>) -> Value {
    match (value, ty) {
        (SqlValue::Null, _) => Value::Null,
        (SqlValue::Integer(i), Some(ColumnType::Boolean)) => Value::Bool(i != 0),
        (SqlValue::Integer(i), _) => Value::from(i),
        (SqlValue::Real(f), _) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        (SqlValue::Text(s), Some(ColumnType::Json)) => match serde_json::from_str(&s) {
            Ok(value) => value,
            Err(_) => Value::String(s),
        },
        (SqlValue::Text(s), _) => Value::String(s),
        (SqlValue::Blob(_), _) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_convert_by_column_type() {
        assert_eq!(to_sql(Some(&json!(true))), SqlValue::Integer(1));
        assert_eq!(to_sql(Some(&json!(1.5))), SqlValue::Real(1.5));
        assert_eq!(
            to_sql(Some(&json!({ "en": "Hi" }))),
            SqlValue::Text("{\"en\":\"Hi\"}".into())
        );
        assert_eq!(to_sql(None), SqlValue::Null);

        assert_eq!(from_sql(SqlValue::Integer(0), Some(ColumnType::Boolean)), json!(false));
        assert_eq!(
            from_sql(SqlValue::Text("{\"en\":\"Hi\"}".into()), Some(ColumnType::Json)),
            json!({ "en": "Hi" })
        );
        assert_eq!(
            from_sql(SqlValue::Text("not json".into()), Some(ColumnType::Json)),
            json!("not json")
        );
        assert_eq!(from_sql(SqlValue::Integer(7), None), json!(7));
    }
}
