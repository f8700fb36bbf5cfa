//! SQLite store for model records

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use tracing::debug;

use super::{from_sql, to_sql, StoreError};
use crate::locale::Locale;
use crate::model::{Association, AssociationLayout, ModelClass, Record, RecordData, TranslationRow};
use crate::query::{I18nScope, Query};

/// SQLite-backed persistence for records of any model class
pub struct SqliteStore {
    /// Path to the database file, `None` for in-memory stores
    path: Option<PathBuf>,

    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a database file
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            conn,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self { path: None, conn })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Creates the model table and its translation tables, adding columns
    /// missing from existing tables
    pub fn migrate(&self, class: &ModelClass) -> Result<()> {
        let mut columns: Vec<(String, &str)> = class
            .columns()
            .iter()
            .filter(|c| c.name != "id")
            .map(|c| (c.name.clone(), c.ty.sql_type()))
            .collect();
        self.create_table(class.table_name(), &columns)?;

        for association in class.associations() {
            columns.clear();
            match &association.layout {
                AssociationLayout::KeyValue { value_type } => {
                    columns.push(("locale".into(), "TEXT NOT NULL"));
                    columns.push(("key".into(), "TEXT NOT NULL"));
                    columns.push(("value".into(), value_type.sql_type()));
                    columns.push(("translatable_id".into(), "INTEGER NOT NULL"));
                    columns.push(("translatable_type".into(), "TEXT NOT NULL"));
                }
                AssociationLayout::Table {
                    foreign_key,
                    columns: attributes,
                } => {
                    columns.push((foreign_key.clone(), "INTEGER NOT NULL"));
                    columns.push(("locale".into(), "TEXT NOT NULL"));
                    for attribute in attributes {
                        columns.push((attribute.clone(), "TEXT"));
                    }
                }
            }
            columns.push(("created_at".into(), "TEXT"));
            columns.push(("updated_at".into(), "TEXT"));
            self.create_table(&association.table, &columns)?;

            let (index, keys) = match &association.layout {
                AssociationLayout::KeyValue { .. } => (
                    format!("index_{}_on_translatable_key_locale", association.table),
                    "\"translatable_id\", \"translatable_type\", \"key\", \"locale\"".to_string(),
                ),
                AssociationLayout::Table { foreign_key, .. } => (
                    format!("index_{}_on_{}_locale", association.table, foreign_key),
                    format!("{}, \"locale\"", quote(foreign_key)),
                ),
            };
            self.conn.execute_batch(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({});",
                quote(&index),
                quote(&association.table),
                keys
            ))?;
        }

        debug!(model = class.name(), table = class.table_name(), "migrated");
        Ok(())
    }

    fn create_table(&self, table: &str, columns: &[(String, &str)]) -> Result<()> {
        let mut definitions = vec!["\"id\" INTEGER PRIMARY KEY".to_string()];
        definitions.extend(columns.iter().map(|(name, ty)| format!("{} {}", quote(name), ty)));

        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({});",
                quote(table),
                definitions.join(", ")
            ))
            .with_context(|| format!("Failed to create table {}", table))?;

        let existing = self.table_columns(table)?;
        for (name, ty) in columns {
            if !existing.contains(name) {
                // SQLite cannot add NOT NULL columns without a default
                let ty = ty.trim_end_matches(" NOT NULL");
                self.conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {};",
                    quote(table),
                    quote(name),
                    ty
                ))?;
            }
        }
        Ok(())
    }

    fn table_columns(&self, table: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(names)
    }

    /// Writes the record and its translation rows in one transaction
    ///
    /// Translation rows whose fields are all null are deleted. Ids and
    /// removed rows are staged on a copy of the record's data, which replaces
    /// the record only once the transaction commits; a failed save leaves the
    /// record as it was. On success the record's changes are committed and
    /// its read caches are reset.
    pub fn save(&mut self, record: &Record) -> Result<()> {
        let class = record.class().clone();
        let now = Utc::now();
        let mut staged = record.data().borrow().clone();
        let tx = self.conn.transaction()?;

        let id = save_row(&tx, &class, &mut staged)?;
        for association in class.associations() {
            let rows = staged.associations.entry(association.name.clone()).or_default();
            save_translations(&tx, &class, association, id, rows, now)?;
        }

        tx.commit()?;
        *record.data().borrow_mut() = staged;
        record.after_save();

        debug!(model = class.name(), id = ?record.id(), "saved record");
        Ok(())
    }

    /// Loads the record with `id`
    pub fn find(&self, class: &Arc<ModelClass>, id: i64) -> Result<Option<Record>> {
        Ok(self
            .load(class, id)?
            .map(|data| Record::from_data(class.clone(), data)))
    }

    /// Replaces the record's data with what is stored, dropping unsaved
    /// changes and read caches
    pub fn reload(&self, record: &Record) -> Result<()> {
        let class = record.class();
        let id = record.id().ok_or_else(|| StoreError::NotPersisted {
            model: class.name().to_string(),
        })?;
        let data = self.load(class, id)?.ok_or_else(|| StoreError::NotFound {
            model: class.name().to_string(),
            id,
        })?;

        record.reload_from(data);
        Ok(())
    }

    /// Runs a scope and loads the matching records in result order
    pub fn fetch(&self, scope: &I18nScope) -> Result<Vec<Record>> {
        self.fetch_query(scope.model(), scope.query())
    }

    pub fn fetch_query(&self, class: &Arc<ModelClass>, query: &Query) -> Result<Vec<Record>> {
        let (sql, params) = query.to_sql();
        debug!(sql = %sql, params = params.len(), "fetch");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to prepare query: {}", sql))?;
        let ids = stmt
            .query_map(params_from_iter(params.iter().map(|p| to_sql(Some(p)))), |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = BTreeSet::new();
        let mut records = Vec::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if let Some(record) = self.find(class, id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn load(&self, class: &ModelClass, id: i64) -> Result<Option<RecordData>> {
        let columns: Vec<_> = class.columns().iter().filter(|c| c.name != "id").collect();
        let select = std::iter::once("\"id\"".to_string())
            .chain(columns.iter().map(|c| quote(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");

        let row: Option<Vec<SqlValue>> = self
            .conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE \"id\" = ?1", select, quote(class.table_name())),
                params![id],
                |row| (0..=columns.len()).map(|i| row.get(i)).collect(),
            )
            .optional()?;

        let values = match row {
            Some(values) => values,
            None => return Ok(None),
        };

        let mut data = RecordData {
            id: Some(id),
            ..RecordData::default()
        };
        for (column, value) in columns.iter().zip(values.into_iter().skip(1)) {
            data.attributes
                .insert(column.name.clone(), from_sql(value, Some(column.ty)));
        }

        for association in class.associations() {
            let rows = self.load_translations(class, association, id)?;
            data.associations.insert(association.name.clone(), rows);
        }

        Ok(Some(data))
    }

    fn load_translations(
        &self,
        class: &ModelClass,
        association: &Association,
        id: i64,
    ) -> Result<Vec<TranslationRow>> {
        let table = quote(&association.table);

        let (sql, fields, filter): (String, Vec<String>, Vec<SqlValue>) = match &association.layout {
            AssociationLayout::KeyValue { .. } => (
                format!(
                    "SELECT \"id\", \"locale\", \"created_at\", \"updated_at\", \"key\", \"value\" FROM {} \
                     WHERE \"translatable_id\" = ?1 AND \"translatable_type\" = ?2 ORDER BY \"id\"",
                    table
                ),
                vec!["value".to_string()],
                vec![SqlValue::Integer(id), SqlValue::Text(class.base_name().to_string())],
            ),
            AssociationLayout::Table {
                foreign_key,
                columns,
            } => {
                let selected: String = columns.iter().map(|c| format!(", {}", quote(c))).collect();
                (
                    format!(
                        "SELECT \"id\", \"locale\", \"created_at\", \"updated_at\", NULL{} FROM {} \
                         WHERE {} = ?1 ORDER BY \"id\"",
                        selected,
                        table,
                        quote(foreign_key)
                    ),
                    columns.clone(),
                    vec![SqlValue::Integer(id)],
                )
            }
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(filter), |row| {
                let id: i64 = row.get(0)?;
                let locale: String = row.get(1)?;
                let created_at: Option<String> = row.get(2)?;
                let updated_at: Option<String> = row.get(3)?;
                let key: Option<String> = row.get(4)?;
                let values = (0..fields.len())
                    .map(|i| row.get::<_, SqlValue>(5 + i))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((id, locale, created_at, updated_at, key, values))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(row_id, locale, created_at, updated_at, key, values)| -> Result<TranslationRow> {
                let locale = Locale::new(&locale).map_err(|_| StoreError::InvalidLocale {
                    table: association.table.clone(),
                    locale,
                })?;

                let mut row = TranslationRow::new(locale);
                row.id = Some(row_id);
                row.key = key;
                row.created_at = parse_timestamp(created_at.as_deref());
                row.updated_at = parse_timestamp(updated_at.as_deref());
                row.fields = fields
                    .iter()
                    .cloned()
                    .zip(values.into_iter().map(|v| from_sql(v, None)))
                    .collect::<BTreeMap<_, _>>();
                Ok(row)
            })
            .collect()
    }
}

/// Inserts or updates the model row and returns its id
fn save_row(tx: &Transaction<'_>, class: &ModelClass, data: &mut RecordData) -> Result<i64> {
    let table = quote(class.table_name());
    let columns: Vec<_> = class.columns().iter().filter(|c| c.name != "id").collect();
    let values: Vec<SqlValue> = columns
        .iter()
        .map(|c| to_sql(data.attributes.get(&c.name)))
        .collect();

    if let Some(id) = data.id {
        if !columns.is_empty() {
            let assignments = columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = ?{}", quote(&c.name), i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {} WHERE \"id\" = ?{}",
                table,
                assignments,
                columns.len() + 1
            );
            let mut params = values.clone();
            params.push(SqlValue::Integer(id));
            if tx.execute(&sql, params_from_iter(params))? > 0 {
                return Ok(id);
            }
        } else if tx
            .query_row(
                &format!("SELECT 1 FROM {} WHERE \"id\" = ?1", table),
                params![id],
                |_| Ok(()),
            )
            .optional()?
            .is_some()
        {
            return Ok(id);
        }
    }

    let mut names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
    let mut params = values;
    if let Some(id) = data.id {
        names.push("\"id\"".to_string());
        params.push(SqlValue::Integer(id));
    }

    let sql = if names.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        let placeholders = (1..=names.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({}) VALUES ({})", table, names.join(", "), placeholders)
    };
    tx.execute(&sql, params_from_iter(params))?;

    let id = tx.last_insert_rowid();
    data.id = Some(id);
    Ok(id)
}

/// Syncs staged rows of one association; empty rows are deleted
fn save_translations(
    tx: &Transaction<'_>,
    class: &ModelClass,
    association: &Association,
    owner_id: i64,
    rows: &mut Vec<TranslationRow>,
    now: DateTime<Utc>,
) -> Result<()> {
    let table = quote(&association.table);
    let timestamp = now.to_rfc3339();

    for row in rows.iter().filter(|row| row.is_empty()) {
        if let Some(id) = row.id {
            tx.execute(&format!("DELETE FROM {} WHERE \"id\" = ?1", table), params![id])?;
            debug!(table = %association.table, id, "removed blank translation row");
        }
    }
    rows.retain(|row| !row.is_empty());

    for row in rows.iter_mut() {
        match &association.layout {
            AssociationLayout::KeyValue { .. } => {
                let value = to_sql(row.fields.get("value"));
                match row.id {
                    Some(id) => {
                        tx.execute(
                            &format!(
                                "UPDATE {} SET \"value\" = ?1, \"updated_at\" = ?2 WHERE \"id\" = ?3",
                                table
                            ),
                            params![value, timestamp, id],
                        )?;
                    }
                    None => {
                        tx.execute(
                            &format!(
                                "INSERT INTO {} (\"locale\", \"key\", \"value\", \"translatable_id\", \
                                 \"translatable_type\", \"created_at\", \"updated_at\") \
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                                table
                            ),
                            params![
                                row.locale.as_str(),
                                row.key.as_deref().unwrap_or_default(),
                                value,
                                owner_id,
                                class.base_name(),
                                timestamp,
                            ],
                        )?;
                    }
                }
            }
            AssociationLayout::Table {
                foreign_key,
                columns,
            } => {
                let values: Vec<SqlValue> = columns.iter().map(|c| to_sql(row.fields.get(c))).collect();
                match row.id {
                    Some(id) => {
                        let mut assignments: Vec<String> = columns
                            .iter()
                            .enumerate()
                            .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
                            .collect();
                        assignments.push(format!("\"updated_at\" = ?{}", columns.len() + 1));

                        let mut params = values;
                        params.push(SqlValue::Text(timestamp.clone()));
                        params.push(SqlValue::Integer(id));
                        tx.execute(
                            &format!(
                                "UPDATE {} SET {} WHERE \"id\" = ?{}",
                                table,
                                assignments.join(", "),
                                columns.len() + 2
                            ),
                            params_from_iter(params),
                        )?;
                    }
                    None => {
                        let mut names = vec![quote(foreign_key), "\"locale\"".to_string()];
                        names.extend(columns.iter().map(|c| quote(c)));
                        names.push("\"created_at\"".to_string());
                        names.push("\"updated_at\"".to_string());

                        let mut params = vec![
                            SqlValue::Integer(owner_id),
                            SqlValue::Text(row.locale.to_string()),
                        ];
                        params.extend(values);
                        params.push(SqlValue::Text(timestamp.clone()));
                        params.push(SqlValue::Text(timestamp.clone()));

                        let placeholders = (1..=names.len())
                            .map(|i| format!("?{}", i))
                            .collect::<Vec<_>>()
                            .join(", ");
                        tx.execute(
                            &format!(
                                "INSERT INTO {} ({}) VALUES ({})",
                                table,
                                names.join(", "),
                                placeholders
                            ),
                            params_from_iter(params),
                        )?;
                    }
                }
            }
        }

        if row.id.is_none() {
            row.id = Some(tx.last_insert_rowid());
            row.created_at = Some(now);
        }
        row.updated_at = Some(now);
    }

    Ok(())
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
