// backuptool/src/backup/db_dump.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::BigDecimal;
use sqlx::{Column, Connection, Executor, Row, TypeInfo, ValueRef};
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info};
use url::Url;

use crate::backup::model::TableRef;
use crate::errors::{BackupError, Result};

/// One row rendered as a JSON object, column name to value.
pub type JsonRow = serde_json::Map<String, Value>;

const TABLES_QUERY: &str = "SELECT table_schema::text, table_name::text
     FROM information_schema.tables
     WHERE table_type = 'BASE TABLE' AND table_schema = ANY($1)
     ORDER BY table_schema, table_name";

/// Opens a single connection for one run. No pooling, no retry.
#[async_trait]
pub trait Connector: Send + Sync {
    type Source: TableSource;

    async fn connect(&self) -> Result<Self::Source>;
}

/// An open connection that can list and read tables.
#[async_trait]
pub trait TableSource: Send {
    /// Every base table in `schemas`, sorted by schema then table name.
    async fn list_tables(&mut self, schemas: &[String]) -> Result<Vec<TableRef>>;

    /// Streams every row of `table`. Rows are produced one at a time.
    fn stream_rows<'a>(&'a mut self, table: &'a TableRef) -> BoxStream<'a, Result<JsonRow>>;

    async fn close(self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgConnector {
    database_url: Option<String>,
}

impl PgConnector {
    pub fn new(database_url: Option<String>) -> Self {
        Self { database_url }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Source = PgSource;

    async fn connect(&self) -> Result<PgSource> {
        let url = self
            .database_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                BackupError::Configuration("DATABASE_URL is not set".to_string())
            })?;
        let target = redact_database_url(url)?;

        info!(target = %target, "Opening database connection");
        let conn = PgConnection::connect(url)
            .await
            .map_err(|e| BackupError::Connection(format!("{}: {}", target, e)))?;

        Ok(PgSource {
            conn,
            statement: String::new(),
        })
    }
}

/// Validates a Postgres URL and returns it with the password removed, for logs.
pub fn redact_database_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url)
        .map_err(|e| BackupError::Configuration(format!("Invalid database URL: {}", e)))?;
    if !matches!(parsed.scheme(), "postgres" | "postgresql") {
        return Err(BackupError::Configuration(format!(
            "Unsupported database URL scheme: {}",
            parsed.scheme()
        )));
    }
    if parsed.password().is_some() {
        let _ = parsed.set_password(Some("***"));
    }
    Ok(parsed.to_string())
}

pub struct PgSource {
    conn: PgConnection,
    // Holds the SELECT text so the row stream can borrow it.
    statement: String,
}

#[async_trait]
impl TableSource for PgSource {
    async fn list_tables(&mut self, schemas: &[String]) -> Result<Vec<TableRef>> {
        let rows: Vec<(String, String)> = sqlx::query_as(TABLES_QUERY)
            .bind(schemas.to_vec())
            .fetch_all(&mut self.conn)
            .await?;

        let mut tables: Vec<TableRef> = rows
            .into_iter()
            .map(|(schema, table)| TableRef::new(schema, table))
            .collect();
        tables.sort();
        Ok(tables)
    }

    fn stream_rows<'a>(&'a mut self, table: &'a TableRef) -> BoxStream<'a, Result<JsonRow>> {
        let PgSource { conn, statement } = self;
        *statement = format!("SELECT * FROM {}", table.quoted());
        let statement: &'a String = statement;

        conn.fetch(statement.as_str())
            .map(|row| row.map_err(BackupError::from).and_then(|row| row_to_json(&row)))
            .boxed()
    }

    async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

/// Converts a Postgres row into a JSON object.
///
/// Dates and timestamps become ISO-8601 strings; numerics, UUIDs and
/// byte arrays become their string form.
pub fn row_to_json(row: &PgRow) -> Result<JsonRow> {
    let mut object = JsonRow::new();
    for column in row.columns() {
        let value = column_to_json(row, column.ordinal(), column.type_info().name())?;
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

fn column_to_json(row: &PgRow, idx: usize, type_name: &str) -> Result<Value> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(idx)?),
        "INT2" => Value::from(row.try_get::<i16, _>(idx)?),
        "INT4" => Value::from(row.try_get::<i32, _>(idx)?),
        "INT8" => Value::from(row.try_get::<i64, _>(idx)?),
        "FLOAT4" => float_to_json(f64::from(row.try_get::<f32, _>(idx)?)),
        "FLOAT8" => float_to_json(row.try_get::<f64, _>(idx)?),
        "NUMERIC" => Value::String(row.try_get::<BigDecimal, _>(idx)?.to_string()),
        "UUID" => Value::String(row.try_get::<uuid::Uuid, _>(idx)?.to_string()),
        "BYTEA" => Value::String(bytea_to_string(&row.try_get::<Vec<u8>, _>(idx)?)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::String(row.try_get::<String, _>(idx)?),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx)?,
        "TIMESTAMPTZ" => Value::String(row.try_get::<DateTime<Utc>, _>(idx)?.to_rfc3339()),
        "TIMESTAMP" => Value::String(naive_datetime_to_iso(row.try_get::<NaiveDateTime, _>(idx)?)),
        "DATE" => Value::String(naive_date_to_iso(row.try_get::<NaiveDate, _>(idx)?)),
        "TIME" => Value::String(naive_time_to_iso(row.try_get::<NaiveTime, _>(idx)?)),
        "TEXT[]" | "VARCHAR[]" => Value::from(row.try_get::<Vec<String>, _>(idx)?),
        "INT4[]" => Value::from(row.try_get::<Vec<i32>, _>(idx)?),
        "INT8[]" => Value::from(row.try_get::<Vec<i64>, _>(idx)?),
        "BOOL[]" => Value::from(row.try_get::<Vec<bool>, _>(idx)?),
        "UUID[]" => Value::from(
            row.try_get::<Vec<uuid::Uuid>, _>(idx)?
                .iter()
                .map(|u| u.to_string())
                .collect::<Vec<_>>(),
        ),
        // Enums and other text-encoded types.
        other => match row.try_get_unchecked::<String, _>(idx) {
            Ok(text) => Value::String(text),
            Err(e) => {
                return Err(BackupError::Sqlx(sqlx::Error::Decode(
                    format!("unsupported column type {}: {}", other, e).into(),
                )));
            }
        },
    };
    Ok(value)
}

fn float_to_json(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}

fn bytea_to_string(bytes: &[u8]) -> String {
    format!("\\x{}", hex::encode(bytes))
}

fn naive_datetime_to_iso(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn naive_date_to_iso(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn naive_time_to_iso(value: NaiveTime) -> String {
    value.format("%H:%M:%S%.f").to_string()
}

/// A table whose rows were fully written.
#[derive(Debug, Clone)]
pub struct DumpedTable {
    pub file_name: String,
    pub rows: u64,
}

/// Dumps one table into `<out_dir>/<schema>_<table>.jsonl`.
///
/// A failure part way through leaves the partial file on disk and comes
/// back as `BackupError::TableDump`; it is never propagated further by the
/// orchestrator.
pub async fn dump_table<S>(source: &mut S, table: &TableRef, out_dir: &Path) -> Result<DumpedTable>
where
    S: TableSource + ?Sized,
{
    let file_name = table.dump_file_name();
    let path = out_dir.join(&file_name);

    match write_rows(source.stream_rows(table), &path).await {
        Ok(rows) => {
            debug!(table = %table, rows, file = %file_name, "Table dumped");
            Ok(DumpedTable {
                file_name,
                rows,
            })
        }
        Err(e) => {
            error!(table = %table, path = %path.display(), error = %e, "Failed to dump table");
            Err(BackupError::table_dump(table, e))
        }
    }
}

/// Writes each row as one JSON object per line. Returns the number of rows.
pub async fn write_rows<St>(mut rows: St, path: &Path) -> Result<u64>
where
    St: Stream<Item = Result<JsonRow>> + Unpin,
{
    let file = tokio::fs::File::create(path).await?;
    let mut writer = BufWriter::new(file);
    let mut count = 0u64;

    let written: Result<()> = async {
        while let Some(row) = rows.try_next().await? {
            let mut line = serde_json::to_vec(&row)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            count += 1;
        }
        Ok(())
    }
    .await;

    // Flush what was read even on failure so the partial file is inspectable.
    let flushed = writer.flush().await;
    written?;
    flushed?;
    Ok(count)
}
