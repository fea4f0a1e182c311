//! SQLite execution context
//!
//! An embedded context backed by `rusqlite`. Statement rows are streamed into
//! Arrow record batches of a fixed number of rows; session settings live in a
//! shared map that SQL can read back through `current_setting(name)`.

use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use anyhow::Context as _;
use arrow::array::{ArrayRef, BinaryArray, BooleanArray, Float64Array, Int64Array, NullArray, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use gv_core::SchemaField;
use parking_lot::RwLock;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value, ValueRef};
use rusqlite::Statement;
use tracing::debug;

use super::{spatial, Connection, Database, DatabaseFactory, Interrupter, SendOutcome};
use crate::config::EngineConfig;

type Settings = Arc<RwLock<AHashMap<String, String>>>;

/// SQLite-backed execution context
pub struct SqliteContext {
    conn: rusqlite::Connection,
    settings: Settings,
    chunk_rows: usize,
}

impl SqliteContext {
    /// Open a private in-memory database
    pub fn open_in_memory(config: &EngineConfig) -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::with_connection(conn, config)
    }

    /// Open a database file
    pub fn open<P: AsRef<Path>>(path: P, config: &EngineConfig) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        Self::with_connection(conn, config)
    }

    fn with_connection(conn: rusqlite::Connection, config: &EngineConfig) -> anyhow::Result<Self> {
        let settings: Settings = Arc::default();

        let lookup = AssertUnwindSafe(settings.clone());
        conn.create_scalar_function(
            "current_setting",
            1,
            FunctionFlags::SQLITE_UTF8,
            move |ctx| {
                let name: String = ctx.get(0)?;
                Ok(lookup.read().get(&name).cloned())
            },
        )
        .context("Failed to register current_setting")?;

        Ok(Self {
            conn,
            settings,
            chunk_rows: config.effective_chunk_rows(),
        })
    }

    /// Factory for in-memory contexts
    pub fn factory() -> DatabaseFactory {
        Arc::new(|config: &EngineConfig| {
            let context = SqliteContext::open_in_memory(config)?;
            Ok(Box::new(context) as Box<dyn Database>)
        })
    }

    /// Factory for contexts over a database file
    pub fn file_factory(path: impl Into<PathBuf>) -> DatabaseFactory {
        let path = path.into();
        Arc::new(move |config: &EngineConfig| {
            let context = SqliteContext::open(&path, config)?;
            Ok(Box::new(context) as Box<dyn Database>)
        })
    }

    /// Current value of a session setting
    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.read().get(key).cloned()
    }
}

impl Database for SqliteContext {
    fn connect(&mut self) -> anyhow::Result<Box<dyn Connection + '_>> {
        Ok(Box::new(SqliteConnection {
            conn: &self.conn,
            chunk_rows: self.chunk_rows,
        }))
    }

    fn load_extension(&mut self, name: &str) -> anyhow::Result<()> {
        match name {
            "spatial" => spatial::register(&self.conn).context("Failed to register spatial functions"),
            other => anyhow::bail!("Extension '{}' is not available in the SQLite context", other),
        }
    }

    fn apply_setting(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        debug!(key, "Applying session setting");
        self.settings.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let handle = self.conn.get_interrupt_handle();
        Some(Arc::new(move || handle.interrupt()))
    }
}

struct SqliteConnection<'a> {
    conn: &'a rusqlite::Connection,
    chunk_rows: usize,
}

impl Connection for SqliteConnection<'_> {
    fn query(&mut self, sql: &str) -> anyhow::Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        let mut statement = self.conn.prepare(sql).context("Failed to prepare query")?;
        if statement.column_count() == 0 {
            statement.execute([]).context("Failed to execute statement")?;
            return Ok(batches);
        }

        stream(&mut statement, self.chunk_rows, &mut |batch| {
            batches.push(batch);
            ControlFlow::Continue(())
        })?;
        Ok(batches)
    }

    fn send(
        &mut self,
        sql: &str,
        on_chunk: &mut dyn FnMut(RecordBatch) -> ControlFlow<()>,
    ) -> anyhow::Result<SendOutcome> {
        let mut statement = self.conn.prepare(sql).context("Failed to prepare query")?;
        if statement.column_count() == 0 {
            statement.execute([]).context("Failed to execute statement")?;
            let empty = RecordBatch::new_empty(Arc::new(Schema::empty()));
            return Ok(match on_chunk(empty) {
                ControlFlow::Continue(()) => SendOutcome::Completed,
                ControlFlow::Break(()) => SendOutcome::Interrupted,
            });
        }
        stream(&mut statement, self.chunk_rows, on_chunk)
    }

    fn describe(&mut self, sql: &str) -> anyhow::Result<Vec<SchemaField>> {
        let mut statement = self.conn.prepare(sql).context("Failed to prepare query")?;
        let declared: Vec<(String, Option<String>)> = statement
            .columns()
            .iter()
            .map(|column| (column.name().to_string(), column.decl_type().map(str::to_string)))
            .collect();

        // Expression columns carry no declared type; use the first row's storage class
        let mut observed = vec![None; declared.len()];
        if declared.iter().any(|(_, decl)| decl.is_none()) {
            let mut rows = statement.query([]).context("Failed to execute query")?;
            if let Some(row) = rows.next().context("Failed to fetch row")? {
                for (idx, slot) in observed.iter_mut().enumerate() {
                    *slot = storage_class(row.get_ref(idx)?);
                }
            }
        }

        Ok(declared
            .into_iter()
            .zip(observed)
            .map(|((name, decl), seen)| {
                let declared_type = decl.or(seen.map(str::to_string)).unwrap_or_default();
                SchemaField::new(name, declared_type, true)
            })
            .collect())
    }
}

fn storage_class(value: ValueRef<'_>) -> Option<&'static str> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(_) => Some("INTEGER"),
        ValueRef::Real(_) => Some("REAL"),
        ValueRef::Text(_) => Some("TEXT"),
        ValueRef::Blob(_) => Some("BLOB"),
    }
}

/// Arrow type for a declared SQLite column type
fn arrow_type_for_declared(declared: &str) -> Option<DataType> {
    let upper = declared.trim().to_ascii_uppercase();
    let data_type = match upper.as_str() {
        "INTEGER" | "BIGINT" | "INT" => DataType::Int64,
        "REAL" | "FLOAT" | "DOUBLE" => DataType::Float64,
        "TEXT" | "VARCHAR" => DataType::Utf8,
        "BOOLEAN" => DataType::Boolean,
        "BLOB" | "GEOMETRY" | "WKB" => DataType::Binary,
        "DATE" | "DATETIME" | "TIMESTAMP" => DataType::Utf8, // Parse as string for now
        // SQLite type affinity rules
        _ if upper.contains("INT") => DataType::Int64,
        _ if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") => DataType::Utf8,
        _ if upper.contains("BLOB") => DataType::Binary,
        _ if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") => DataType::Float64,
        _ => return None,
    };
    Some(data_type)
}

fn arrow_type_for_value(value: &Value) -> Option<DataType> {
    match value {
        Value::Null => None,
        Value::Integer(_) => Some(DataType::Int64),
        Value::Real(_) => Some(DataType::Float64),
        Value::Text(_) => Some(DataType::Utf8),
        Value::Blob(_) => Some(DataType::Binary),
    }
}

/// Accumulates rows of one statement into fixed-size record batches.
///
/// Column types come from the declared type when there is one, otherwise from
/// the first non-null value seen. Until a column's type is known its chunks
/// are typed `Null`.
struct ChunkBuilder {
    names: Vec<String>,
    types: Vec<Option<DataType>>,
    rows: Vec<Vec<Value>>,
    chunk_rows: usize,
}

impl ChunkBuilder {
    fn new(statement: &Statement<'_>, chunk_rows: usize) -> Self {
        let columns = statement.columns();
        Self {
            names: columns.iter().map(|c| c.name().to_string()).collect(),
            types: columns
                .iter()
                .map(|c| c.decl_type().and_then(arrow_type_for_declared))
                .collect(),
            rows: Vec::with_capacity(chunk_rows),
            chunk_rows,
        }
    }

    fn push_row(&mut self, row: &rusqlite::Row<'_>) -> rusqlite::Result<()> {
        let mut values = Vec::with_capacity(self.names.len());
        for idx in 0..self.names.len() {
            values.push(Value::from(row.get_ref(idx)?));
        }
        self.rows.push(values);
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.rows.len() >= self.chunk_rows
    }

    fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    fn finish_chunk(&mut self) -> anyhow::Result<RecordBatch> {
        let rows = std::mem::replace(&mut self.rows, Vec::with_capacity(self.chunk_rows));

        for (idx, slot) in self.types.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = rows.iter().find_map(|row| arrow_type_for_value(&row[idx]));
            }
        }
        let chunk_types: Vec<Option<DataType>> = self
            .types
            .iter()
            .enumerate()
            .map(|(idx, data_type)| chunk_type(&self.names[idx], data_type.as_ref(), &rows, idx))
            .collect();

        let schema: SchemaRef = Arc::new(Schema::new(
            self.names
                .iter()
                .zip(&chunk_types)
                .map(|(name, data_type)| Field::new(name, data_type.clone().unwrap_or(DataType::Null), true))
                .collect::<Vec<_>>(),
        ));

        let columns: Vec<ArrayRef> = chunk_types
            .iter()
            .enumerate()
            .map(|(idx, data_type)| build_column(data_type.as_ref(), rows.iter().map(|row| &row[idx]), rows.len()))
            .collect();

        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

/// Type of one column within a chunk.
///
/// SQLite stores non-integral numbers in INTEGER columns as REAL; such chunks
/// are widened to Float64 so no value is truncated.
fn chunk_type(name: &str, data_type: Option<&DataType>, rows: &[Vec<Value>], idx: usize) -> Option<DataType> {
    match data_type {
        Some(DataType::Int64) if rows.iter().any(|row| matches!(row[idx], Value::Real(_))) => {
            debug!(column = name, "Widening integer column holding real values");
            Some(DataType::Float64)
        }
        other => other.cloned(),
    }
}

fn build_column<'a>(
    data_type: Option<&DataType>,
    values: impl Iterator<Item = &'a Value>,
    len: usize,
) -> ArrayRef {
    match data_type {
        Some(DataType::Int64) => Arc::new(Int64Array::from_iter(values.map(|value| match value {
            Value::Integer(i) => Some(*i),
            _ => None,
        }))),
        Some(DataType::Float64) => Arc::new(Float64Array::from_iter(values.map(|value| match value {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }))),
        Some(DataType::Boolean) => Arc::new(BooleanArray::from_iter(values.map(|value| match value {
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }))),
        Some(DataType::Binary) => Arc::new(BinaryArray::from_iter(values.map(|value| match value {
            Value::Blob(bytes) => Some(bytes.as_slice()),
            Value::Text(text) => Some(text.as_bytes()),
            _ => None,
        }))),
        Some(_) => Arc::new(StringArray::from_iter(values.map(|value| match value {
            Value::Text(text) => Some(text.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Blob(_) | Value::Null => None,
        }))),
        None => Arc::new(NullArray::new(len)),
    }
}

/// Run a row-returning statement, delivering chunks to `on_chunk`
fn stream(
    statement: &mut Statement<'_>,
    chunk_rows: usize,
    on_chunk: &mut dyn FnMut(RecordBatch) -> ControlFlow<()>,
) -> anyhow::Result<SendOutcome> {
    let mut chunk = ChunkBuilder::new(statement, chunk_rows);
    let mut delivered = false;

    let mut rows = statement.query([]).context("Failed to execute query")?;
    while let Some(row) = rows.next().context("Failed to fetch row")? {
        chunk.push_row(row)?;
        if chunk.is_full() {
            delivered = true;
            if on_chunk(chunk.finish_chunk()?).is_break() {
                return Ok(SendOutcome::Interrupted);
            }
        }
    }

    if chunk.has_rows() || !delivered {
        if on_chunk(chunk.finish_chunk()?).is_break() {
            return Ok(SendOutcome::Interrupted);
        }
    }
    Ok(SendOutcome::Completed)
}
