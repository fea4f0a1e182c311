//! Reading file metadata through the execution context
//!
//! The key/value footer and per-column logical type annotations are fetched
//! with two table-function queries. Either may fail (unsupported format,
//! missing file, backend without the functions); the part it would have
//! filled is then left empty and CRS resolution falls back accordingly.

use std::borrow::Cow;

use arrow::array::{Array, AsArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use gv_geo::crs::FileMetadata;
use gv_geo::expr::quote_literal;
use tracing::debug;

use crate::QueryError;

pub fn key_value_query(path: &str) -> String {
    format!("SELECT key, value FROM parquet_kv_metadata({})", quote_literal(path))
}

pub fn schema_query(path: &str) -> String {
    format!("SELECT name, logical_type FROM parquet_schema({})", quote_literal(path))
}

/// Values of a text-like column, decoding binary as lossy UTF-8
fn strings(column: &dyn Array) -> Vec<Option<Cow<'_, str>>> {
    match column.data_type() {
        DataType::Utf8 => column.as_string::<i32>().iter().map(|v| v.map(Cow::Borrowed)).collect(),
        DataType::LargeUtf8 => column.as_string::<i64>().iter().map(|v| v.map(Cow::Borrowed)).collect(),
        DataType::Binary => column
            .as_binary::<i32>()
            .iter()
            .map(|v| v.map(String::from_utf8_lossy))
            .collect(),
        DataType::LargeBinary => column
            .as_binary::<i64>()
            .iter()
            .map(|v| v.map(String::from_utf8_lossy))
            .collect(),
        _ => vec![None; column.len()],
    }
}

/// Pairs from the first two columns of every batch, skipping rows where
/// either side is null
fn pairs(batches: &[RecordBatch]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for batch in batches.iter().filter(|batch| batch.num_columns() >= 2) {
        let keys = strings(batch.column(0).as_ref());
        let values = strings(batch.column(1).as_ref());
        for (key, value) in keys.into_iter().zip(values) {
            if let (Some(key), Some(value)) = (key, value) {
                out.push((key.into_owned(), value.into_owned()));
            }
        }
    }
    out
}

/// Combine the results of [`key_value_query`] and [`schema_query`]
pub fn assemble(
    path: &str,
    key_values: Result<Vec<RecordBatch>, QueryError>,
    schema: Result<Vec<RecordBatch>, QueryError>,
) -> FileMetadata {
    let mut metadata = FileMetadata::new();

    match key_values {
        Ok(batches) => metadata.key_values.extend(pairs(&batches)),
        Err(error) => debug!(path, %error, "No key/value metadata"),
    }
    match schema {
        Ok(batches) => metadata.column_annotations.extend(pairs(&batches)),
        Err(error) => debug!(path, %error, "No column annotations"),
    }

    metadata
}
