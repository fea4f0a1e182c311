//! Collects the chunks of a wrapped map query into a [`MapQueryResult`]

use ahash::AHashSet;
use arrow::array::{Array, AsArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use gv_core::{AttributeColumn, AttributeValue, GeometryKind, MapQueryResult};
use gv_geo::expr::{GEOMETRY_TYPE_ALIAS, WKB_ALIAS};
use indexmap::IndexMap;
use tracing::debug;

use crate::extract::extract_into;
use crate::QueryError;

/// Label used when rows disagree on their geometry type or there are none
const MIXED_LABEL: &str = "GEOMETRY";

fn is_binary(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) | DataType::BinaryView
    )
}

/// Normalize an engine type label, keeping unknown labels in upper case
fn normalize_label(label: &str) -> String {
    match GeometryKind::from_label(label) {
        Some(kind) => kind.label().to_string(),
        None => label.trim().to_ascii_uppercase(),
    }
}

/// Accumulates map query chunks in arrival order
#[derive(Debug, Default)]
pub struct MapAccumulator {
    /// Source geometry column, never reported as an attribute
    geometry_column: Option<String>,
    wkb_arrays: Vec<Option<Vec<u8>>>,
    attributes: IndexMap<String, AttributeColumn>,
    /// Columns dropped because some chunk delivered them as binary
    skipped: AHashSet<String>,
    label: Option<String>,
    mixed: bool,
    row_count: usize,
}

impl MapAccumulator {
    pub fn new(geometry_column: Option<String>) -> Self {
        Self {
            geometry_column,
            ..Default::default()
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Append one chunk.
    ///
    /// Chunks without columns carry nothing and are ignored. Any other chunk
    /// must hold the WKB column.
    pub fn push(&mut self, batch: &RecordBatch) -> Result<(), QueryError> {
        if batch.num_columns() == 0 {
            return Ok(());
        }
        let schema = batch.schema();
        let wkb_index = schema
            .index_of(WKB_ALIAS)
            .map_err(|_| QueryError::Failed(format!("map query result has no {} column", WKB_ALIAS)))?;

        self.push_geometry(batch.column(wkb_index).as_ref())?;
        if let Ok(index) = schema.index_of(GEOMETRY_TYPE_ALIAS) {
            self.push_labels(batch.column(index).as_ref());
        }

        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            let name = field.name();
            if name == WKB_ALIAS
                || name == GEOMETRY_TYPE_ALIAS
                || self.geometry_column.as_deref() == Some(name.as_str())
                || self.skipped.contains(name)
            {
                continue;
            }
            if is_binary(field.data_type()) {
                if self.attributes.shift_remove(name).is_some() {
                    debug!(column = %name, "Dropping attribute that turned out binary");
                }
                self.skipped.insert(name.clone());
                continue;
            }

            let attribute = self
                .attributes
                .entry(name.clone())
                .or_insert_with(|| AttributeColumn::new(field.data_type().clone()));
            if attribute.declared_type == DataType::Null {
                attribute.declared_type = field.data_type().clone();
            }
            // Columns first seen in a later chunk start with nulls
            if attribute.values.len() < self.row_count {
                attribute.values.resize(self.row_count, AttributeValue::Null);
            }
            extract_into(&mut attribute.values, column.as_ref());
        }

        self.row_count += batch.num_rows();
        Ok(())
    }

    fn push_geometry(&mut self, column: &dyn Array) -> Result<(), QueryError> {
        match column.data_type() {
            DataType::Binary => {
                let values = column.as_binary::<i32>().iter();
                self.wkb_arrays.extend(values.map(|wkb| wkb.map(<[u8]>::to_vec)));
            }
            DataType::LargeBinary => {
                let values = column.as_binary::<i64>().iter();
                self.wkb_arrays.extend(values.map(|wkb| wkb.map(<[u8]>::to_vec)));
            }
            DataType::BinaryView => {
                let values = column.as_binary_view().iter();
                self.wkb_arrays.extend(values.map(|wkb| wkb.map(<[u8]>::to_vec)));
            }
            // Every geometry in the chunk is null
            DataType::Null => self.wkb_arrays.extend((0..column.len()).map(|_| None)),
            other => {
                return Err(QueryError::Failed(format!(
                    "{} column has type {}, expected binary",
                    WKB_ALIAS, other
                )))
            }
        }
        Ok(())
    }

    fn push_labels(&mut self, column: &dyn Array) {
        let labels: Vec<Option<&str>> = match column.data_type() {
            DataType::Utf8 => column.as_string::<i32>().iter().collect(),
            DataType::LargeUtf8 => column.as_string::<i64>().iter().collect(),
            _ => return,
        };
        for label in labels.into_iter().flatten() {
            self.observe_label(normalize_label(label));
        }
    }

    fn observe_label(&mut self, label: String) {
        if self.mixed {
            return;
        }
        match &self.label {
            None => self.label = Some(label),
            Some(first) if *first != label => self.mixed = true,
            Some(_) => {}
        }
    }

    pub fn finish(self) -> MapQueryResult {
        let Self {
            wkb_arrays,
            mut attributes,
            label,
            mixed,
            row_count,
            ..
        } = self;

        for attribute in attributes.values_mut() {
            attribute.values.resize(row_count, AttributeValue::Null);
        }
        let geometry_type = match label {
            Some(label) if !mixed => label,
            _ => MIXED_LABEL.to_string(),
        };

        MapQueryResult {
            wkb_arrays,
            geometry_type,
            attributes,
            row_count,
        }
    }
}
