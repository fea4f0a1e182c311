//! Attribute values handed to table and tooltip consumers

use arrow::datatypes::DataType;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// A single attribute cell in the caller-facing representation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::UInt(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Values of one attribute column together with its declared type
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeColumn {
    pub declared_type: DataType,
    pub values: Vec<AttributeValue>,
}

impl AttributeColumn {
    pub fn new(declared_type: DataType) -> Self {
        Self {
            declared_type,
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
