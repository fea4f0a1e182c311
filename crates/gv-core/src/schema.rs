//! Schema description produced by introspecting a file

use serde::{Deserialize, Serialize};

/// A single column as reported by the engine's schema introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    /// Engine type name, e.g. `GEOMETRY`, `BLOB`, `VARCHAR`
    pub declared_type: String,
    pub nullable: bool,
}

impl SchemaField {
    /// Create a new schema field
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable,
        }
    }
}

/// How a geometry column stores its values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryColumnKind {
    /// The engine's own spatial type
    NativeSpatial,
    /// Well-known binary stored in a blob column
    RawWkbBlob,
    /// GeoJSON geometry objects stored as text
    TextualGeoJson,
}

/// The column chosen to carry geometry for a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryColumn {
    pub name: String,
    pub kind: GeometryColumnKind,
}

impl GeometryColumn {
    pub fn new(name: impl Into<String>, kind: GeometryColumnKind) -> Self {
        Self { name: name.into(), kind }
    }
}
