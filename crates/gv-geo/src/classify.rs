//! Geometry column detection
//!
//! Picks the column of a schema that carries geometry and decides how its
//! values are encoded. Rules are tried in priority order and the first column
//! matching the highest-priority rule wins.

use gv_core::{GeometryColumn, GeometryColumnKind, SchemaField};

/// Declared-type keywords naming the engine's spatial types
const GEOMETRY_TYPE_KEYWORDS: [&str; 8] = [
    "GEOMETRY",
    "GEOGRAPHY",
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
];

/// Column names conventionally used for geometry
const WELL_KNOWN_NAMES: [&str; 5] = ["geometry", "geom", "wkb_geometry", "the_geom", "shape"];

/// Substrings that hint at a geometry column
const NAME_HINTS: [&str; 3] = ["geom", "wkt", "shape"];

const BINARY_TYPE_MARKERS: [&str; 4] = ["BLOB", "BINARY", "BYTEA", "WKB"];

fn is_spatial_type(declared_type: &str) -> bool {
    let upper = declared_type.to_ascii_uppercase();
    // GEOMETRYCOLLECTION contains GEOMETRY
    GEOMETRY_TYPE_KEYWORDS.iter().any(|keyword| upper.contains(keyword))
}

/// Whether a declared type stores raw bytes
pub fn is_binary_type(declared_type: &str) -> bool {
    let upper = declared_type.to_ascii_uppercase();
    BINARY_TYPE_MARKERS.iter().any(|marker| upper.contains(marker))
}

fn is_well_known_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    WELL_KNOWN_NAMES.contains(&lower.as_str())
}

fn has_name_hint(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    NAME_HINTS.iter().any(|hint| lower.contains(hint))
}

fn blob_or_text(field: &SchemaField) -> GeometryColumnKind {
    if is_binary_type(&field.declared_type) {
        GeometryColumnKind::RawWkbBlob
    } else {
        GeometryColumnKind::TextualGeoJson
    }
}

fn native_type(field: &SchemaField) -> Option<GeometryColumnKind> {
    is_spatial_type(&field.declared_type).then_some(GeometryColumnKind::NativeSpatial)
}

fn well_known_blob(field: &SchemaField) -> Option<GeometryColumnKind> {
    (is_well_known_name(&field.name) && is_binary_type(&field.declared_type))
        .then_some(GeometryColumnKind::RawWkbBlob)
}

fn well_known_any(field: &SchemaField) -> Option<GeometryColumnKind> {
    is_well_known_name(&field.name).then(|| blob_or_text(field))
}

fn hinted_blob(field: &SchemaField) -> Option<GeometryColumnKind> {
    (has_name_hint(&field.name) && is_binary_type(&field.declared_type)).then_some(GeometryColumnKind::RawWkbBlob)
}

fn hinted_any(field: &SchemaField) -> Option<GeometryColumnKind> {
    has_name_hint(&field.name).then_some(GeometryColumnKind::TextualGeoJson)
}

type Rule = fn(&SchemaField) -> Option<GeometryColumnKind>;

const RULES: [Rule; 5] = [native_type, well_known_blob, well_known_any, hinted_blob, hinted_any];

/// Find the geometry column of a schema, or `None` for a plain table
pub fn classify(schema: &[SchemaField]) -> Option<GeometryColumn> {
    RULES.iter().find_map(|rule| {
        schema
            .iter()
            .find_map(|field| rule(field).map(|kind| GeometryColumn::new(field.name.clone(), kind)))
    })
}
