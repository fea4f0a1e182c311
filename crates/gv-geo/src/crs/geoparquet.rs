//! GeoParquet `geo` metadata and CRS value parsing

use std::collections::HashMap;

use gv_core::{GeometryKind, ResolvedCrs};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::FileMetadata;

/// Key under which GeoParquet stores its file-level metadata
pub const GEO_METADATA_KEY: &str = "geo";

/// File-level GeoParquet metadata.
///
/// Only the fields needed for CRS and kind detection are kept; unknown fields
/// are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoParquetMetadata {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub primary_column: Option<String>,
    #[serde(default)]
    pub columns: HashMap<String, GeoParquetColumnMetadata>,
}

/// Per-column entry of the `geo` metadata
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoParquetColumnMetadata {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub geometry_types: Vec<String>,
    /// PROJJSON object or identifier string. Absent or null means OGC:CRS84.
    #[serde(default)]
    pub crs: Option<Value>,
}

impl GeoParquetMetadata {
    /// Parse the `geo` entry of a file, if present and well-formed
    pub fn from_file(metadata: &FileMetadata) -> Option<Self> {
        let raw = metadata.key_values.get(GEO_METADATA_KEY)?;
        serde_json::from_str(raw).ok()
    }
}

/// Resolve from the file-level `geo` entry.
///
/// Once the entry parses as JSON the answer is final: whatever it fails to
/// say about the column resolves to WGS84 rather than falling through.
pub fn from_geo_metadata(metadata: &FileMetadata, column: &str) -> Option<ResolvedCrs> {
    let raw = metadata.key_values.get(GEO_METADATA_KEY)?;
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            debug!(%error, "Ignoring unparseable geo metadata");
            return None;
        }
    };

    let geo: GeoParquetMetadata = match serde_json::from_value(value) {
        Ok(geo) => geo,
        Err(error) => {
            debug!(%error, "Geo metadata has an unexpected shape, assuming WGS84");
            return Some(ResolvedCrs::Wgs84);
        }
    };

    let Some(entry) = geo.columns.get(column) else {
        debug!(column, "Geo metadata does not describe column, assuming WGS84");
        return Some(ResolvedCrs::Wgs84);
    };

    Some(match &entry.crs {
        None => ResolvedCrs::Wgs84,
        Some(crs) => crs_from_json(crs).unwrap_or_else(|| {
            debug!(column, "Unrecognized CRS in geo metadata, assuming WGS84");
            ResolvedCrs::Wgs84
        }),
    })
}

/// Geometry kinds the `geo` entry declares for a column.
///
/// Dimension suffixes (`" Z"`, `" M"`) are ignored and duplicates removed.
pub fn declared_geometry_kinds(metadata: &FileMetadata, column: &str) -> Vec<GeometryKind> {
    let Some(geo) = GeoParquetMetadata::from_file(metadata) else {
        return Vec::new();
    };
    let Some(entry) = geo.columns.get(column) else {
        return Vec::new();
    };

    let mut kinds: Vec<GeometryKind> = entry
        .geometry_types
        .iter()
        .filter_map(|name| GeometryKind::from_label(name))
        .collect();
    kinds.sort();
    kinds.dedup();
    kinds
}

/// Interpret a CRS given as JSON: a PROJJSON object, an identifier string, a
/// bare EPSG number or null.
pub fn crs_from_json(value: &Value) -> Option<ResolvedCrs> {
    match value {
        Value::Null => Some(ResolvedCrs::Wgs84),
        Value::String(text) => crs_from_str(text),
        Value::Number(number) => number
            .as_u64()
            .and_then(|code| u32::try_from(code).ok())
            .map(ResolvedCrs::from_epsg),
        Value::Object(object) => {
            if let Some(id) = object.get("id") {
                if let Some(crs) = crs_from_id(id) {
                    return Some(crs);
                }
            }
            if let Some(Value::Array(ids)) = object.get("ids") {
                if let Some(crs) = ids.iter().find_map(crs_from_id) {
                    return Some(crs);
                }
            }
            // BoundCRS wraps the CRS the coordinates are actually in
            if let Some(source) = object.get("source_crs") {
                if let Some(crs) = crs_from_json(source) {
                    return Some(crs);
                }
            }
            match object.get("name") {
                Some(Value::String(name)) if name.to_ascii_uppercase().contains("CRS84") => {
                    Some(ResolvedCrs::Wgs84)
                }
                _ => None,
            }
        }
        Value::Bool(_) | Value::Array(_) => None,
    }
}

/// PROJJSON `id` member: `{"authority": "EPSG", "code": 32633}`
fn crs_from_id(id: &Value) -> Option<ResolvedCrs> {
    let authority = id.get("authority")?.as_str()?;
    let code = match id.get("code")? {
        Value::Number(number) => number.as_u64()?.to_string(),
        Value::String(text) => text.clone(),
        _ => return None,
    };
    crs_from_authority(authority, &code)
}

fn crs_from_authority(authority: &str, code: &str) -> Option<ResolvedCrs> {
    let authority = authority.trim().to_ascii_uppercase();
    let code = code.trim();
    match authority.as_str() {
        "EPSG" => code.parse::<u32>().ok().map(ResolvedCrs::from_epsg),
        "OGC" if code.eq_ignore_ascii_case("CRS84") => Some(ResolvedCrs::Wgs84),
        _ => None,
    }
}

/// Interpret a CRS identifier string.
///
/// Accepts `AUTH:CODE`, the `urn:ogc:def:crs:` and `http://www.opengis.net/def/crs/`
/// forms, bare EPSG numbers, CRS84 names and embedded JSON.
pub fn crs_from_str(text: &str) -> Option<ResolvedCrs> {
    let text = text.trim();
    if text.is_empty() {
        return Some(ResolvedCrs::Wgs84);
    }
    if text.starts_with('{') {
        let value: Value = serde_json::from_str(text).ok()?;
        return crs_from_json(&value);
    }
    if text.to_ascii_uppercase().contains("CRS84") {
        return Some(ResolvedCrs::Wgs84);
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse::<u32>().ok().map(ResolvedCrs::from_epsg);
    }

    let lower = text.to_ascii_lowercase();
    if lower.starts_with("urn:ogc:def:crs:") {
        // urn:ogc:def:crs:EPSG::4326 or urn:ogc:def:crs:EPSG:9.8:4326
        let parts: Vec<&str> = text.split(':').collect();
        let authority = parts.get(4)?;
        let code = parts.last()?;
        return crs_from_authority(authority, code);
    }
    if lower.starts_with("http://www.opengis.net/def/crs/") || lower.starts_with("https://www.opengis.net/def/crs/") {
        // .../def/crs/EPSG/0/4326
        let parts: Vec<&str> = text.trim_end_matches('/').split('/').collect();
        let code = parts.last()?;
        let authority = parts.get(parts.len().checked_sub(3)?)?;
        return crs_from_authority(authority, code);
    }

    let (authority, code) = text.split_once(':')?;
    crs_from_authority(authority, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_projjson_id() {
        let crs = json!({
            "type": "ProjectedCRS",
            "name": "WGS 84 / UTM zone 33N",
            "id": {"authority": "EPSG", "code": 32633}
        });
        assert_eq!(crs_from_json(&crs), Some(ResolvedCrs::Epsg(32633)));

        let crs = json!({"id": {"authority": "EPSG", "code": "5070"}});
        assert_eq!(crs_from_json(&crs), Some(ResolvedCrs::Epsg(5070)));

        let crs = json!({"id": {"authority": "OGC", "code": "CRS84"}});
        assert_eq!(crs_from_json(&crs), Some(ResolvedCrs::Wgs84));
    }

    #[test]
    fn test_bound_crs_uses_source() {
        let crs = json!({
            "type": "BoundCRS",
            "source_crs": {"id": {"authority": "EPSG", "code": 27700}},
            "target_crs": {"id": {"authority": "EPSG", "code": 4326}}
        });
        assert_eq!(crs_from_json(&crs), Some(ResolvedCrs::Epsg(27700)));
    }

    #[test]
    fn test_crs84_name_without_id() {
        let crs = json!({"type": "GeographicCRS", "name": "WGS 84 (CRS84)"});
        assert_eq!(crs_from_json(&crs), Some(ResolvedCrs::Wgs84));
        assert_eq!(crs_from_json(&json!({"name": "Unknown"})), None);
    }

    #[test]
    fn test_identifier_strings() {
        assert_eq!(crs_from_str("EPSG:3857"), Some(ResolvedCrs::Epsg(3857)));
        assert_eq!(crs_from_str("epsg:4326"), Some(ResolvedCrs::Wgs84));
        assert_eq!(crs_from_str("OGC:CRS84"), Some(ResolvedCrs::Wgs84));
        assert_eq!(crs_from_str("urn:ogc:def:crs:EPSG::2154"), Some(ResolvedCrs::Epsg(2154)));
        assert_eq!(
            crs_from_str("http://www.opengis.net/def/crs/EPSG/0/32618"),
            Some(ResolvedCrs::Epsg(32618))
        );
        assert_eq!(crs_from_str("32633"), Some(ResolvedCrs::Epsg(32633)));
        assert_eq!(crs_from_str("ESRI:102003"), None);
        assert_eq!(crs_from_str("nonsense"), None);
    }
}
