//! CRS resolution from file metadata
//!
//! Files describe their coordinate reference system in several incompatible
//! ways. Resolution runs an ordered list of independent strategies, each a pure
//! function of the file's metadata and the geometry column; the first one that
//! reaches a verdict wins and anything undecided falls back to WGS84.

pub mod annotation;
pub mod geoparquet;

use ahash::AHashMap;
use gv_core::{GeometryKind, ResolvedCrs};
use parking_lot::RwLock;
use tracing::debug;

pub use geoparquet::{crs_from_json, crs_from_str, GeoParquetMetadata, GEO_METADATA_KEY};

/// Metadata read from a file before querying it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    /// File-level key/value entries, e.g. the GeoParquet `geo` JSON
    pub key_values: AHashMap<String, String>,
    /// Logical type annotation per column, e.g. `GeometryType(crs=srid:5070)`
    pub column_annotations: AHashMap<String, String>,
}

impl FileMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key_values.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, column: impl Into<String>, annotation: impl Into<String>) -> Self {
        self.column_annotations.insert(column.into(), annotation.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.key_values.is_empty() && self.column_annotations.is_empty()
    }

    /// The single geometry kind the file declares for a column, if it declares
    /// exactly one
    pub fn declared_geometry_kind(&self, column: &str) -> Option<GeometryKind> {
        match geoparquet::declared_geometry_kinds(self, column).as_slice() {
            [kind] => Some(*kind),
            _ => None,
        }
    }
}

/// A resolution strategy: `None` means "no verdict, try the next one"
pub type CrsStrategy = fn(&FileMetadata, &str) -> Option<ResolvedCrs>;

/// Strategies in priority order
pub const STRATEGIES: [(&str, CrsStrategy); 2] = [
    ("geo_metadata", geoparquet::from_geo_metadata),
    ("logical_type", annotation::from_annotation),
];

/// Resolve the CRS of `column`. Never fails; undecidable input gives WGS84.
pub fn resolve_crs(metadata: &FileMetadata, column: &str) -> ResolvedCrs {
    for (name, strategy) in STRATEGIES {
        if let Some(crs) = strategy(metadata, column) {
            debug!(strategy = name, column, %crs, "Resolved CRS");
            return crs;
        }
    }
    debug!(column, "No CRS information, assuming WGS84");
    ResolvedCrs::Wgs84
}

/// Session cache of resolved CRSes keyed by (path, column).
///
/// Lives in memory only; dropping it forgets every resolution.
#[derive(Debug, Default)]
pub struct CrsCache {
    entries: RwLock<AHashMap<(String, String), ResolvedCrs>>,
}

impl CrsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str, column: &str) -> Option<ResolvedCrs> {
        self.entries
            .read()
            .get(&(path.to_string(), column.to_string()))
            .copied()
    }

    pub fn insert(&self, path: &str, column: &str, crs: ResolvedCrs) {
        self.entries
            .write()
            .insert((path.to_string(), column.to_string()), crs);
    }

    /// Return the cached value or resolve it from `metadata` and remember it
    pub fn get_or_resolve(&self, path: &str, column: &str, metadata: &FileMetadata) -> ResolvedCrs {
        if let Some(crs) = self.get(path, column) {
            return crs;
        }
        let crs = resolve_crs(metadata, column);
        self.insert(path, column, crs);
        crs
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo(crs: &str) -> String {
        format!(
            r#"{{"version":"1.1.0","primary_column":"geometry","columns":{{"geometry":{{"encoding":"WKB","geometry_types":["Polygon"],"crs":{}}}}}}}"#,
            crs
        )
    }

    #[test]
    fn test_geo_metadata_short_circuits_annotation() {
        let metadata = FileMetadata::new()
            .with_key_value(GEO_METADATA_KEY, geo(r#"{"id":{"authority":"OGC","code":"CRS84"}}"#))
            .with_annotation("geometry", "GeometryType(crs=srid:5070)");
        assert_eq!(resolve_crs(&metadata, "geometry"), ResolvedCrs::Wgs84);

        let metadata = FileMetadata::new()
            .with_key_value(GEO_METADATA_KEY, geo(r#""EPSG:4326""#))
            .with_annotation("geometry", "GeometryType(crs=srid:5070)");
        assert_eq!(resolve_crs(&metadata, "geometry"), ResolvedCrs::Wgs84);
    }

    #[test]
    fn test_geo_metadata_projected() {
        let metadata = FileMetadata::new().with_key_value(
            GEO_METADATA_KEY,
            geo(r#"{"type":"ProjectedCRS","id":{"authority":"EPSG","code":32633}}"#),
        );
        assert_eq!(resolve_crs(&metadata, "geometry"), ResolvedCrs::Epsg(32633));
    }

    #[test]
    fn test_geo_metadata_is_authoritative_for_missing_column() {
        let metadata = FileMetadata::new()
            .with_key_value(GEO_METADATA_KEY, geo("null"))
            .with_annotation("other", "GeometryType(crs=srid:5070)");
        assert_eq!(resolve_crs(&metadata, "other"), ResolvedCrs::Wgs84);
        assert_eq!(resolve_crs(&metadata, "geometry"), ResolvedCrs::Wgs84);
    }

    #[test]
    fn test_unparseable_geo_falls_through() {
        let metadata = FileMetadata::new()
            .with_key_value(GEO_METADATA_KEY, "{not json")
            .with_annotation("geometry", "GeometryType(crs=srid:5070)");
        assert_eq!(resolve_crs(&metadata, "geometry"), ResolvedCrs::Epsg(5070));
    }

    #[test]
    fn test_annotation_only() {
        let metadata = FileMetadata::new().with_annotation("geom", "GeometryType(crs=<null>)");
        assert_eq!(resolve_crs(&metadata, "geom"), ResolvedCrs::Wgs84);

        let metadata = FileMetadata::new().with_annotation("geom", "GeometryType(crs=srid:5070)");
        assert_eq!(resolve_crs(&metadata, "geom"), ResolvedCrs::Epsg(5070));
    }

    #[test]
    fn test_fallback_when_nothing_known() {
        assert_eq!(resolve_crs(&FileMetadata::new(), "geometry"), ResolvedCrs::Wgs84);

        let metadata = FileMetadata::new().with_annotation("geom", "GeometryType(crs=projjson:absent)");
        assert_eq!(resolve_crs(&metadata, "geom"), ResolvedCrs::Wgs84);
    }

    #[test]
    fn test_declared_geometry_kind() {
        let metadata = FileMetadata::new().with_key_value(GEO_METADATA_KEY, geo("null"));
        assert_eq!(metadata.declared_geometry_kind("geometry"), Some(GeometryKind::Polygon));
        assert_eq!(metadata.declared_geometry_kind("missing"), None);
    }

    #[test]
    fn test_cache() {
        let cache = CrsCache::new();
        let metadata = FileMetadata::new().with_annotation("geom", "GeometryType(crs=srid:3857)");
        assert_eq!(cache.get_or_resolve("a.parquet", "geom", &metadata), ResolvedCrs::Epsg(3857));
        // Cached value wins over new metadata
        assert_eq!(
            cache.get_or_resolve("a.parquet", "geom", &FileMetadata::new()),
            ResolvedCrs::Epsg(3857)
        );
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
