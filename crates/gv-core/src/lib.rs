//! Core types for the geospatial query platform
//!
//! This crate provides the shared domain model used by the geometry pipeline
//! (`gv-geo`) and the query engine (`gv-data`).

pub mod attributes;
pub mod crs;
pub mod geometry;
pub mod map;
pub mod schema;

// Re-export commonly used types
pub use attributes::{AttributeColumn, AttributeValue};
pub use crs::{EpsgCode, ResolvedCrs};
pub use geometry::GeometryKind;
pub use map::MapQueryResult;
pub use schema::{GeometryColumn, GeometryColumnKind, SchemaField};
pub use data::GeoSource;

pub mod data {
    use crate::{GeometryColumn, MapQueryResult, ResolvedCrs, SchemaField};

    /// Trait for sources that can be drawn as map layers
    #[async_trait::async_trait]
    pub trait GeoSource: Send + Sync {
        /// Get the schema of this source
        fn schema(&self) -> &[SchemaField];

        /// Get the detected geometry column, if any
        fn geometry_column(&self) -> Option<&GeometryColumn>;

        /// Resolve the coordinate reference system of the geometry column
        async fn crs(&self) -> ResolvedCrs;

        /// Query geometry and attributes, normalized to WGS84 WKB
        async fn load_map(&self, limit: Option<usize>) -> anyhow::Result<MapQueryResult>;

        /// Query plain rows without geometry conversion
        async fn load_rows(&self, limit: Option<usize>) -> anyhow::Result<Vec<arrow::record_batch::RecordBatch>>;

        /// Get the source name/path
        fn source_name(&self) -> &str;
    }
}
