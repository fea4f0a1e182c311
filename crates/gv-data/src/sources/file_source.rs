//! File and relation sources served through the query engine

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use gv_core::data::GeoSource;
use gv_core::{GeometryColumn, MapQueryResult, ResolvedCrs, SchemaField};
use gv_geo::classify::classify;
use gv_geo::crs::CrsCache;
use gv_geo::expr::quote_literal;
use tracing::info;

use crate::engine::QueryEngine;
use crate::QueryError;

/// Table expression reading the file at `path`, chosen by extension
pub fn table_expression(path: &str) -> Option<String> {
    let extension = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    let function = match extension.as_str() {
        "parquet" | "geoparquet" => "read_parquet",
        "csv" | "tsv" => "read_csv_auto",
        "json" | "ndjson" | "jsonl" => "read_json_auto",
        "geojson" | "shp" | "gpkg" | "fgb" | "kml" => "ST_Read",
        _ => return None,
    };
    Some(format!("{}({})", function, quote_literal(path)))
}

/// A queryable source whose geometry column is detected from its schema
pub struct FileSource {
    engine: Arc<QueryEngine>,
    /// File path, or the relation name for sources opened from SQL
    path: String,
    relation: String,
    schema: Vec<SchemaField>,
    geometry: Option<GeometryColumn>,
    crs_cache: Arc<CrsCache>,
}

impl FileSource {
    /// Open a file by path
    pub async fn open(
        engine: Arc<QueryEngine>,
        path: impl Into<String>,
        crs_cache: Arc<CrsCache>,
    ) -> Result<Self, QueryError> {
        let path = path.into();
        let relation = table_expression(&path)
            .ok_or_else(|| QueryError::Failed(format!("unsupported file type: {}", path)))?;
        Self::open_relation(engine, path, relation, crs_cache).await
    }

    /// Open any relation the engine can select from, e.g. a table name
    pub async fn open_relation(
        engine: Arc<QueryEngine>,
        name: impl Into<String>,
        relation: impl Into<String>,
        crs_cache: Arc<CrsCache>,
    ) -> Result<Self, QueryError> {
        let (path, relation) = (name.into(), relation.into());
        let schema = engine.describe(format!("SELECT * FROM {}", relation)).await?;
        let geometry = classify(&schema);
        info!(
            source = %path,
            columns = schema.len(),
            geometry = ?geometry.as_ref().map(|column| (&column.name, column.kind)),
            "Opened source"
        );

        Ok(Self {
            engine,
            path,
            relation,
            schema,
            geometry,
            crs_cache,
        })
    }

    fn select(&self, limit: Option<usize>) -> String {
        match limit {
            Some(limit) => format!("SELECT * FROM {} LIMIT {}", self.relation, limit),
            None => format!("SELECT * FROM {}", self.relation),
        }
    }
}

#[async_trait]
impl GeoSource for FileSource {
    fn schema(&self) -> &[SchemaField] {
        &self.schema
    }

    fn geometry_column(&self) -> Option<&GeometryColumn> {
        self.geometry.as_ref()
    }

    async fn crs(&self) -> ResolvedCrs {
        let Some(column) = &self.geometry else {
            return ResolvedCrs::Wgs84;
        };
        if let Some(crs) = self.crs_cache.get(&self.path, &column.name) {
            return crs;
        }
        let metadata = self.engine.file_metadata(&self.path).await;
        self.crs_cache.get_or_resolve(&self.path, &column.name, &metadata)
    }

    async fn load_map(&self, limit: Option<usize>) -> anyhow::Result<MapQueryResult> {
        let column = self
            .geometry
            .as_ref()
            .ok_or_else(|| anyhow!("{} has no geometry column", self.path))?;
        let crs = self.crs().await;
        Ok(self.engine.query_for_map(&self.select(limit), column, crs).await?)
    }

    async fn load_rows(&self, limit: Option<usize>) -> anyhow::Result<Vec<RecordBatch>> {
        Ok(self.engine.query(self.select(limit)).await?)
    }

    fn source_name(&self) -> &str {
        &self.path
    }
}
