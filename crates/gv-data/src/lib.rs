//! Query execution for the geospatial query platform
//!
//! The [`QueryEngine`] owns a single execution context and funnels every query
//! through it in submission order. Map queries come back as WGS84 WKB plus
//! attribute columns, ready for [`gv_geo::geoarrow::build`].

pub mod config;
pub mod context;
pub mod engine;
pub mod extract;
pub mod map_query;
pub mod metadata;
pub mod sources;

use thiserror::Error;

// Re-exports
pub use config::{EngineConfig, StorageConfig};
pub use context::{Connection, Database, DatabaseFactory, SqliteContext};
pub use engine::{with_timeout, EngineStatus, QueryEngine, QueryHandle, QueryStatus};
pub use extract::{extract, extract_into};
pub use map_query::MapAccumulator;
pub use sources::FileSource;

/// Errors surfaced by the query engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// SQL, I/O or credential failure reported by the execution context
    #[error("Query failed: {0}")]
    Failed(String),

    /// The query observed its cancel flag and stopped
    #[error("Query cancelled")]
    Cancelled,

    /// The execution context was torn down while the query was pending
    #[error("Execution context terminated")]
    ContextTerminated,

    #[error("Query timed out")]
    Timeout,
}

impl QueryError {
    /// Whether the error is the result of a deliberate interruption rather
    /// than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled | QueryError::ContextTerminated)
    }
}

impl From<anyhow::Error> for QueryError {
    fn from(error: anyhow::Error) -> Self {
        QueryError::Failed(format!("{:#}", error))
    }
}

impl From<arrow::error::ArrowError> for QueryError {
    fn from(error: arrow::error::ArrowError) -> Self {
        QueryError::Failed(error.to_string())
    }
}
