//! Query engine over a single execution context
//!
//! All queries share one context and run strictly one at a time in submission
//! order. Every query method submits its job when called, not when the
//! returned future is first polled, so call order is execution order.
//!
//! Two execution modes exist:
//!
//! - blocking (`query`, `query_for_map`, `describe`): runs to completion once
//!   started; dropping the returned future does not stop it
//! - cancellable (`*_cancellable`): returns a [`QueryHandle`] whose cancel flag
//!   is checked at every chunk boundary
//!
//! Queries must be submitted from within a Tokio runtime, which hosts the
//! context worker. Submitting from anywhere else fails the query with
//! [`QueryError::Failed`].
//!
//! [`QueryEngine::force_cancel`] tears the whole context down. Every waiting
//! caller receives [`QueryError::ContextTerminated`] and the next query pays
//! for a full re-initialization.

mod handle;
mod state;
mod worker;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use gv_core::{GeometryColumn, MapQueryResult, ResolvedCrs, SchemaField};
use gv_geo::crs::{resolve_crs, FileMetadata};
use gv_geo::expr::build_map_query;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

pub use handle::{QueryHandle, QueryStatus};
pub use state::EngineState;

use handle::QueryControl;
use worker::{Job, JobOutput, Work, Worker};

use crate::config::{EngineConfig, StorageConfig, StorageSnapshot};
use crate::context::{DatabaseFactory, SqliteContext};
use crate::metadata;
use crate::QueryError;

/// Lifecycle of the execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No context exists yet
    Idle,
    /// Loading extensions and applying settings
    Initializing,
    Ready,
    /// Force-cancelled; the next query re-initializes
    Terminated,
}

pub struct QueryEngine {
    factory: DatabaseFactory,
    config: EngineConfig,
    worker: Mutex<Option<Worker>>,
    storage: RwLock<StorageSnapshot>,
    status: Arc<watch::Sender<EngineStatus>>,
}

impl QueryEngine {
    /// Create an engine; the context itself is created lazily by the first query
    pub fn new(factory: DatabaseFactory, config: EngineConfig) -> Self {
        let (status, _) = watch::channel(EngineStatus::Idle);
        Self {
            factory,
            config,
            worker: Mutex::new(None),
            storage: RwLock::new(StorageSnapshot::default()),
            status: Arc::new(status),
        }
    }

    /// Engine over an in-memory SQLite context
    pub fn sqlite(config: EngineConfig) -> Self {
        Self::new(SqliteContext::factory(), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.borrow()
    }

    /// Watch context status changes
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Replace the storage configuration.
    ///
    /// Takes effect for every query submitted afterwards; the context reapplies
    /// it before running the next such query.
    pub fn set_storage_config(&self, config: StorageConfig) {
        let mut storage = self.storage.write();
        storage.version += 1;
        storage.config = config;
        debug!(version = storage.version, "Storage configuration updated");
    }

    pub fn storage_config(&self) -> StorageConfig {
        self.storage.read().config.clone()
    }

    fn spawn_worker(&self, runtime: &Handle) -> Worker {
        Worker::spawn(runtime, self.factory.clone(), self.config.clone(), self.status.clone())
    }

    fn submit(
        &self,
        sql: String,
        work: Work,
        geometry_column: Option<String>,
        control: Option<Arc<QueryControl>>,
    ) -> oneshot::Receiver<Result<JobOutput, QueryError>> {
        let (reply, receiver) = oneshot::channel();
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(error) => {
                warn!(%error, "Query submitted outside a Tokio runtime");
                if let Some(control) = &control {
                    control.set_status(QueryStatus::Failed);
                }
                let _ = reply.send(Err(QueryError::Failed(format!("no Tokio runtime to run the query on: {}", error))));
                return receiver;
            }
        };
        let job = Job {
            sql,
            work,
            geometry_column,
            control,
            storage: self.storage.read().clone(),
            reply,
        };

        let mut slot = self.worker.lock();
        let worker = slot.get_or_insert_with(|| self.spawn_worker(&runtime));
        if let Err(job) = worker.submit(job) {
            // Worker task is gone; start over with a fresh one
            let worker = self.spawn_worker(&runtime);
            if worker.submit(job).is_err() {
                warn!("Fresh execution context worker rejected a job");
            }
            *slot = Some(worker);
        }
        receiver
    }

    fn blocking<T>(
        &self,
        sql: String,
        work: Work,
        geometry_column: Option<String>,
        convert: fn(JobOutput) -> Result<T, QueryError>,
    ) -> impl Future<Output = Result<T, QueryError>> + Send + 'static
    where
        T: Send + 'static,
    {
        let receiver = self.submit(sql, work, geometry_column, None);
        async move {
            match receiver.await {
                Ok(result) => result.and_then(convert),
                Err(_) => Err(QueryError::ContextTerminated),
            }
        }
    }

    fn cancellable<T>(
        &self,
        sql: String,
        work: Work,
        geometry_column: Option<String>,
        convert: fn(JobOutput) -> Result<T, QueryError>,
    ) -> QueryHandle<T> {
        let control = Arc::new(QueryControl::new());
        let receiver = self.submit(sql, work, geometry_column, Some(control.clone()));
        QueryHandle::new(control, receiver, convert)
    }

    /// Run `sql` to completion.
    ///
    /// Cannot be interrupted once started; dropping the future leaves the
    /// query running and its side effects still land. The job is queued on
    /// the current Tokio runtime at call time; called outside one, the future
    /// resolves to [`QueryError::Failed`].
    pub fn query(&self, sql: impl Into<String>) -> impl Future<Output = Result<Vec<RecordBatch>, QueryError>> + Send + 'static {
        self.blocking(sql.into(), Work::Rows, None, JobOutput::into_rows)
    }

    /// Run `sql` with a cancel flag checked at every chunk boundary
    pub fn query_cancellable(&self, sql: impl Into<String>) -> QueryHandle<Vec<RecordBatch>> {
        self.cancellable(sql.into(), Work::Rows, None, JobOutput::into_rows)
    }

    /// Run `sql` wrapped so every row carries WGS84 WKB, extracting geometry
    /// and attributes chunk by chunk
    pub fn query_for_map(
        &self,
        sql: &str,
        column: &GeometryColumn,
        crs: ResolvedCrs,
    ) -> impl Future<Output = Result<MapQueryResult, QueryError>> + Send + 'static {
        let wrapped = build_map_query(sql, column, crs);
        self.blocking(wrapped, Work::Map, Some(column.name.clone()), JobOutput::into_map)
    }

    /// Cancellable form of [`QueryEngine::query_for_map`]
    pub fn query_for_map_cancellable(
        &self,
        sql: &str,
        column: &GeometryColumn,
        crs: ResolvedCrs,
    ) -> QueryHandle<MapQueryResult> {
        let wrapped = build_map_query(sql, column, crs);
        self.cancellable(wrapped, Work::Map, Some(column.name.clone()), JobOutput::into_map)
    }

    /// Result schema of `sql`
    pub fn describe(&self, sql: impl Into<String>) -> impl Future<Output = Result<Vec<SchemaField>, QueryError>> + Send + 'static {
        self.blocking(sql.into(), Work::Describe, None, JobOutput::into_schema)
    }

    /// Load a file's key/value metadata and column annotations.
    ///
    /// Never fails: anything that cannot be read leaves the corresponding
    /// part empty.
    pub async fn file_metadata(&self, path: &str) -> FileMetadata {
        let key_values = self.query(metadata::key_value_query(path));
        let schema = self.query(metadata::schema_query(path));
        let (key_values, schema) = (key_values.await, schema.await);
        metadata::assemble(path, key_values, schema)
    }

    /// Resolve the CRS of `column` in the file at `path`
    pub async fn resolve_crs(&self, path: &str, column: &str) -> ResolvedCrs {
        let metadata = self.file_metadata(path).await;
        resolve_crs(&metadata, column)
    }

    /// Terminate the execution context.
    ///
    /// Every pending query, blocking or cancellable, fails with
    /// [`QueryError::ContextTerminated`]. Returns `false` if there was no
    /// context to terminate.
    pub fn force_cancel(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };
        warn!("Force-cancelling execution context");
        worker.terminate();
        self.status.send_replace(EngineStatus::Terminated);
        true
    }
}

impl Drop for QueryEngine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.terminate();
        }
    }
}

/// Race a query against a deadline, force-cancelling the engine if the
/// deadline passes first
pub async fn with_timeout<T, F>(engine: &QueryEngine, duration: Duration, future: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, QueryError>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?duration, "Query timed out");
            engine.force_cancel();
            Err(QueryError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::mock::Script;
    use arrow::array::AsArray;
    use arrow::datatypes::Int64Type;
    use gv_core::{AttributeValue, GeometryColumnKind, GeometryKind};

    fn scripted() -> (Arc<Script>, QueryEngine) {
        let script = Arc::new(Script::default());
        let engine = QueryEngine::new(script.factory(), EngineConfig::default());
        (script, engine)
    }

    fn sqlite() -> QueryEngine {
        QueryEngine::sqlite(EngineConfig::default().with_extensions(["spatial"]))
    }

    /// Counts rows of a recursive series; slow enough to keep the context busy
    fn series(rows: usize) -> String {
        format!(
            "WITH RECURSIVE s(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM s WHERE n < {}) SELECT n FROM s",
            rows
        )
    }

    #[tokio::test]
    async fn test_fifo_side_effects() {
        let (script, engine) = scripted();
        let first = engine.query("LOG first");
        let second = engine.query("LOG second");
        let (second, first) = tokio::join!(second, first);
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(script.log(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_sqlite_fifo_side_effects() {
        let engine = sqlite();
        let create = engine.query("CREATE TABLE events (n INTEGER)");
        let insert = engine.query("INSERT INTO events VALUES (1)");
        let count = engine.query("SELECT COUNT(*) AS n FROM events");
        let (count, _, _) = tokio::join!(count, insert, create);

        let batches = count.unwrap();
        assert_eq!(batches[0].column(0).as_primitive::<Int64Type>().value(0), 1);
    }

    #[tokio::test]
    async fn test_dropped_blocking_query_still_runs() {
        let (script, engine) = scripted();
        drop(engine.query("SLEEP 20"));
        engine.query("LOG after").await.unwrap();
        assert_eq!(script.log(), vec!["SLEEP 20", "after"]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_query() {
        let (script, engine) = scripted();
        let blocker = engine.query("SLEEP 50");
        let handle = engine.query_cancellable("CHUNKS 5");
        assert_eq!(handle.status(), QueryStatus::Idle);
        assert!(handle.cancel());
        assert!(!handle.cancel());

        blocker.await.unwrap();
        assert_eq!(handle.result().await.unwrap_err(), QueryError::Cancelled);
        assert_eq!(script.opened.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellable_completes_without_cancel() {
        let (_, engine) = scripted();
        let handle = engine.query_cancellable("CHUNKS 3");
        let batches = handle.result().await.unwrap();
        assert_eq!(batches.len(), 3);
    }

    #[tokio::test]
    async fn test_force_cancel_terminates_everyone() {
        let (script, engine) = scripted();
        let running = engine.query("SLEEP 10000");
        let queued = engine.query_cancellable("CHUNKS 1");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(engine.force_cancel());
        assert_eq!(engine.status(), EngineStatus::Terminated);
        assert_eq!(running.await.unwrap_err(), QueryError::ContextTerminated);
        assert_eq!(queued.result().await.unwrap_err(), QueryError::ContextTerminated);

        // The next query re-initializes from scratch
        engine.query("LOG again").await.unwrap();
        assert_eq!(engine.status(), EngineStatus::Ready);
        assert_eq!(script.opened.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(script.extensions.lock().as_slice(), &["spatial", "httpfs", "spatial", "httpfs"]);
        assert_eq!(script.log(), vec!["again"]);
    }

    #[tokio::test]
    async fn test_force_cancel_without_context() {
        let (_, engine) = scripted();
        assert!(!engine.force_cancel());
        assert_eq!(engine.status(), EngineStatus::Idle);
    }

    #[tokio::test]
    async fn test_with_timeout_force_cancels() {
        let (_, engine) = scripted();
        let slow = engine.query("SLEEP 10000");
        let result = with_timeout(&engine, Duration::from_millis(50), slow).await;
        assert_eq!(result.unwrap_err(), QueryError::Timeout);
        assert_eq!(engine.status(), EngineStatus::Terminated);
    }

    #[tokio::test]
    async fn test_failures_are_reported() {
        let (_, engine) = scripted();
        let error = engine.query("FAIL bad credentials").await.unwrap_err();
        assert_eq!(error, QueryError::Failed("bad credentials".into()));
        assert!(!error.is_cancelled());
    }

    #[tokio::test]
    async fn test_storage_config_reapplied() {
        let (script, engine) = scripted();
        engine.query("LOG one").await.unwrap();
        engine.query("LOG two").await.unwrap();
        let applied = |script: &Script| {
            script
                .settings
                .lock()
                .iter()
                .filter(|(key, _)| key == "s3_region")
                .count()
        };
        assert_eq!(applied(&script), 1);

        engine.set_storage_config(StorageConfig {
            region: Some("ap-south-1".into()),
            ..Default::default()
        });
        engine.query("LOG three").await.unwrap();
        assert_eq!(applied(&script), 2);
        assert!(script
            .settings
            .lock()
            .contains(&("s3_region".to_string(), "ap-south-1".to_string())));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let (_, engine) = scripted();
        let mut status = engine.subscribe();
        assert_eq!(*status.borrow(), EngineStatus::Idle);
        engine.query("LOG x").await.unwrap();
        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), EngineStatus::Ready);
    }

    #[tokio::test]
    async fn test_map_query_with_reprojection() {
        let engine = sqlite();
        engine
            .query("CREATE TABLE sites (id INTEGER, name TEXT, geom BLOB)")
            .await
            .unwrap();
        engine
            .query("INSERT INTO sites VALUES (1, 'a', ST_Point(500000, 4649776)), (2, 'b', NULL)")
            .await
            .unwrap();

        let column = GeometryColumn::new("geom", GeometryColumnKind::RawWkbBlob);
        let result = engine
            .query_for_map("SELECT * FROM sites;", &column, ResolvedCrs::Epsg(32633))
            .await
            .unwrap();

        assert_eq!(result.row_count, 2);
        assert_eq!(result.geometry_type, "POINT");
        assert!(result.wkb_arrays[1].is_none());
        assert_eq!(result.attributes.keys().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(result.attributes["name"].values[1], AttributeValue::Text("b".into()));

        let tables = gv_geo::geoarrow::build_from_map_result(&result);
        let points = &tables[&GeometryKind::Point];
        assert_eq!(points.feature_indices(), &[0]);
        let coords = points.coordinates();
        assert!((coords[0] - 15.0).abs() < 1e-6);
        assert!((coords[1] - 42.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_map_query_cancellable() {
        let engine = sqlite();
        let column = GeometryColumn::new("g", GeometryColumnKind::RawWkbBlob);
        let handle = engine.query_for_map_cancellable("SELECT ST_Point(1, 2) AS g", &column, ResolvedCrs::Wgs84);
        let result = handle.result().await.unwrap();
        assert_eq!(result.geometry_count(), 1);
        assert!(result.attributes.is_empty());
    }

    #[tokio::test]
    async fn test_describe_and_metadata_fallback() {
        let engine = sqlite();
        engine.query("CREATE TABLE t (id INTEGER, geom BLOB)").await.unwrap();
        let fields = engine.describe("SELECT * FROM t").await.unwrap();
        assert_eq!(fields[1], SchemaField::new("geom", "BLOB", true));

        // No parquet table functions in SQLite: metadata degrades to empty
        let metadata = engine.file_metadata("missing.parquet").await;
        assert!(metadata.is_empty());
        assert_eq!(engine.resolve_crs("missing.parquet", "geom").await, ResolvedCrs::Wgs84);
    }

    #[test]
    fn test_query_outside_runtime_fails() {
        let (script, engine) = scripted();
        let future = engine.query("LOG outside");
        let handle = engine.query_cancellable("CHUNKS 1");
        assert_eq!(handle.status(), QueryStatus::Failed);
        assert_eq!(engine.status(), EngineStatus::Idle);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        assert!(matches!(runtime.block_on(future), Err(QueryError::Failed(_))));
        assert!(matches!(runtime.block_on(handle.result()), Err(QueryError::Failed(_))));

        runtime.block_on(async { engine.query("LOG inside").await }).unwrap();
        assert_eq!(script.log(), vec!["inside"]);
    }

    #[tokio::test]
    async fn test_sqlite_cancel_between_chunks() {
        let engine = QueryEngine::sqlite(EngineConfig {
            chunk_rows: 1,
            ..EngineConfig::default().with_extensions(["spatial"])
        });
        let handle = engine.query_cancellable(series(1_000_000));
        while matches!(handle.status(), QueryStatus::Idle | QueryStatus::Connected) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(handle.status(), QueryStatus::Executing);
        assert!(handle.cancel());

        assert_eq!(handle.result().await.unwrap_err(), QueryError::Cancelled);
        // The context stays usable
        let batches = engine.query("SELECT 1 AS one").await.unwrap();
        assert_eq!(batches[0].num_rows(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_cancelled_while_queued_never_runs() {
        let engine = QueryEngine::sqlite(EngineConfig {
            chunk_rows: 1,
            ..EngineConfig::default().with_extensions(["spatial"])
        });
        engine.query("CREATE TABLE hits (n INTEGER)").await.unwrap();

        let blocker = engine.query(series(200_000));
        let queued = engine.query_cancellable("INSERT INTO hits SELECT n FROM (SELECT 1 AS n UNION ALL SELECT 2)");
        assert!(queued.cancel());

        let rows: usize = blocker.await.unwrap().iter().map(RecordBatch::num_rows).sum();
        assert_eq!(rows, 200_000);
        assert_eq!(queued.result().await.unwrap_err(), QueryError::Cancelled);

        let count = engine.query("SELECT COUNT(*) FROM hits").await.unwrap();
        assert_eq!(count[0].column(0).as_primitive::<Int64Type>().value(0), 0);
    }

    #[tokio::test]
    async fn test_map_query_keeps_rows_with_malformed_wkb() {
        let engine = sqlite();
        engine.query("CREATE TABLE shapes (id INTEGER, geom BLOB)").await.unwrap();
        engine
            .query("INSERT INTO shapes VALUES (1, ST_Point(1, 2)), (2, x'0101000000')")
            .await
            .unwrap();
        let column = GeometryColumn::new("geom", GeometryColumnKind::RawWkbBlob);

        for crs in [ResolvedCrs::Wgs84, ResolvedCrs::Epsg(32633)] {
            let result = engine
                .query_for_map("SELECT * FROM shapes", &column, crs)
                .await
                .unwrap();
            assert_eq!(result.row_count, 2);
            assert!(result.wkb_arrays[0].is_some());
            assert!(result.wkb_arrays[1].is_none());
            assert_eq!(result.geometry_type, "POINT");

            let tables = gv_geo::geoarrow::build_from_map_result(&result);
            assert_eq!(tables[&GeometryKind::Point].feature_indices(), &[0]);
        }
    }

    #[tokio::test]
    async fn test_map_query_reprojects_geojson_collections() {
        let engine = sqlite();
        engine.query("CREATE TABLE features (id INTEGER, geom TEXT)").await.unwrap();
        engine
            .query(
                r#"INSERT INTO features VALUES
                (1, '{"type":"Point","coordinates":[500000,4649776]}'),
                (2, '{"type":"GeometryCollection","geometries":[{"type":"Point","coordinates":[500000,4649776]}]}')"#,
            )
            .await
            .unwrap();

        let column = GeometryColumn::new("geom", GeometryColumnKind::TextualGeoJson);
        let result = engine
            .query_for_map("SELECT * FROM features", &column, ResolvedCrs::Epsg(32633))
            .await
            .unwrap();

        assert_eq!(result.row_count, 2);
        assert_eq!(result.geometry_type, "GEOMETRY");
        assert_eq!(result.geometry_count(), 2);
        assert_eq!(result.attributes.keys().collect::<Vec<_>>(), vec!["id"]);

        let tables = gv_geo::geoarrow::build_from_map_result(&result);
        let points = &tables[&GeometryKind::Point];
        assert_eq!(points.feature_indices(), &[0]);
        let coords = points.coordinates();
        assert!((coords[0] - 15.0).abs() < 1e-6);
        assert!((coords[1] - 42.0).abs() < 1e-3);
    }
}
