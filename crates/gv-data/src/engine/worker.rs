//! The execution context worker
//!
//! A single tokio task owns the execution context and pulls jobs off an
//! unbounded channel in submission order. Each job runs on the blocking pool;
//! the context is moved into the blocking closure and handed back when it
//! finishes, so at most one job ever touches it. Reply senders stay in the
//! task itself: aborting the task drops every pending reply, which is how
//! force-cancel reaches all waiting callers at once.

use std::ops::ControlFlow;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use gv_core::{MapQueryResult, SchemaField};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handle::{QueryControl, QueryStatus};
use super::state::EngineState;
use super::EngineStatus;
use crate::config::{EngineConfig, StorageSnapshot};
use crate::context::{Database, DatabaseFactory, Interrupter, SendOutcome};
use crate::map_query::MapAccumulator;
use crate::QueryError;

/// What a job produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Work {
    Rows,
    Map,
    Describe,
}

pub(crate) enum JobOutput {
    Rows(Vec<RecordBatch>),
    Map(MapQueryResult),
    Schema(Vec<SchemaField>),
}

impl JobOutput {
    pub fn into_rows(self) -> Result<Vec<RecordBatch>, QueryError> {
        match self {
            JobOutput::Rows(batches) => Ok(batches),
            _ => Err(QueryError::Failed("unexpected job output".into())),
        }
    }

    pub fn into_map(self) -> Result<MapQueryResult, QueryError> {
        match self {
            JobOutput::Map(result) => Ok(result),
            _ => Err(QueryError::Failed("unexpected job output".into())),
        }
    }

    pub fn into_schema(self) -> Result<Vec<SchemaField>, QueryError> {
        match self {
            JobOutput::Schema(fields) => Ok(fields),
            _ => Err(QueryError::Failed("unexpected job output".into())),
        }
    }
}

pub(crate) type Reply = oneshot::Sender<Result<JobOutput, QueryError>>;

/// A unit of work queued for the context
pub(crate) struct Job {
    pub sql: String,
    pub work: Work,
    /// Source geometry column of a map query, left out of the attributes
    pub geometry_column: Option<String>,
    /// Present for cancellable queries only
    pub control: Option<Arc<QueryControl>>,
    pub storage: StorageSnapshot,
    pub reply: Reply,
}

/// The part of a job that travels to the blocking pool
struct JobSpec {
    sql: String,
    work: Work,
    geometry_column: Option<String>,
    control: Option<Arc<QueryControl>>,
    storage: StorageSnapshot,
}

type Context = (Box<dyn Database>, EngineState);

pub(crate) struct Worker {
    sender: mpsc::UnboundedSender<Job>,
    task: JoinHandle<()>,
    interrupter: Arc<Mutex<Option<Interrupter>>>,
}

impl Worker {
    pub fn spawn(
        runtime: &Handle,
        factory: DatabaseFactory,
        config: EngineConfig,
        status: Arc<watch::Sender<EngineStatus>>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let interrupter = Arc::new(Mutex::new(None));
        let task = runtime.spawn(run(receiver, factory, config, status, interrupter.clone()));
        Self {
            sender,
            task,
            interrupter,
        }
    }

    /// Queue a job; hands it back if the worker is gone
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        self.sender.send(job).map_err(|error| error.0)
    }

    /// Tear the context down.
    ///
    /// The running statement is interrupted when the backend supports it and
    /// the task is aborted, dropping every queued and in-flight reply.
    pub fn terminate(self) {
        if let Some(interrupt) = self.interrupter.lock().take() {
            interrupt();
        }
        self.task.abort();
    }
}

async fn run(
    mut jobs: mpsc::UnboundedReceiver<Job>,
    factory: DatabaseFactory,
    config: EngineConfig,
    status: Arc<watch::Sender<EngineStatus>>,
    interrupter: Arc<Mutex<Option<Interrupter>>>,
) {
    let mut context: Option<Context> = None;

    while let Some(job) = jobs.recv().await {
        let Job {
            sql,
            work,
            geometry_column,
            control,
            storage,
            reply,
        } = job;

        let (db, state) = match context.take() {
            Some(ready) => ready,
            None => match initialize(&factory, &config, &status).await {
                Ok(ready) => {
                    *interrupter.lock() = ready.0.interrupter();
                    ready
                }
                Err(error) => {
                    if let Some(control) = &control {
                        control.set_status(QueryStatus::Failed);
                    }
                    let _ = reply.send(Err(error));
                    continue;
                }
            },
        };

        let spec = JobSpec {
            sql,
            work,
            geometry_column,
            control: control.clone(),
            storage,
        };
        let outcome = tokio::task::spawn_blocking(move || {
            let (mut db, mut state) = (db, state);
            let result = execute(db.as_mut(), &mut state, spec);
            (db, state, result)
        })
        .await;

        let result = match outcome {
            Ok((db, state, result)) => {
                context = Some((db, state));
                result
            }
            Err(error) => {
                warn!(%error, "Execution context crashed, it will be recreated");
                *interrupter.lock() = None;
                status.send_replace(EngineStatus::Idle);
                Err(QueryError::Failed(format!("execution context crashed: {}", error)))
            }
        };

        if let Err(error) = &result {
            if !error.is_cancelled() {
                debug!(%error, "Query failed");
            }
        }
        if let Some(control) = &control {
            control.finish(&result);
        }
        // The caller may have stopped waiting; the work is done either way
        let _ = reply.send(result);
    }
}

async fn initialize(
    factory: &DatabaseFactory,
    config: &EngineConfig,
    status: &watch::Sender<EngineStatus>,
) -> Result<Context, QueryError> {
    status.send_replace(EngineStatus::Initializing);
    info!(extensions = ?config.extensions, "Initializing execution context");

    let factory = factory.clone();
    let config = config.clone();
    let initialized = tokio::task::spawn_blocking(move || -> anyhow::Result<Context> {
        let mut db = factory(&config)?;
        let state = EngineState::initialize(db.as_mut(), &config)?;
        Ok((db, state))
    })
    .await;

    match initialized {
        Ok(Ok(ready)) => {
            status.send_replace(EngineStatus::Ready);
            Ok(ready)
        }
        Ok(Err(error)) => {
            warn!(error = %format!("{:#}", error), "Execution context initialization failed");
            status.send_replace(EngineStatus::Idle);
            Err(error.into())
        }
        Err(error) => {
            warn!(%error, "Execution context initialization panicked");
            status.send_replace(EngineStatus::Idle);
            Err(QueryError::Failed(format!("initialization failed: {}", error)))
        }
    }
}

/// Where produced chunks go
enum Sink {
    Rows(Vec<RecordBatch>),
    Map(MapAccumulator),
}

impl Sink {
    fn push(&mut self, batch: RecordBatch) -> Result<(), QueryError> {
        match self {
            Sink::Rows(batches) => {
                batches.push(batch);
                Ok(())
            }
            Sink::Map(accumulator) => accumulator.push(&batch),
        }
    }

    fn finish(self) -> JobOutput {
        match self {
            Sink::Rows(batches) => JobOutput::Rows(batches),
            Sink::Map(accumulator) => JobOutput::Map(accumulator.finish()),
        }
    }
}

/// Run one job against the context. Called on the blocking pool.
fn execute(db: &mut dyn Database, state: &mut EngineState, job: JobSpec) -> Result<JobOutput, QueryError> {
    let JobSpec {
        sql,
        work,
        geometry_column,
        control,
        storage,
    } = job;
    let set_status = |status| {
        if let Some(control) = &control {
            control.set_status(status);
        }
    };

    if control.as_ref().is_some_and(|control| control.is_cancel_requested()) {
        debug!(sql = %sql, "Query cancelled while queued");
        return Err(QueryError::Cancelled);
    }

    state.sync_storage(db, &storage)?;
    let mut conn = db.connect()?;
    set_status(QueryStatus::Connected);
    set_status(QueryStatus::Executing);
    debug!(sql = %sql, ?work, cancellable = control.is_some(), "Executing");

    let mut sink = match work {
        Work::Describe => return Ok(JobOutput::Schema(conn.describe(&sql)?)),
        Work::Rows if control.is_none() => return Ok(JobOutput::Rows(conn.query(&sql)?)),
        Work::Rows => Sink::Rows(Vec::new()),
        Work::Map => Sink::Map(MapAccumulator::new(geometry_column)),
    };

    let mut sink_error = None;
    let outcome = conn.send(&sql, &mut |batch| {
        if let Err(error) = sink.push(batch) {
            sink_error = Some(error);
            return ControlFlow::Break(());
        }
        match &control {
            Some(control) if control.is_cancel_requested() => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    })?;

    if let Some(error) = sink_error {
        return Err(error);
    }
    if outcome == SendOutcome::Interrupted {
        debug!(sql = %sql, "Query cancelled at chunk boundary");
        return Err(QueryError::Cancelled);
    }
    Ok(sink.finish())
}
