//! Handles for in-flight cancellable queries

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::worker::JobOutput;
use crate::QueryError;

/// Lifecycle of one query's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Queued behind other work
    Idle,
    Connected,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

impl QueryStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, QueryStatus::Completed | QueryStatus::Cancelled | QueryStatus::Failed)
    }
}

/// Cancel flag and status shared between a handle and the context worker
#[derive(Debug)]
pub(crate) struct QueryControl {
    cancel_requested: AtomicBool,
    status: Mutex<QueryStatus>,
}

impl QueryControl {
    pub fn new() -> Self {
        Self {
            cancel_requested: AtomicBool::new(false),
            status: Mutex::new(QueryStatus::Idle),
        }
    }

    /// Raise the cancel flag; false if it was already raised
    pub fn request_cancel(&self) -> bool {
        !self.cancel_requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> QueryStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: QueryStatus) {
        *self.status.lock() = status;
    }

    /// Record the terminal status matching `result`
    pub fn finish<T>(&self, result: &Result<T, QueryError>) {
        self.set_status(match result {
            Ok(_) => QueryStatus::Completed,
            Err(QueryError::Cancelled) => QueryStatus::Cancelled,
            Err(_) => QueryStatus::Failed,
        });
    }
}

/// One in-flight cancellable query.
///
/// Cancellation is cooperative: the execution context checks the flag once per
/// produced chunk, so a cancel takes effect at the next chunk boundary. A
/// query cancelled while still queued never starts. The handle is consumed by
/// [`QueryHandle::result`].
pub struct QueryHandle<T> {
    control: Arc<QueryControl>,
    receiver: oneshot::Receiver<Result<JobOutput, QueryError>>,
    convert: fn(JobOutput) -> Result<T, QueryError>,
}

impl<T> QueryHandle<T> {
    pub(crate) fn new(
        control: Arc<QueryControl>,
        receiver: oneshot::Receiver<Result<JobOutput, QueryError>>,
        convert: fn(JobOutput) -> Result<T, QueryError>,
    ) -> Self {
        Self {
            control,
            receiver,
            convert,
        }
    }

    /// Ask the query to stop at its next chunk boundary.
    ///
    /// Returns `false` when the query already finished or a cancel was already
    /// requested.
    pub fn cancel(&self) -> bool {
        if self.control.status().is_finished() {
            return false;
        }
        self.control.request_cancel()
    }

    pub fn status(&self) -> QueryStatus {
        self.control.status()
    }

    /// Wait for the query to finish
    pub async fn result(self) -> Result<T, QueryError> {
        match self.receiver.await {
            Ok(result) => result.and_then(self.convert),
            Err(_) => {
                self.control.set_status(QueryStatus::Failed);
                Err(QueryError::ContextTerminated)
            }
        }
    }
}

impl<T> std::fmt::Debug for QueryHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("status", &self.control.status())
            .field("cancel_requested", &self.control.is_cancel_requested())
            .finish()
    }
}
