//! Execution context seam
//!
//! The engine never talks SQL to a concrete backend directly. A [`Database`] is
//! the single, process-wide execution context; a [`Connection`] is the cheap
//! per-query handle opened on it. Backends report failures as `anyhow` errors,
//! which the engine turns into [`crate::QueryError::Failed`].

mod spatial;
mod sqlite;

#[cfg(test)]
pub(crate) mod mock;

use std::ops::ControlFlow;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use gv_core::SchemaField;

use crate::config::EngineConfig;

pub use sqlite::SqliteContext;

/// Stops the statement currently running in a context, from any thread
pub type Interrupter = Arc<dyn Fn() + Send + Sync>;

/// Creates a fresh execution context; called lazily and again after a
/// force-cancel
pub type DatabaseFactory = Arc<dyn Fn(&EngineConfig) -> anyhow::Result<Box<dyn Database>> + Send + Sync>;

/// How a chunked execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every chunk was delivered
    Completed,
    /// The chunk callback asked to stop
    Interrupted,
}

/// The shared execution context
pub trait Database: Send {
    /// Open a per-query connection
    fn connect(&mut self) -> anyhow::Result<Box<dyn Connection + '_>>;

    fn load_extension(&mut self, name: &str) -> anyhow::Result<()>;

    /// Apply a session-wide setting
    fn apply_setting(&mut self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Handle that aborts the running statement, when the backend supports it
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

/// One query's view of the execution context
pub trait Connection {
    /// Run to completion and return every batch
    fn query(&mut self, sql: &str) -> anyhow::Result<Vec<RecordBatch>>;

    /// Run in chunks, handing each one to `on_chunk` as it is produced.
    ///
    /// At least one chunk, possibly empty, is always delivered. Returning
    /// `ControlFlow::Break` from the callback stops execution at that chunk
    /// boundary.
    fn send(
        &mut self,
        sql: &str,
        on_chunk: &mut dyn FnMut(RecordBatch) -> ControlFlow<()>,
    ) -> anyhow::Result<SendOutcome>;

    /// Result schema of `sql` without materializing it
    fn describe(&mut self, sql: &str) -> anyhow::Result<Vec<SchemaField>>;
}
