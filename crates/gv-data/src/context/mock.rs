//! Scripted execution context for engine tests
//!
//! Understands a tiny command language instead of SQL:
//!
//! - `LOG <text>`: record `<text>` and return one empty chunk
//! - `CHUNKS <n>`: produce `n` single-row chunks holding 0..n
//! - `SLEEP <ms>`: block for `ms` milliseconds, or until interrupted
//! - `FAIL <message>`: fail with `message`

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::array::Int64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use gv_core::SchemaField;
use parking_lot::Mutex;

use super::{Connection, Database, DatabaseFactory, Interrupter, SendOutcome};
use crate::config::EngineConfig;

/// Observations shared between a test and every context the factory creates
#[derive(Default)]
pub(crate) struct Script {
    pub log: Mutex<Vec<String>>,
    pub extensions: Mutex<Vec<String>>,
    pub settings: Mutex<Vec<(String, String)>>,
    pub opened: AtomicUsize,
}

impl Script {
    pub fn factory(self: &Arc<Self>) -> DatabaseFactory {
        let script = self.clone();
        Arc::new(move |_config: &EngineConfig| {
            script.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedDatabase {
                script: script.clone(),
                interrupted: Arc::new(AtomicBool::new(false)),
            }) as Box<dyn Database>)
        })
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

struct ScriptedDatabase {
    script: Arc<Script>,
    interrupted: Arc<AtomicBool>,
}

impl Database for ScriptedDatabase {
    fn connect(&mut self) -> anyhow::Result<Box<dyn Connection + '_>> {
        self.interrupted.store(false, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection { db: self }))
    }

    fn load_extension(&mut self, name: &str) -> anyhow::Result<()> {
        self.script.extensions.lock().push(name.to_string());
        Ok(())
    }

    fn apply_setting(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.script.settings.lock().push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let interrupted = self.interrupted.clone();
        Some(Arc::new(move || interrupted.store(true, Ordering::SeqCst)))
    }
}

struct ScriptedConnection<'a> {
    db: &'a ScriptedDatabase,
}

fn single_value(value: i64) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
    let column = Arc::new(Int64Array::from(vec![value]));
    RecordBatch::try_new(schema, vec![column]).expect("valid batch")
}

impl Connection for ScriptedConnection<'_> {
    fn query(&mut self, sql: &str) -> anyhow::Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        self.send(sql, &mut |batch| {
            batches.push(batch);
            ControlFlow::Continue(())
        })?;
        Ok(batches)
    }

    fn send(
        &mut self,
        sql: &str,
        on_chunk: &mut dyn FnMut(RecordBatch) -> ControlFlow<()>,
    ) -> anyhow::Result<SendOutcome> {
        let (command, argument) = sql.split_once(' ').unwrap_or((sql, ""));
        match command {
            "LOG" => {
                self.db.script.log.lock().push(argument.to_string());
                let empty = RecordBatch::new_empty(Arc::new(Schema::empty()));
                Ok(match on_chunk(empty) {
                    ControlFlow::Continue(()) => SendOutcome::Completed,
                    ControlFlow::Break(()) => SendOutcome::Interrupted,
                })
            }
            "CHUNKS" => {
                let count: i64 = argument.parse()?;
                for value in 0..count {
                    if on_chunk(single_value(value)).is_break() {
                        return Ok(SendOutcome::Interrupted);
                    }
                }
                Ok(SendOutcome::Completed)
            }
            "SLEEP" => {
                let deadline = Instant::now() + Duration::from_millis(argument.parse()?);
                while Instant::now() < deadline {
                    if self.db.interrupted.load(Ordering::SeqCst) {
                        anyhow::bail!("interrupted");
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                self.db.script.log.lock().push(sql.to_string());
                Ok(match on_chunk(single_value(0)) {
                    ControlFlow::Continue(()) => SendOutcome::Completed,
                    ControlFlow::Break(()) => SendOutcome::Interrupted,
                })
            }
            "FAIL" => anyhow::bail!("{}", argument),
            other => anyhow::bail!("unknown command {}", other),
        }
    }

    fn describe(&mut self, _sql: &str) -> anyhow::Result<Vec<SchemaField>> {
        Ok(vec![SchemaField::new("v", "BIGINT", false)])
    }
}
