//! Scripted collaborators for controller tests

use async_trait::async_trait;
use chronoflow::control::Compiler;
use chronoflow::execute::{ErrorSlot, ExecutionError, Program, QueryResult, RunningQuery, Statistics};
use chronoflow::memory::Allocator;
use chronoflow::table::{ColListTableBuilder, ColMeta, ColType, GroupKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// What a [`MockProgram`] does once started
#[derive(Clone)]
pub enum Behavior {
    /// Emit one result without tables, then close
    EmptyResult,
    /// Emit one result holding a single table of `n` integer rows
    Rows(usize),
    /// Wait for cancellation, emit one result, then report cancellation
    BlockUntilCanceled,
    /// Ignore cancellation until the gate is notified, then close
    BlockUntilReleased(Arc<Notify>),
    /// Close without results and report an execution error
    Fail(String),
    /// Refuse to start
    FailStart(String),
}

/// Program whose execution follows a [`Behavior`]
pub struct MockProgram {
    behavior: Behavior,
    starts: Arc<AtomicUsize>,
}

impl MockProgram {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of times the program was started
    pub fn starts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.starts)
    }
}

#[async_trait]
impl Program for MockProgram {
    async fn start(
        &self,
        cancel: CancellationToken,
        alloc: Arc<Allocator>,
    ) -> Result<Box<dyn RunningQuery>, ExecutionError> {
        if let Behavior::FailStart(msg) = &self.behavior {
            return Err(ExecutionError::RuntimeError(msg.clone()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        let cancel = cancel.child_token();
        let errors = ErrorSlot::new();
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(run(
            self.behavior.clone(),
            cancel.clone(),
            alloc,
            errors.clone(),
            tx,
        ));
        Ok(Box::new(MockRunningQuery {
            results: Some(rx),
            cancel,
            errors,
        }))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

async fn run(
    behavior: Behavior,
    cancel: CancellationToken,
    alloc: Arc<Allocator>,
    errors: ErrorSlot,
    tx: mpsc::Sender<QueryResult>,
) {
    match behavior {
        Behavior::EmptyResult => {
            let _ = tx.send(QueryResult::from_tables("_result", Vec::new())).await;
        }
        Behavior::Rows(n) => match int_table(n, &alloc) {
            Ok(table) => {
                let _ = tx.send(QueryResult::from_tables("_result", vec![table])).await;
            }
            Err(e) => errors.set(e),
        },
        Behavior::BlockUntilCanceled => {
            cancel.cancelled().await;
            let _ = tx.send(QueryResult::from_tables("_result", Vec::new())).await;
            errors.set(ExecutionError::Canceled);
        }
        Behavior::BlockUntilReleased(gate) => gate.notified().await,
        Behavior::Fail(msg) => errors.set(ExecutionError::RuntimeError(msg)),
        Behavior::FailStart(_) => {}
    }
}

fn int_table(
    n: usize,
    alloc: &Arc<Allocator>,
) -> Result<chronoflow::table::TableChunk, ExecutionError> {
    let mut builder = ColListTableBuilder::new(GroupKey::empty(), Arc::clone(alloc));
    let j = builder.add_col(ColMeta::new("_value", ColType::Int))?;
    for i in 0..n {
        builder.append_int(j, i as i64)?;
    }
    builder.take_table()
}

pub struct MockRunningQuery {
    results: Option<mpsc::Receiver<QueryResult>>,
    cancel: CancellationToken,
    errors: ErrorSlot,
}

impl RunningQuery for MockRunningQuery {
    fn results(&mut self) -> Option<mpsc::Receiver<QueryResult>> {
        self.results.take()
    }

    fn done(&mut self) {
        self.cancel.cancel();
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        stats
            .metadata
            .insert("program".to_string(), serde_json::json!("mock"));
        stats
    }

    fn err(&self) -> Option<ExecutionError> {
        self.errors.get()
    }
}

enum Compile {
    Program(Arc<dyn Program>),
    Fail(String),
    BlockUntilCanceled,
}

/// Compiler returning a fixed program or error
pub struct MockCompiler {
    compile: Compile,
}

impl MockCompiler {
    pub fn ok(program: MockProgram) -> Self {
        Self {
            compile: Compile::Program(Arc::new(program)),
        }
    }

    pub fn behaving(behavior: Behavior) -> Self {
        Self::ok(MockProgram::new(behavior))
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            compile: Compile::Fail(msg.to_string()),
        }
    }

    /// Compilation that only ends through cancellation
    pub fn blocking() -> Self {
        Self {
            compile: Compile::BlockUntilCanceled,
        }
    }
}

#[async_trait]
impl Compiler for MockCompiler {
    async fn compile(&self, cancel: &CancellationToken) -> Result<Arc<dyn Program>, ExecutionError> {
        match &self.compile {
            Compile::Program(program) => Ok(Arc::clone(program)),
            Compile::Fail(msg) => Err(ExecutionError::RuntimeError(msg.clone())),
            Compile::BlockUntilCanceled => {
                cancel.cancelled().await;
                Err(ExecutionError::Canceled)
            }
        }
    }

    fn compiler_type(&self) -> &str {
        "mock"
    }
}
