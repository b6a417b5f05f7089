// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query controller: compilation, admission and shutdown

use super::compiler::Compiler;
use super::config::ControllerConfig;
use super::context::QueryContext;
use super::error::ControlError;
use super::metrics::{ControllerMetrics, RequestResult};
use super::query::{QueryHandle, QueryId, QueryInfo, QueryInner};
use super::state::QueryState;
use crate::execute::error::ExecutionError;
use crate::execute::executor::panic_message;
use crate::execute::program::Program;
use crate::execute::result::QueryResult;
use crate::memory::Allocator;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Coordinates the lifecycle of every query it admits
///
/// Cloning a controller yields another handle to the same registry.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

pub(crate) struct ControllerInner {
    config: ControllerConfig,
    queries: RwLock<HashMap<QueryId, Arc<QueryInner>>>,
    next_id: AtomicU64,
    accepting: AtomicBool,
    progress: Notify,
    metrics: Arc<ControllerMetrics>,
    slots: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Result<Self, ControlError> {
        config.validate().map_err(ControlError::InvalidConfig)?;
        let metrics = Arc::new(ControllerMetrics::new(&config.metric_label_keys)?);
        log::debug!(
            "controller created with concurrency quota {} and queue size {}",
            config.concurrency_quota,
            config.queue_size
        );
        Ok(Self {
            inner: Arc::new(ControllerInner {
                slots: Arc::new(Semaphore::new(config.concurrency_quota)),
                queries: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                accepting: AtomicBool::new(true),
                progress: Notify::new(),
                waiting: AtomicUsize::new(0),
                metrics,
                config,
            }),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Compile and admit a query
    ///
    /// Compilation and queueing run under a child of the context's token,
    /// so canceling the context aborts admission. On any admission failure
    /// the query is finalized and removed before the error is returned.
    pub async fn query(
        &self,
        ctx: &QueryContext,
        compiler: &dyn Compiler,
    ) -> Result<QueryHandle, ControlError> {
        let inner = &self.inner;
        let query = inner.create_query(ctx, compiler.compiler_type())?;

        match inner.admit(&query, compiler).await {
            Ok(()) => {
                inner
                    .metrics
                    .record_request(query.label_values(), RequestResult::Success);
                Ok(QueryHandle::new(query))
            }
            Err((err, result)) => {
                log::debug!("query {} was not admitted: {}", query.id(), err);
                inner.metrics.record_request(query.label_values(), result);
                query.fail(err.clone());
                query.done();
                Err(err)
            }
        }
    }

    /// Stop accepting queries, cancel every live query and wait for them
    ///
    /// Returns once every registered query reached a terminal state or was
    /// removed. When `deadline` elapses first, `DeadlineExceeded` is returned
    /// and the queries keep draining in the background.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ControlError> {
        let inner = &self.inner;
        inner.accepting.store(false, Ordering::SeqCst);
        inner.slots.close();

        let live: Vec<Arc<QueryInner>> = inner.queries.read().values().cloned().collect();
        log::info!("controller shutting down with {} live queries", live.len());
        for query in &live {
            query.cancel();
        }
        drop(live);

        match tokio::time::timeout(deadline, inner.wait_drained()).await {
            Ok(()) => {
                log::debug!("controller drained");
                Ok(())
            }
            Err(_) => {
                log::warn!("controller shutdown deadline of {:?} exceeded", deadline);
                Err(ControlError::DeadlineExceeded)
            }
        }
    }

    /// Snapshot of every registered query, ordered by id
    pub fn queries(&self) -> Vec<QueryInfo> {
        let mut infos: Vec<QueryInfo> = self
            .inner
            .queries
            .read()
            .values()
            .map(|q| q.info())
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn len(&self) -> usize {
        self.inner.queries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queries.read().is_empty()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Prometheus registry holding this controller's metrics
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.inner.metrics.registry()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("queries", &self.len())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

type AdmitError = (ControlError, RequestResult);

impl ControllerInner {
    fn create_query(
        self: &Arc<Self>,
        ctx: &QueryContext,
        compiler_type: &str,
    ) -> Result<Arc<QueryInner>, ControlError> {
        let mut queries = self.queries.write();
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ControlError::ShuttingDown);
        }

        let mut id = self.next_id.fetch_add(1, Ordering::Relaxed);
        while queries.contains_key(&id) {
            id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }

        let query = Arc::new(QueryInner::new(
            id,
            compiler_type.to_string(),
            ctx.label_values(self.metrics.label_keys()),
            ctx.cancel_token().child_token(),
            Arc::clone(&self.metrics),
            Arc::downgrade(self),
        ));
        queries.insert(id, Arc::clone(&query));
        log::debug!("query {} created ({})", id, compiler_type);
        Ok(query)
    }

    async fn admit(
        self: &Arc<Self>,
        query: &Arc<QueryInner>,
        compiler: &dyn Compiler,
    ) -> Result<(), AdmitError> {
        let cancel = query.cancel_token().clone();

        query
            .enter(QueryState::Compiling)
            .map_err(|e| (e, RequestResult::CompileError))?;
        let program = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err((ControlError::Canceled, RequestResult::CompileError));
            }
            compiled = compiler.compile(&cancel) => {
                compiled.map_err(|e| (ControlError::Compile(e), RequestResult::CompileError))?
            }
        };
        if self.config.verbose {
            log::info!("query {} compiled: {}", query.id(), program.describe());
        }

        query
            .enter(QueryState::Queueing)
            .map_err(|e| (e, RequestResult::QueueError))?;
        let permit = self
            .acquire_slot(query)
            .await
            .map_err(|e| (e, RequestResult::QueueError))?;
        query.set_permit(permit);

        query
            .enter(QueryState::Executing)
            .map_err(|e| (e, RequestResult::QueueError))?;
        self.execute(query, program)
            .await
            .map_err(|e| (e, RequestResult::RuntimeError))
    }

    /// Wait for a concurrency slot in FIFO order
    async fn acquire_slot(&self, query: &QueryInner) -> Result<OwnedSemaphorePermit, ControlError> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(ControlError::ShuttingDown),
            Err(TryAcquireError::NoPermits) => {}
        }

        let size = self.config.queue_size;
        let waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        if waiting >= size {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(ControlError::QueueFull { size });
        }
        log::debug!("query {} waiting for a slot ({} ahead)", query.id(), waiting);

        let acquired = tokio::select! {
            biased;
            _ = query.cancel_token().cancelled() => None,
            permit = Arc::clone(&self.slots).acquire_owned() => Some(permit),
        };
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        match acquired {
            None => Err(ControlError::Canceled),
            Some(Err(_)) => Err(ControlError::ShuttingDown),
            Some(Ok(permit)) => Ok(permit),
        }
    }

    async fn execute(
        &self,
        query: &Arc<QueryInner>,
        program: Arc<dyn Program>,
    ) -> Result<(), ControlError> {
        let alloc = Arc::new(Allocator::new(self.config.memory_bytes_quota_per_query));
        let cancel = query.cancel_token().clone();

        let mut running = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ControlError::Canceled),
            started = program.start(cancel.clone(), Arc::clone(&alloc)) => {
                started.map_err(ControlError::Start)?
            }
        };
        let Some(program_results) = running.results() else {
            running.done();
            return Err(ControlError::Start(ExecutionError::RuntimeError(
                "program result stream was already taken".to_string(),
            )));
        };

        let (tx, rx) = mpsc::channel(self.config.result_buffer_size);
        query.set_running(running, alloc, rx);

        let pump = tokio::spawn(pump_results(Arc::clone(query), program_results, tx));
        let supervised = Arc::clone(query);
        tokio::spawn(async move {
            if let Err(e) = pump.await {
                if e.is_panic() {
                    let message = panic_message(e.into_panic());
                    log::error!("query {} result pump panicked: {}", supervised.id(), message);
                    supervised.fail(ControlError::Execution(ExecutionError::Panic(message)));
                }
            }
        });
        Ok(())
    }

    pub(crate) fn remove(&self, id: QueryId) {
        let removed = self.queries.write().remove(&id).is_some();
        if removed {
            log::debug!("query {} removed from registry", id);
            self.notify_progress();
        }
    }

    pub(crate) fn notify_progress(&self) {
        self.progress.notify_waiters();
    }

    fn is_drained(&self) -> bool {
        self.queries
            .read()
            .values()
            .all(|query| query.state().is_terminal())
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }
}

/// Forward program results to the caller's bounded queue
///
/// Once the query is canceled the caller's queue is closed and remaining
/// results are discarded until the program closes its stream.
async fn pump_results(
    query: Arc<QueryInner>,
    mut source: mpsc::Receiver<QueryResult>,
    sink: mpsc::Sender<QueryResult>,
) {
    let cancel = query.cancel_token().clone();
    let mut sink = Some(sink);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled(), if sink.is_some() => {
                log::debug!("query {} canceled, discarding remaining results", query.id());
                sink = None;
                continue;
            }
            next = source.recv() => next,
        };
        let Some(result) = next else { break };

        if let Some(tx) = &sink {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                sent = tx.send(result) => sent.is_ok(),
            };
            if !sent {
                sink = None;
            }
        }
    }

    // Record the outcome before the caller observes the closed queue.
    query.complete_execution();
    drop(sink);
}
