// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query lifecycle and the caller-facing query handle

use super::controller::ControllerInner;
use super::error::ControlError;
use super::metrics::{ControllerMetrics, Phase};
use super::span::PhaseSpan;
use super::state::QueryState;
use crate::execute::program::{RunningQuery, Statistics};
use crate::execute::result::QueryResult;
use crate::memory::Allocator;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;

/// Identifier of a query within one controller
pub type QueryId = u64;

/// Snapshot of a registered query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInfo {
    pub id: QueryId,
    pub state: QueryState,
    pub compiler_type: String,
}

struct Lifecycle {
    state: QueryState,
    all: Option<PhaseSpan>,
    phase: Option<PhaseSpan>,
    stats: Statistics,
    err: Option<ControlError>,
}

/// Shared state of one query, owned by the controller's registry
pub(crate) struct QueryInner {
    id: QueryId,
    compiler_type: String,
    label_values: Vec<String>,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
    running: Mutex<Option<Box<dyn RunningQuery>>>,
    results: Mutex<Option<mpsc::Receiver<QueryResult>>>,
    alloc: Mutex<Option<Arc<Allocator>>>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    done: AtomicBool,
    metrics: Arc<ControllerMetrics>,
    controller: Weak<ControllerInner>,
}

impl QueryInner {
    pub(crate) fn new(
        id: QueryId,
        compiler_type: String,
        label_values: Vec<String>,
        cancel: CancellationToken,
        metrics: Arc<ControllerMetrics>,
        controller: Weak<ControllerInner>,
    ) -> Self {
        let (gauge, histogram) = metrics.phase(Phase::All, &label_values, &compiler_type);
        Self {
            id,
            label_values,
            cancel,
            lifecycle: Mutex::new(Lifecycle {
                state: QueryState::Created,
                all: Some(PhaseSpan::start(gauge, histogram)),
                phase: None,
                stats: Statistics::default(),
                err: None,
            }),
            running: Mutex::new(None),
            results: Mutex::new(None),
            alloc: Mutex::new(None),
            permit: Mutex::new(None),
            done: AtomicBool::new(false),
            metrics,
            controller,
            compiler_type,
        }
    }

    pub(crate) fn id(&self) -> QueryId {
        self.id
    }

    pub(crate) fn compiler_type(&self) -> &str {
        &self.compiler_type
    }

    pub(crate) fn label_values(&self) -> &[String] {
        &self.label_values
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn state(&self) -> QueryState {
        self.lifecycle.lock().state
    }

    pub(crate) fn info(&self) -> QueryInfo {
        QueryInfo {
            id: self.id,
            state: self.state(),
            compiler_type: self.compiler_type.clone(),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Move to `target`, returning the state actually reached
    ///
    /// A signaled cancellation token preempts the requested target and the
    /// query lands in `Canceled`. Transitions out of a terminal state, or
    /// that skip a phase, are rejected without side effects.
    pub(crate) fn transition(&self, target: QueryState) -> Result<QueryState, ControlError> {
        let mut lc = self.lifecycle.lock();
        let from = lc.state;
        let to = if self.cancel.is_cancelled() {
            QueryState::Canceled
        } else {
            target
        };

        if !from.can_transition_to(to) {
            log::warn!(
                "query {} rejected transition {} -> {}",
                self.id,
                from,
                target
            );
            return Err(ControlError::InvalidTransition { from, to: target });
        }

        if let Some(mut span) = lc.phase.take() {
            let elapsed = span.finish();
            match from {
                QueryState::Compiling => lc.stats.compile_duration += elapsed,
                QueryState::Queueing => lc.stats.queue_duration += elapsed,
                QueryState::Executing => lc.stats.execute_duration += elapsed,
                _ => {}
            }
        }

        let phase = match to {
            QueryState::Compiling => Some(Phase::Compiling),
            QueryState::Queueing => Some(Phase::Queueing),
            QueryState::Executing => Some(Phase::Executing),
            _ => None,
        };
        if let Some(phase) = phase {
            let (gauge, histogram) =
                self.metrics
                    .phase(phase, &self.label_values, &self.compiler_type);
            lc.phase = Some(PhaseSpan::start(gauge, histogram));
        }

        if to.is_terminal() {
            if let Some(mut all) = lc.all.take() {
                lc.stats.total_duration = all.finish();
            }
        }

        lc.state = to;
        drop(lc);
        log::debug!("query {} transitioned {} -> {}", self.id, from, to);

        if to.is_terminal() {
            if let Some(controller) = self.controller.upgrade() {
                controller.notify_progress();
            }
        }
        Ok(to)
    }

    /// Like [`transition`](Self::transition) but treats a preempting
    /// cancellation as an error
    pub(crate) fn enter(&self, target: QueryState) -> Result<(), ControlError> {
        match self.transition(target)? {
            QueryState::Canceled if target != QueryState::Canceled => Err(ControlError::Canceled),
            _ => Ok(()),
        }
    }

    /// Record `err` unless an error was already recorded
    pub(crate) fn set_err(&self, err: ControlError) {
        let mut lc = self.lifecycle.lock();
        if lc.err.is_none() {
            lc.err = Some(err);
        }
    }

    pub(crate) fn err(&self) -> Option<ControlError> {
        let lc = self.lifecycle.lock();
        if lc.state == QueryState::Canceled {
            return Some(ControlError::Canceled);
        }
        lc.err.clone()
    }

    pub(crate) fn statistics(&self) -> Statistics {
        self.lifecycle.lock().stats.clone()
    }

    pub(crate) fn set_permit(&self, permit: OwnedSemaphorePermit) {
        self.lifecycle.lock().stats.concurrency = 1;
        *self.permit.lock() = Some(permit);
    }

    pub(crate) fn set_running(
        &self,
        running: Box<dyn RunningQuery>,
        alloc: Arc<Allocator>,
        results: mpsc::Receiver<QueryResult>,
    ) {
        *self.running.lock() = Some(running);
        *self.alloc.lock() = Some(alloc);
        *self.results.lock() = Some(results);
    }

    pub(crate) fn take_results(&self) -> Option<mpsc::Receiver<QueryResult>> {
        self.results.lock().take()
    }

    /// Called by the result pump once the program's result stream closed
    pub(crate) fn complete_execution(&self) {
        if self.state().is_terminal() {
            return;
        }
        let err = self.running.lock().as_ref().and_then(|r| r.err());
        let outcome = match err {
            Some(err) => {
                log::debug!("query {} execution failed: {}", self.id, err);
                self.set_err(ControlError::Execution(err));
                self.transition(QueryState::Errored)
            }
            None if self.cancel.is_cancelled() => self.transition(QueryState::Canceled),
            None => return,
        };
        if let Err(e) = outcome {
            log::debug!("query {} completed after finalization: {}", self.id, e);
        }
    }

    /// Fail the query outside the normal execution path
    pub(crate) fn fail(&self, err: ControlError) {
        let target = if err == ControlError::Canceled {
            QueryState::Canceled
        } else {
            QueryState::Errored
        };
        self.set_err(err);
        if !self.state().is_terminal() {
            if let Err(e) = self.transition(target) {
                log::debug!("query {} failed after finalization: {}", self.id, e);
            }
        }
    }

    /// Release every resource held by the query and leave the registry
    ///
    /// Runs at most once; later calls return immediately.
    pub(crate) fn done(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }

        let running = self.running.lock().take();
        if let Some(err) = running.as_ref().and_then(|r| r.err()) {
            self.set_err(ControlError::Execution(err));
            if !self.state().is_terminal() {
                let _ = self.transition(QueryState::Errored);
            }
        }

        let state = self.state();
        if !state.is_terminal() {
            let target = if state == QueryState::Executing {
                QueryState::Finished
            } else {
                QueryState::Canceled
            };
            if let Err(e) = self.transition(target) {
                log::warn!("query {} could not finalize: {}", self.id, e);
            }
        }

        if let Some(mut running) = running {
            running.done();
            self.lifecycle.lock().stats.merge(&running.statistics());
        }

        if let Some(alloc) = self.alloc.lock().take() {
            log::debug!("query {} {}", self.id, alloc.stats().format_human_readable());
            let mut lc = self.lifecycle.lock();
            lc.stats.max_allocated = lc.stats.max_allocated.max(alloc.max_allocated());
        }

        self.cancel.cancel();
        self.permit.lock().take();
        self.results.lock().take();

        if let Some(controller) = self.controller.upgrade() {
            controller.remove(self.id);
        }
        log::debug!("query {} done", self.id);
    }
}

/// Caller-side handle of an admitted query
///
/// Dropping the handle finalizes the query as if [`done`](Self::done) had
/// been called.
pub struct QueryHandle {
    inner: Arc<QueryInner>,
}

impl QueryHandle {
    pub(crate) fn new(inner: Arc<QueryInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> QueryId {
        self.inner.id()
    }

    pub fn state(&self) -> QueryState {
        self.inner.state()
    }

    pub fn compiler_type(&self) -> &str {
        self.inner.compiler_type()
    }

    /// Take the result stream
    ///
    /// The stream closes once execution finishes, fails or is canceled.
    /// Returns `None` if it was already taken.
    pub fn results(&self) -> Option<mpsc::Receiver<QueryResult>> {
        self.inner.take_results()
    }

    /// Signal cancellation; never blocks
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Finalize the query; safe to call more than once
    pub fn done(&self) {
        self.inner.done();
    }

    /// First failure of the query, or `Canceled` if it was canceled
    pub fn err(&self) -> Option<ControlError> {
        self.inner.err()
    }

    /// Lifecycle statistics; complete once [`done`](Self::done) returned
    pub fn statistics(&self) -> Statistics {
        self.inner.statistics()
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.inner.done();
    }
}
