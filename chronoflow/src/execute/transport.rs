// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Serialized delivery of messages into a stage
//!
//! Every stage sits behind a [`ConsecutiveTransport`] that serializes the
//! messages of all its parents, tracks per-parent watermarks and finishes,
//! and stops delivery once the stage has failed. Producers only ever lock
//! the transports downstream of them, so lock acquisition follows the
//! plan's edge direction and cannot cycle.

use super::error::ExecutionError;
use super::transformation::{DatasetId, Transformation};
use crate::table::{GroupKey, TableChunk, Time};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct ParentState {
    watermark: Time,
    processing_time: Time,
    finished: bool,
}

/// Per-parent clock and completion bookkeeping for a stage
#[derive(Debug)]
pub struct ParentTracker {
    parents: BTreeMap<DatasetId, ParentState>,
    watermark: Time,
    processing_time: Time,
}

impl ParentTracker {
    pub fn new(parents: &[DatasetId]) -> Self {
        Self {
            parents: parents
                .iter()
                .map(|id| {
                    (
                        *id,
                        ParentState {
                            watermark: Time::MIN,
                            processing_time: Time::MIN,
                            finished: false,
                        },
                    )
                })
                .collect(),
            watermark: Time::MIN,
            processing_time: Time::MIN,
        }
    }

    /// Combined watermark forwarded so far
    pub fn watermark(&self) -> Time {
        self.watermark
    }

    pub fn processing_time(&self) -> Time {
        self.processing_time
    }

    pub fn all_finished(&self) -> bool {
        self.parents.values().all(|p| p.finished)
    }

    fn parent_mut(&mut self, id: DatasetId, action: &str) -> &mut ParentState {
        let Some(parent) = self.parents.get_mut(&id) else {
            panic!("{} from unknown parent dataset {}", action, id);
        };
        if parent.finished {
            panic!("{} from dataset {} after it finished", action, id);
        }
        parent
    }

    /// Check that `id` may still send data
    pub fn check_open(&mut self, id: DatasetId, action: &str) {
        self.parent_mut(id, action);
    }

    /// Record a parent's watermark
    ///
    /// Returns the new combined watermark when it advanced. A parent moving
    /// its own watermark backwards is clamped and logged.
    pub fn update_watermark(&mut self, id: DatasetId, time: Time) -> Option<Time> {
        let parent = self.parent_mut(id, "watermark update");
        if time < parent.watermark {
            log::warn!(
                "dataset {} moved its watermark back from {} to {}, ignoring",
                id,
                parent.watermark,
                time
            );
            return None;
        }
        parent.watermark = time;
        self.advance_watermark()
    }

    /// Record a parent's processing time; returns the combined value when it
    /// advanced
    pub fn update_processing_time(&mut self, id: DatasetId, time: Time) -> Option<Time> {
        let parent = self.parent_mut(id, "processing time update");
        if time < parent.processing_time {
            return None;
        }
        parent.processing_time = time;
        let min = self
            .parents
            .values()
            .filter(|p| !p.finished)
            .map(|p| p.processing_time)
            .min()
            .unwrap_or(Time::MAX);
        if min > self.processing_time {
            self.processing_time = min;
            Some(min)
        } else {
            None
        }
    }

    /// Mark a parent finished; returns true once every parent has
    ///
    /// A parent finishing twice is a protocol violation and panics.
    pub fn finish(&mut self, id: DatasetId) -> bool {
        let parent = self.parent_mut(id, "finish");
        parent.finished = true;
        self.all_finished()
    }

    /// Combined watermark after finishes; finished parents no longer hold
    /// it back
    pub fn advance_watermark(&mut self) -> Option<Time> {
        let min = self
            .parents
            .values()
            .map(|p| if p.finished { Time::MAX } else { p.watermark })
            .min()
            .unwrap_or(Time::MAX);
        if min > self.watermark {
            self.watermark = min;
            Some(min)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TransportState {
    Running,
    Finished,
    Failed(ExecutionError),
}

/// Serializes and gates the messages delivered to one stage
pub struct ConsecutiveTransport {
    label: String,
    tracker: ParentTracker,
    inner: Box<dyn Transformation>,
    state: TransportState,
}

impl ConsecutiveTransport {
    pub fn new(label: impl Into<String>, parents: &[DatasetId], inner: Box<dyn Transformation>) -> Self {
        Self {
            label: label.into(),
            tracker: ParentTracker::new(parents),
            inner,
            state: TransportState::Running,
        }
    }

    fn fail(&mut self, id: DatasetId, err: ExecutionError) -> ExecutionError {
        log::debug!("stage {} failed: {}", self.label, err);
        self.state = TransportState::Failed(err.clone());
        self.inner.finish(id, Some(err.clone()));
        err
    }

    fn gate(&self) -> Result<(), ExecutionError> {
        match &self.state {
            TransportState::Failed(err) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    fn retract_table(&mut self, id: DatasetId, key: &GroupKey) -> Result<(), ExecutionError> {
        self.gate()?;
        self.tracker.check_open(id, "retraction");
        self.inner
            .retract_table(id, key)
            .map_err(|e| self.fail(id, e))
    }

    fn process(&mut self, id: DatasetId, chunk: &TableChunk) -> Result<(), ExecutionError> {
        self.gate()?;
        self.tracker.check_open(id, "process");
        self.inner.process(id, chunk).map_err(|e| self.fail(id, e))
    }

    fn update_watermark(&mut self, id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.gate()?;
        match self.tracker.update_watermark(id, time) {
            Some(combined) => self
                .inner
                .update_watermark(id, combined)
                .map_err(|e| self.fail(id, e)),
            None => Ok(()),
        }
    }

    fn update_processing_time(&mut self, id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.gate()?;
        match self.tracker.update_processing_time(id, time) {
            Some(combined) => self
                .inner
                .update_processing_time(id, combined)
                .map_err(|e| self.fail(id, e)),
            None => Ok(()),
        }
    }

    fn finish(&mut self, id: DatasetId, err: Option<ExecutionError>) {
        if matches!(self.state, TransportState::Failed(_)) {
            return;
        }
        if let Some(err) = err {
            // The first error finishes the stage immediately.
            self.tracker.finish(id);
            self.fail(id, err);
            return;
        }
        let all_done = self.tracker.finish(id);
        if all_done {
            self.state = TransportState::Finished;
            self.inner.finish(id, None);
            return;
        }
        if let Some(combined) = self.tracker.advance_watermark() {
            if let Err(e) = self.inner.update_watermark(id, combined) {
                self.fail(id, e);
            }
        }
    }
}

/// Shared handle to a stage's transport
#[derive(Clone)]
pub struct TransformationHandle {
    transport: Arc<Mutex<ConsecutiveTransport>>,
}

impl TransformationHandle {
    pub fn new(
        label: impl Into<String>,
        parents: &[DatasetId],
        inner: Box<dyn Transformation>,
    ) -> Self {
        Self {
            transport: Arc::new(Mutex::new(ConsecutiveTransport::new(label, parents, inner))),
        }
    }

    pub fn retract_table(&self, id: DatasetId, key: &GroupKey) -> Result<(), ExecutionError> {
        self.transport.lock().retract_table(id, key)
    }

    pub fn process(&self, id: DatasetId, chunk: &TableChunk) -> Result<(), ExecutionError> {
        self.transport.lock().process(id, chunk)
    }

    pub fn update_watermark(&self, id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.transport.lock().update_watermark(id, time)
    }

    pub fn update_processing_time(&self, id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.transport.lock().update_processing_time(id, time)
    }

    pub fn finish(&self, id: DatasetId, err: Option<ExecutionError>) {
        self.transport.lock().finish(id, err)
    }

    /// Whether the stage has finished, normally or with an error
    pub fn is_finished(&self) -> bool {
        !matches!(self.transport.lock().state, TransportState::Running)
    }
}
