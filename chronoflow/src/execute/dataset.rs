// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Datasets: a stage's buffered output and its downstream fan-out

use super::cache::TableBuilderCache;
use super::error::ExecutionError;
use super::transformation::{DatasetId, TransformationSet};
use super::transport::TransformationHandle;
use super::trigger::TriggerSpec;
use crate::table::{ColListTableBuilder, GroupKey, TableChunk, Time};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;

/// What happens to a key's rows after its trigger fires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationMode {
    /// Emitted rows are dropped from the builder
    #[default]
    Discarding,
    /// Rows are kept; each re-emission first retracts the previous one
    Accumulating,
}

/// Clock and lifecycle state of one group key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyState {
    pub watermark: Time,
    pub processing_time: Time,
    pub retracted: bool,
    pub finished: bool,
}

/// Buffered output of a stage
///
/// Stages write rows into per-key builders; the dataset evaluates triggers
/// whenever its clocks advance and pushes triggered tables to every
/// downstream transformation.
pub struct Dataset {
    id: DatasetId,
    cancel: CancellationToken,
    transformations: TransformationSet,
    acc_mode: AccumulationMode,
    watermark: Time,
    processing_time: Time,
    cache: TableBuilderCache,
    key_states: BTreeMap<GroupKey, KeyState>,
    emitted: BTreeSet<GroupKey>,
    finished: bool,
}

impl Dataset {
    pub fn new(
        id: DatasetId,
        acc_mode: AccumulationMode,
        cache: TableBuilderCache,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            cancel,
            transformations: TransformationSet::new(),
            acc_mode,
            watermark: Time::MIN,
            processing_time: Time::MIN,
            cache,
            key_states: BTreeMap::new(),
            emitted: BTreeSet::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn add_transformation(&mut self, t: TransformationHandle) {
        self.transformations.add(t);
    }

    pub fn set_transformations(&mut self, transformations: TransformationSet) {
        self.transformations = transformations;
    }

    pub fn set_trigger_spec(&mut self, spec: TriggerSpec) {
        self.cache.set_trigger_spec(spec);
    }

    pub fn accumulation_mode(&self) -> AccumulationMode {
        self.acc_mode
    }

    pub fn watermark(&self) -> Time {
        self.watermark
    }

    pub fn processing_time(&self) -> Time {
        self.processing_time
    }

    pub fn key_state(&self, key: &GroupKey) -> Option<KeyState> {
        self.key_states.get(key).copied()
    }

    pub fn cache(&self) -> &TableBuilderCache {
        &self.cache
    }

    /// Fail if `key` may no longer receive rows
    pub fn ensure_open(&self, key: &GroupKey) -> Result<(), ExecutionError> {
        if self.finished {
            return Err(ExecutionError::ProtocolViolation(format!(
                "dataset {} already finished",
                self.id
            )));
        }
        if self.cache.is_finalized(key) {
            return Err(ExecutionError::ProtocolViolation(format!(
                "table with key {} was already finalized",
                key
            )));
        }
        Ok(())
    }

    /// Builder for `key`, created on first use
    pub fn table_builder(
        &mut self,
        key: &GroupKey,
    ) -> Result<(&mut ColListTableBuilder, bool), ExecutionError> {
        self.ensure_open(key)?;
        let (watermark, processing_time) = (self.watermark, self.processing_time);
        self.key_states.entry(key.clone()).or_insert(KeyState {
            watermark,
            processing_time,
            retracted: false,
            finished: false,
        });
        self.cache.table_builder(key)
    }

    pub fn update_watermark(&mut self, time: Time) -> Result<(), ExecutionError> {
        self.watermark = time;
        for state in self.key_states.values_mut().filter(|s| !s.finished) {
            state.watermark = time;
        }
        self.eval_triggers()?;
        self.transformations.update_watermark(self.id, time)
    }

    pub fn update_processing_time(&mut self, time: Time) -> Result<(), ExecutionError> {
        self.processing_time = time;
        for state in self.key_states.values_mut().filter(|s| !s.finished) {
            state.processing_time = time;
        }
        self.eval_triggers()?;
        self.transformations.update_processing_time(self.id, time)
    }

    /// Withdraw `key` here and downstream; the key may be rebuilt afterwards
    pub fn retract_table(&mut self, key: &GroupKey) -> Result<(), ExecutionError> {
        self.cache.retract_table(key);
        self.emitted.remove(key);
        if let Some(state) = self.key_states.get_mut(key) {
            state.retracted = true;
            state.finished = false;
        }
        self.transformations.retract_table(self.id, key)
    }

    /// Run every key's trigger and emit or expire as it decides
    ///
    /// Called on every clock advance; stages also call it after buffering
    /// rows so count-based triggers fire promptly.
    pub fn eval_triggers(&mut self) -> Result<(), ExecutionError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }
        let outcomes = self
            .cache
            .evaluate_triggers(self.watermark, self.processing_time);
        for outcome in outcomes {
            if outcome.triggered {
                self.trigger_table(&outcome.key)?;
            }
            if outcome.finished {
                self.expire_table(&outcome.key);
            }
        }
        Ok(())
    }

    /// Materialize `key` and send it downstream
    fn trigger_table(&mut self, key: &GroupKey) -> Result<(), ExecutionError> {
        let chunk = self.cache.table(key)?;
        match self.acc_mode {
            AccumulationMode::Discarding => {
                self.send(&chunk)?;
                self.cache.clear_data(key);
                self.emitted.insert(key.clone());
            }
            AccumulationMode::Accumulating => {
                if self.emitted.contains(key) {
                    self.transformations.retract_table(self.id, key)?;
                }
                self.send(&chunk)?;
                self.cache.mark_emitted(key);
                self.emitted.insert(key.clone());
            }
        }
        chunk.release();
        Ok(())
    }

    /// A key with nothing buffered since an earlier trigger emitted it
    fn already_flushed(&self, key: &GroupKey) -> bool {
        self.emitted.contains(key) && self.cache.pending_rows(key) == 0
    }

    fn send(&self, chunk: &TableChunk) -> Result<(), ExecutionError> {
        self.transformations.process(self.id, chunk)
    }

    fn expire_table(&mut self, key: &GroupKey) {
        self.cache.expire_table(key);
        if let Some(state) = self.key_states.get_mut(key) {
            state.finished = true;
        }
    }

    /// Flush every remaining key and finish downstream
    ///
    /// Without an error every live key with unemitted rows is triggered,
    /// and every live key is expired, in key order, before downstream is
    /// finished. A flush failure replaces `err`.
    /// Finishing a dataset twice panics.
    pub fn finish(&mut self, err: Option<ExecutionError>) {
        if self.finished {
            panic!("dataset {} finished twice", self.id);
        }
        let mut err = err;
        if err.is_none() {
            for key in self.cache.keys() {
                if self.cancel.is_cancelled() {
                    err = Some(ExecutionError::Canceled);
                    break;
                }
                if self.already_flushed(&key) {
                    self.expire_table(&key);
                    continue;
                }
                if let Err(e) = self.trigger_table(&key) {
                    err = Some(e);
                    break;
                }
                self.expire_table(&key);
            }
        }
        self.finished = true;
        if let Some(e) = &err {
            log::debug!("dataset {} finishing with error: {}", self.id, e);
        }
        self.transformations.finish(self.id, err);
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Dataset that forwards chunks as they arrive without buffering
pub struct PassthroughDataset {
    id: DatasetId,
    transformations: TransformationSet,
    finished: bool,
}

impl PassthroughDataset {
    pub fn new(id: DatasetId) -> Self {
        Self::with_transformations(id, TransformationSet::new())
    }

    pub fn with_transformations(id: DatasetId, transformations: TransformationSet) -> Self {
        Self {
            id,
            transformations,
            finished: false,
        }
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn add_transformation(&mut self, t: TransformationHandle) {
        self.transformations.add(t);
    }

    pub fn process(&self, chunk: &TableChunk) -> Result<(), ExecutionError> {
        self.transformations.process(self.id, chunk)
    }

    pub fn retract_table(&self, key: &GroupKey) -> Result<(), ExecutionError> {
        self.transformations.retract_table(self.id, key)
    }

    pub fn update_watermark(&self, time: Time) -> Result<(), ExecutionError> {
        self.transformations.update_watermark(self.id, time)
    }

    pub fn update_processing_time(&self, time: Time) -> Result<(), ExecutionError> {
        self.transformations.update_processing_time(self.id, time)
    }

    pub fn finish(&mut self, err: Option<ExecutionError>) {
        if self.finished {
            panic!("dataset {} finished twice", self.id);
        }
        self.finished = true;
        self.transformations.finish(self.id, err);
    }
}
