// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! The push-based stage contract

use super::error::ExecutionError;
use super::transport::TransformationHandle;
use crate::table::{GroupKey, TableChunk, Time};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a dataset, derived from its plan node id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(Uuid);

impl DatasetId {
    /// Stable id for a plan node; the same node id always maps to the same
    /// dataset id
    pub fn from_node_id(node_id: &str) -> Self {
        DatasetId(Uuid::new_v5(&Uuid::nil(), node_id.as_bytes()))
    }

    /// Fresh random id for datasets with no plan node
    pub fn random() -> Self {
        DatasetId(Uuid::new_v4())
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stage that receives messages from its parent datasets
///
/// Calls are serialized per stage by the transport wrapping it. `process`
/// borrows the chunk: a stage that keeps it past the call must `retain` it.
pub trait Transformation: Send {
    /// A previously emitted table with `key` is withdrawn
    fn retract_table(&mut self, id: DatasetId, key: &GroupKey) -> Result<(), ExecutionError>;

    /// A chunk of rows arrived from parent `id`
    fn process(&mut self, id: DatasetId, chunk: &TableChunk) -> Result<(), ExecutionError>;

    /// The input watermark advanced
    fn update_watermark(&mut self, id: DatasetId, time: Time) -> Result<(), ExecutionError>;

    /// The input processing time advanced
    fn update_processing_time(&mut self, id: DatasetId, time: Time)
        -> Result<(), ExecutionError>;

    /// Input is complete, carrying the first upstream error if any
    fn finish(&mut self, id: DatasetId, err: Option<ExecutionError>);
}

/// Downstream fan-out of a dataset
#[derive(Default, Clone)]
pub struct TransformationSet {
    handles: Vec<TransformationHandle>,
}

impl TransformationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: TransformationHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn retract_table(&self, id: DatasetId, key: &GroupKey) -> Result<(), ExecutionError> {
        for t in &self.handles {
            t.retract_table(id, key)?;
        }
        Ok(())
    }

    pub fn process(&self, id: DatasetId, chunk: &TableChunk) -> Result<(), ExecutionError> {
        for t in &self.handles {
            t.process(id, chunk)?;
        }
        Ok(())
    }

    pub fn update_watermark(&self, id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        for t in &self.handles {
            t.update_watermark(id, time)?;
        }
        Ok(())
    }

    pub fn update_processing_time(&self, id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        for t in &self.handles {
            t.update_processing_time(id, time)?;
        }
        Ok(())
    }

    pub fn finish(&self, id: DatasetId, err: Option<ExecutionError>) {
        for t in &self.handles {
            t.finish(id, err.clone());
        }
    }
}
