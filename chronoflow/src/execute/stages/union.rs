// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Union stage: merges the tables of every parent by group key

use crate::execute::dataset::Dataset;
use crate::execute::error::ExecutionError;
use crate::execute::transformation::{DatasetId, Transformation};
use crate::table::{ColReader, GroupKey, TableChunk, Time};

/// Buffers all parents' rows per group key until its trigger fires
///
/// Tables with the same key are appended to one builder; columns missing
/// from some inputs are filled with nulls.
pub struct UnionTransformation {
    dataset: Dataset,
}

impl UnionTransformation {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }
}

impl Transformation for UnionTransformation {
    fn retract_table(&mut self, _id: DatasetId, key: &GroupKey) -> Result<(), ExecutionError> {
        self.dataset.retract_table(key)
    }

    fn process(&mut self, _id: DatasetId, chunk: &TableChunk) -> Result<(), ExecutionError> {
        let (builder, _created) = self.dataset.table_builder(chunk.key())?;
        builder.append_table(chunk)?;
        self.dataset.eval_triggers()
    }

    fn update_watermark(&mut self, _id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.dataset.update_watermark(time)
    }

    fn update_processing_time(&mut self, _id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.dataset.update_processing_time(time)
    }

    fn finish(&mut self, _id: DatasetId, err: Option<ExecutionError>) {
        self.dataset.finish(err);
    }
}
