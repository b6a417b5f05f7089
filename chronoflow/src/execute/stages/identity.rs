// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Pass-through stage

use crate::execute::dataset::PassthroughDataset;
use crate::execute::error::ExecutionError;
use crate::execute::transformation::{DatasetId, Transformation};
use crate::table::{GroupKey, TableChunk, Time};

/// Forwards every message to its outputs unchanged
pub struct IdentityTransformation {
    output: PassthroughDataset,
}

impl IdentityTransformation {
    pub fn new(output: PassthroughDataset) -> Self {
        Self { output }
    }
}

impl Transformation for IdentityTransformation {
    fn retract_table(&mut self, _id: DatasetId, key: &GroupKey) -> Result<(), ExecutionError> {
        self.output.retract_table(key)
    }

    fn process(&mut self, _id: DatasetId, chunk: &TableChunk) -> Result<(), ExecutionError> {
        self.output.process(chunk)
    }

    fn update_watermark(&mut self, _id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.output.update_watermark(time)
    }

    fn update_processing_time(&mut self, _id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.output.update_processing_time(time)
    }

    fn finish(&mut self, _id: DatasetId, err: Option<ExecutionError>) {
        self.output.finish(err);
    }
}
