// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Sort stage

use crate::execute::dataset::Dataset;
use crate::execute::error::ExecutionError;
use crate::execute::transformation::{DatasetId, Transformation};
use crate::memory::Allocator;
use crate::table::{concat_chunks, ColReader, GroupKey, TableChunk, Time};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Holds every chunk of a key and emits it sorted when input completes
///
/// Incoming chunks are retained rather than copied; they are consolidated
/// into one table per key at finish and released.
pub struct SortTransformation {
    dataset: Dataset,
    columns: Vec<String>,
    desc: bool,
    buffered: BTreeMap<GroupKey, Vec<TableChunk>>,
    alloc: Arc<Allocator>,
}

impl SortTransformation {
    pub fn new(dataset: Dataset, columns: Vec<String>, desc: bool, alloc: Arc<Allocator>) -> Self {
        Self {
            dataset,
            columns,
            desc,
            buffered: BTreeMap::new(),
            alloc,
        }
    }

    fn flush(&mut self) -> Result<(), ExecutionError> {
        let buffered = std::mem::take(&mut self.buffered);
        for (key, chunks) in buffered {
            let merged = concat_chunks(chunks, &self.alloc)?;
            let (builder, _created) = self.dataset.table_builder(&key)?;
            builder.append_table(&merged)?;
            merged.release();
            builder.sort(&self.columns, self.desc)?;
        }
        Ok(())
    }
}

impl Transformation for SortTransformation {
    fn retract_table(&mut self, _id: DatasetId, key: &GroupKey) -> Result<(), ExecutionError> {
        self.buffered.remove(key);
        self.dataset.retract_table(key)
    }

    fn process(&mut self, _id: DatasetId, chunk: &TableChunk) -> Result<(), ExecutionError> {
        self.dataset.ensure_open(chunk.key())?;
        self.buffered
            .entry(chunk.key().clone())
            .or_default()
            .push(chunk.retain());
        Ok(())
    }

    fn update_watermark(&mut self, _id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.dataset.update_watermark(time)
    }

    fn update_processing_time(&mut self, _id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.dataset.update_processing_time(time)
    }

    fn finish(&mut self, _id: DatasetId, err: Option<ExecutionError>) {
        let err = match err {
            Some(e) => {
                self.buffered.clear();
                Some(e)
            }
            None => self.flush().err(),
        };
        self.dataset.finish(err);
    }
}
