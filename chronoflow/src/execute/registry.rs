// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Registry of externally provided procedure kinds

use super::cache::TableBuilderCache;
use super::dataset::{AccumulationMode, Dataset, PassthroughDataset};
use super::error::ExecutionError;
use super::source::Source;
use super::transformation::{DatasetId, Transformation, TransformationSet};
use super::trigger::TriggerSpec;
use crate::memory::Allocator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Inputs handed to a source constructor
pub struct SourceArgs {
    pub id: DatasetId,
    pub output: PassthroughDataset,
}

/// Inputs handed to a stage constructor
pub struct StageArgs {
    pub id: DatasetId,
    pub downstream: TransformationSet,
    pub accumulation_mode: AccumulationMode,
    pub trigger: TriggerSpec,
    pub cancel: CancellationToken,
    pub alloc: Arc<Allocator>,
}

impl StageArgs {
    /// Buffered output wired to the stage's children
    pub fn into_dataset(self) -> Dataset {
        let mut cache = TableBuilderCache::new(self.alloc);
        cache.set_trigger_spec(self.trigger);
        let mut dataset = Dataset::new(self.id, self.accumulation_mode, cache, self.cancel);
        dataset.set_transformations(self.downstream);
        dataset
    }

    /// Unbuffered output wired to the stage's children
    pub fn into_passthrough(self) -> PassthroughDataset {
        PassthroughDataset::with_transformations(self.id, self.downstream)
    }
}

pub type SourceConstructor = Box<
    dyn Fn(&serde_json::Value, SourceArgs) -> Result<Box<dyn Source>, ExecutionError> + Send + Sync,
>;

pub type StageConstructor = Box<
    dyn Fn(&serde_json::Value, StageArgs) -> Result<Box<dyn Transformation>, ExecutionError>
        + Send
        + Sync,
>;

/// Maps procedure kinds to their constructors
///
/// A registry is an explicit value handed to the programs that need it;
/// there is no process-wide table.
#[derive(Default)]
pub struct ProcedureRegistry {
    sources: HashMap<String, SourceConstructor>,
    stages: HashMap<String, StageConstructor>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source<F>(&mut self, kind: &str, constructor: F) -> Result<(), ExecutionError>
    where
        F: Fn(&serde_json::Value, SourceArgs) -> Result<Box<dyn Source>, ExecutionError>
            + Send
            + Sync
            + 'static,
    {
        if self.sources.contains_key(kind) {
            return Err(ExecutionError::InvalidPlan(format!(
                "source kind {} is already registered",
                kind
            )));
        }
        self.sources.insert(kind.to_string(), Box::new(constructor));
        Ok(())
    }

    pub fn register_stage<F>(&mut self, kind: &str, constructor: F) -> Result<(), ExecutionError>
    where
        F: Fn(&serde_json::Value, StageArgs) -> Result<Box<dyn Transformation>, ExecutionError>
            + Send
            + Sync
            + 'static,
    {
        if self.stages.contains_key(kind) {
            return Err(ExecutionError::InvalidPlan(format!(
                "stage kind {} is already registered",
                kind
            )));
        }
        self.stages.insert(kind.to_string(), Box::new(constructor));
        Ok(())
    }

    pub fn create_source(
        &self,
        kind: &str,
        config: &serde_json::Value,
        args: SourceArgs,
    ) -> Result<Box<dyn Source>, ExecutionError> {
        let constructor = self
            .sources
            .get(kind)
            .ok_or_else(|| ExecutionError::UnsupportedProcedure(kind.to_string()))?;
        constructor(config, args)
    }

    pub fn create_stage(
        &self,
        kind: &str,
        config: &serde_json::Value,
        args: StageArgs,
    ) -> Result<Box<dyn Transformation>, ExecutionError> {
        let constructor = self
            .stages
            .get(kind)
            .ok_or_else(|| ExecutionError::UnsupportedProcedure(kind.to_string()))?;
        constructor(config, args)
    }

    pub fn has_source(&self, kind: &str) -> bool {
        self.sources.contains_key(kind)
    }

    pub fn has_stage(&self, kind: &str) -> bool {
        self.stages.contains_key(kind)
    }
}
