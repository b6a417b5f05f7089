// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Push-based dataflow execution
//!
//! Sources push table chunks into stages through serialized transports.
//! Buffered stages keep per-group-key builders in a [`TableBuilderCache`]
//! and emit them when their triggers fire; result sinks hand the emitted
//! tables to the query's consumer.

pub mod cache;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod program;
pub mod registry;
pub mod result;
pub mod source;
pub mod stages;
pub mod transformation;
pub mod transport;
pub mod trigger;

pub use cache::{TableBuilderCache, TriggerOutcome};
pub use dataset::{AccumulationMode, Dataset, KeyState, PassthroughDataset};
pub use error::ExecutionError;
pub use executor::{ExecutionOptions, PlanProgram};
pub use program::{Program, RunningQuery, Statistics};
pub use registry::{ProcedureRegistry, SourceArgs, StageArgs};
pub use result::{ErrorSlot, QueryResult, TableSender, TableStream, DEFAULT_RESULT_NAME};
pub use source::{ExecutionContext, Source, StaticSource};
pub use transformation::{DatasetId, Transformation, TransformationSet};
pub use transport::{ParentTracker, TransformationHandle};
pub use trigger::{TableContext, Trigger, TriggerContext, TriggerSpec};
