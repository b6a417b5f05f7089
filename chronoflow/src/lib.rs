// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Chronoflow - query controller and push-based dataflow runtime
//!
//! Chronoflow runs compiled query plans over time-series tables and streams
//! the resulting tables back to the caller.
//!
//! # Features
//!
//! - **Query Controller**: Strict query lifecycle with cancellation, admission
//!   control and drain-on-shutdown
//! - **Dataflow Engine**: Push-based stages partitioned by group key, with
//!   watermarks, triggers and retractions
//! - **Columnar Tables**: Reference-counted table chunks with per-query
//!   memory accounting
//! - **Metrics**: Prometheus counters, gauges and histograms per controller
//!
//! # Usage
//!
//! ```ignore
//! let registry = Arc::new(ProcedureRegistry::default());
//! let controller = Controller::new(ControllerConfig::default())?;
//! let compiler = PlanCompiler::new(plan, registry);
//!
//! let query = controller.query(&QueryContext::new(), &compiler).await?;
//! let mut results = query.results().expect("results");
//! while let Some(mut result) = results.recv().await {
//!     result.tables().for_each(|table| { println!("{}", table.key()); Ok(()) }).await?;
//! }
//! query.done();
//! ```

pub mod control;
pub mod execute;
pub mod memory;
pub mod plan;
pub mod table;

pub use control::{
    Compiler, ControlError, Controller, ControllerConfig, PlanCompiler, QueryContext, QueryHandle,
    QueryId, QueryInfo, QueryState,
};
pub use execute::{
    ExecutionError, PlanProgram, Program, ProcedureRegistry, QueryResult, RunningQuery, Statistics,
};
pub use memory::Allocator;
pub use plan::PlanSpec;
pub use table::{ColReader, GroupKey, TableChunk, Value};

/// Chronoflow version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Chronoflow crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
