// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query control: compilation, admission, lifecycle and shutdown
//!
//! A [`Controller`] turns a [`Compiler`] into an executing program and hands
//! the caller a [`QueryHandle`]. Every query walks the same state machine
//! (see [`QueryState`]) and holds one concurrency slot while executing.

pub mod compiler;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod query;
pub mod span;
pub mod state;

pub use compiler::{Compiler, PlanCompiler};
pub use config::ControllerConfig;
pub use context::QueryContext;
pub use controller::Controller;
pub use error::ControlError;
pub use metrics::{ControllerMetrics, Phase, RequestResult};
pub use query::{QueryHandle, QueryId, QueryInfo};
pub use state::QueryState;
