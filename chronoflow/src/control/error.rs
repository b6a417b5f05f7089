// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Controller error types

use super::state::QueryState;
use crate::execute::error::ExecutionError;
use thiserror::Error;

/// Errors surfaced by the controller and by query handles
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("controller is shutting down")]
    ShuttingDown,

    #[error("failed to compile query: {0}")]
    Compile(#[source] ExecutionError),

    #[error("query queue is full ({size} queries waiting)")]
    QueueFull { size: usize },

    #[error("failed to start query: {0}")]
    Start(#[source] ExecutionError),

    #[error("query execution failed: {0}")]
    Execution(#[source] ExecutionError),

    #[error("query canceled")]
    Canceled,

    #[error("deadline exceeded while waiting for queries to finish")]
    DeadlineExceeded,

    #[error("invalid query state transition from {from} to {to}")]
    InvalidTransition { from: QueryState, to: QueryState },

    #[error("invalid controller configuration: {0}")]
    InvalidConfig(String),

    #[error("metrics error: {0}")]
    Metrics(String),
}

impl From<prometheus::Error> for ControlError {
    fn from(err: prometheus::Error) -> Self {
        ControlError::Metrics(err.to_string())
    }
}
