// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution error types

use thiserror::Error;

/// Execution errors
///
/// Errors are cloneable so the first failure can be recorded once and read
/// back by every holder of a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Unsupported procedure: {0}")]
    UnsupportedProcedure(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Table not found with key {0}")]
    TableNotFound(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Memory limit exceeded: requested {requested} bytes, limit {limit} bytes")]
    MemoryLimitExceeded { limit: usize, requested: usize },

    #[error("Execution canceled")]
    Canceled,

    #[error("Panic: {0}")]
    Panic(String),
}

impl ExecutionError {
    /// Whether this error only reports that execution was canceled
    pub fn is_canceled(&self) -> bool {
        matches!(self, ExecutionError::Canceled)
    }
}
