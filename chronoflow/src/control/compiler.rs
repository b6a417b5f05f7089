// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Compilers: turn a query request into a startable program

use crate::execute::error::ExecutionError;
use crate::execute::executor::{ExecutionOptions, PlanProgram};
use crate::execute::program::Program;
use crate::execute::registry::ProcedureRegistry;
use crate::plan::PlanSpec;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Produces a program for one query
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile under `cancel`; long compilations should observe the token
    async fn compile(&self, cancel: &CancellationToken) -> Result<Arc<dyn Program>, ExecutionError>;

    /// Label for the `compiler_type` metric dimension
    fn compiler_type(&self) -> &str;
}

/// Compiler for an already-built physical plan
pub struct PlanCompiler {
    plan: PlanSpec,
    registry: Arc<ProcedureRegistry>,
    options: ExecutionOptions,
}

impl PlanCompiler {
    pub fn new(plan: PlanSpec, registry: Arc<ProcedureRegistry>) -> Self {
        Self {
            plan,
            registry,
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Compiler for PlanCompiler {
    async fn compile(&self, cancel: &CancellationToken) -> Result<Arc<dyn Program>, ExecutionError> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::Canceled);
        }
        let program = PlanProgram::new(
            self.plan.clone(),
            Arc::clone(&self.registry),
            self.options.clone(),
        )?;
        Ok(Arc::new(program))
    }

    fn compiler_type(&self) -> &str {
        "plan"
    }
}
