// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Compiled programs and their running instances

use super::error::ExecutionError;
use super::result::QueryResult;
use crate::memory::Allocator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runtime statistics of one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Time spent compiling
    pub compile_duration: Duration,
    /// Time spent waiting for a concurrency slot
    pub queue_duration: Duration,
    /// Time spent preparing execution
    pub plan_duration: Duration,
    /// Time spent executing
    pub execute_duration: Duration,
    /// Wall time from submission to completion
    pub total_duration: Duration,
    /// Concurrency slots held while executing
    pub concurrency: usize,
    /// Peak bytes accounted to the query's allocator
    pub max_allocated: usize,
    /// Program-specific details
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Statistics {
    /// Fold program-reported statistics into these
    pub fn merge(&mut self, other: &Statistics) {
        self.compile_duration += other.compile_duration;
        self.queue_duration += other.queue_duration;
        self.plan_duration += other.plan_duration;
        self.execute_duration += other.execute_duration;
        self.total_duration += other.total_duration;
        self.concurrency = self.concurrency.max(other.concurrency);
        self.max_allocated = self.max_allocated.max(other.max_allocated);
        for (k, v) in &other.metadata {
            self.metadata.insert(k.clone(), v.clone());
        }
    }
}

/// A compiled, startable query program
#[async_trait]
pub trait Program: Send + Sync {
    /// Begin execution under `cancel`, accounting memory against `alloc`
    async fn start(
        &self,
        cancel: CancellationToken,
        alloc: Arc<Allocator>,
    ) -> Result<Box<dyn RunningQuery>, ExecutionError>;

    /// Human-readable rendering for verbose logging
    fn describe(&self) -> String {
        "program".to_string()
    }
}

/// An executing program
///
/// The results receiver yields each named result as it becomes available
/// and closes only once execution has completed, successfully or not.
pub trait RunningQuery: Send {
    /// Take the result stream; `None` once taken
    fn results(&mut self) -> Option<mpsc::Receiver<QueryResult>>;

    /// Release execution resources; called once the consumer is done
    fn done(&mut self);

    /// Ask execution to stop early
    fn cancel(&self);

    fn statistics(&self) -> Statistics;

    /// First execution error, if any
    fn err(&self) -> Option<ExecutionError>;
}
