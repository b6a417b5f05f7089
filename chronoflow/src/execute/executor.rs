// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Plan executor
//!
//! Turns a [`PlanSpec`] into a wired graph of sources, stage transports and
//! result sinks, then drives every source on its own task. The graph is
//! built children first so each node is created with its downstream
//! handles already in hand.

use super::dataset::{AccumulationMode, PassthroughDataset};
use super::error::ExecutionError;
use super::program::{Program, RunningQuery, Statistics};
use super::registry::{ProcedureRegistry, SourceArgs, StageArgs};
use super::result::{ErrorSlot, QueryResult, ResultSink, DEFAULT_RESULT_NAME};
use super::source::{ExecutionContext, Source, StaticSource};
use super::stages::create_stage;
use super::transformation::{DatasetId, TransformationSet};
use super::transport::TransformationHandle;
use super::trigger::TriggerSpec;
use crate::memory::Allocator;
use crate::plan::{PlanSpec, ProcedureSpec, SourceSpec};
use async_trait::async_trait;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Execution settings applied to every buffered stage of a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub accumulation_mode: AccumulationMode,
    /// Trigger for stages whose plan node sets none
    pub default_trigger: TriggerSpec,
}

struct ExecutionGraph {
    sources: Vec<Box<dyn Source>>,
    results: Vec<QueryResult>,
}

struct GraphBuilder<'a> {
    plan: &'a PlanSpec,
    registry: &'a ProcedureRegistry,
    options: &'a ExecutionOptions,
    ctx: &'a ExecutionContext,
    errors: &'a ErrorSlot,
    handles: HashMap<NodeIndex, TransformationHandle>,
    result_names: HashSet<String>,
    results: Vec<QueryResult>,
    sources: Vec<Box<dyn Source>>,
}

impl<'a> GraphBuilder<'a> {
    fn build(mut self) -> Result<ExecutionGraph, ExecutionError> {
        self.plan.validate()?;
        let order = self.plan.topological_order()?;
        for &idx in order.iter().rev() {
            self.build_node(idx)?;
        }
        let mut results = self.results;
        results.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(ExecutionGraph {
            sources: self.sources,
            results,
        })
    }

    fn build_node(&mut self, idx: NodeIndex) -> Result<(), ExecutionError> {
        let plan = self.plan;
        let node = plan.node(idx);
        let id = DatasetId::from_node_id(&node.id);
        match &node.procedure {
            ProcedureSpec::Yield { name } => {
                let parent = self.producers(idx);
                let handle = self.add_result(name, &parent)?;
                self.handles.insert(idx, handle);
            }
            ProcedureSpec::Stage(spec) => {
                let downstream = self.downstream(idx, id)?;
                let args = StageArgs {
                    id,
                    downstream,
                    accumulation_mode: self.options.accumulation_mode,
                    trigger: node
                        .trigger
                        .clone()
                        .unwrap_or_else(|| self.options.default_trigger.clone()),
                    cancel: self.ctx.cancel.clone(),
                    alloc: Arc::clone(&self.ctx.alloc),
                };
                let stage = create_stage(spec, args, self.registry)?;
                let parents = self.producers(idx);
                self.handles
                    .insert(idx, TransformationHandle::new(node.id.clone(), &parents, stage));
            }
            ProcedureSpec::Source(spec) => {
                let downstream = self.downstream(idx, id)?;
                let output = PassthroughDataset::with_transformations(id, downstream);
                let source: Box<dyn Source> = match spec {
                    SourceSpec::Static {
                        tables,
                        emit_watermarks,
                    } => Box::new(StaticSource::new(output, tables.clone(), *emit_watermarks)),
                    SourceSpec::External { kind, config } => self
                        .registry
                        .create_source(kind, config, SourceArgs { id, output })?,
                };
                self.sources.push(source);
            }
        }
        log::trace!("built plan node {} ({})", node.id, node.procedure.kind());
        Ok(())
    }

    /// Handles of every consumer of `idx`'s output; terminal nodes feed the
    /// default result
    fn downstream(
        &mut self,
        idx: NodeIndex,
        id: DatasetId,
    ) -> Result<TransformationSet, ExecutionError> {
        let mut set = TransformationSet::new();
        self.collect_downstream(idx, &mut set)?;
        if set.is_empty() {
            set.add(self.add_result(DEFAULT_RESULT_NAME, &[id])?);
        }
        Ok(set)
    }

    fn collect_downstream(
        &self,
        idx: NodeIndex,
        set: &mut TransformationSet,
    ) -> Result<(), ExecutionError> {
        for child in self.plan.successors(idx) {
            let handle = self.handles.get(&child).ok_or_else(|| {
                ExecutionError::InvalidPlan(format!(
                    "node {} was not built before its parent",
                    self.plan.node(child).id
                ))
            })?;
            set.add(handle.clone());
            // A yield publishes its parent's output and passes it on unchanged.
            if matches!(self.plan.node(child).procedure, ProcedureSpec::Yield { .. }) {
                self.collect_downstream(child, set)?;
            }
        }
        Ok(())
    }

    /// Dataset ids that feed `idx`, looking through yields
    fn producers(&self, idx: NodeIndex) -> Vec<DatasetId> {
        let mut ids = Vec::new();
        for parent in self.plan.predecessors(idx) {
            let node = self.plan.node(parent);
            if matches!(node.procedure, ProcedureSpec::Yield { .. }) {
                ids.extend(self.producers(parent));
            } else {
                ids.push(DatasetId::from_node_id(&node.id));
            }
        }
        ids.sort();
        ids.dedup();
        ids
    }

    fn add_result(
        &mut self,
        name: &str,
        parents: &[DatasetId],
    ) -> Result<TransformationHandle, ExecutionError> {
        if !self.result_names.insert(name.to_string()) {
            return Err(ExecutionError::InvalidPlan(format!(
                "tried to produce more than one result with the name {}",
                name
            )));
        }
        let (sender, result) = QueryResult::channel(name);
        let sink = ResultSink::new(name, sender, self.errors.clone());
        self.results.push(result);
        Ok(TransformationHandle::new(
            format!("result {}", name),
            parents,
            Box::new(sink),
        ))
    }
}

/// Program that executes a physical plan
pub struct PlanProgram {
    plan: PlanSpec,
    registry: Arc<ProcedureRegistry>,
    options: ExecutionOptions,
}

impl PlanProgram {
    /// Create a program, validating the plan's shape up front
    pub fn new(
        plan: PlanSpec,
        registry: Arc<ProcedureRegistry>,
        options: ExecutionOptions,
    ) -> Result<Self, ExecutionError> {
        plan.validate()?;
        Ok(Self {
            plan,
            registry,
            options,
        })
    }

    pub fn plan(&self) -> &PlanSpec {
        &self.plan
    }
}

#[async_trait]
impl Program for PlanProgram {
    async fn start(
        &self,
        cancel: CancellationToken,
        alloc: Arc<Allocator>,
    ) -> Result<Box<dyn RunningQuery>, ExecutionError> {
        let started = Instant::now();
        let ctx = ExecutionContext::new(cancel.child_token(), alloc);
        let errors = ErrorSlot::new();

        let graph = GraphBuilder {
            plan: &self.plan,
            registry: &self.registry,
            options: &self.options,
            ctx: &ctx,
            errors: &errors,
            handles: HashMap::new(),
            result_names: HashSet::new(),
            results: Vec::new(),
            sources: Vec::new(),
        }
        .build()?;

        let mut stats = Statistics {
            plan_duration: started.elapsed(),
            ..Default::default()
        };
        stats
            .metadata
            .insert("sources".to_string(), serde_json::json!(graph.sources.len()));
        stats.metadata.insert(
            "results".to_string(),
            serde_json::json!(graph.results.iter().map(|r| r.name()).collect::<Vec<_>>()),
        );

        let (tx, rx) = mpsc::channel(graph.results.len().max(1));
        for result in graph.results {
            tx.try_send(result).map_err(|_| {
                ExecutionError::RuntimeError("result channel rejected a result".to_string())
            })?;
        }

        log::debug!(
            "starting plan with {} nodes and {} sources",
            self.plan.len(),
            graph.sources.len()
        );
        let driver = tokio::spawn(drive(graph.sources, ctx.clone(), errors.clone(), tx));

        Ok(Box::new(PlanRunningQuery {
            results: Some(rx),
            cancel: ctx.cancel,
            errors,
            driver: Some(driver),
            stats,
        }))
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Ok(order) = self.plan.topological_order() {
            for idx in order {
                let node = self.plan.node(idx);
                parts.push(format!("{}:{}", node.id, node.procedure.kind()));
            }
        }
        format!("plan[{}]", parts.join(", "))
    }
}

/// Run every source to completion, then close the result stream
async fn drive(
    sources: Vec<Box<dyn Source>>,
    ctx: ExecutionContext,
    errors: ErrorSlot,
    results: mpsc::Sender<QueryResult>,
) {
    let mut tasks = JoinSet::new();
    for source in sources {
        let ctx = ctx.clone();
        tasks.spawn(async move { source.run(ctx).await });
    }
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                log::error!("source task panicked: {}", message);
                errors.set(ExecutionError::Panic(message));
                ctx.cancel.cancel();
            }
            Err(e) => log::debug!("source task ended early: {}", e),
        }
    }
    drop(results);
}

/// Text of a panic payload
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct PlanRunningQuery {
    results: Option<mpsc::Receiver<QueryResult>>,
    cancel: CancellationToken,
    errors: ErrorSlot,
    driver: Option<JoinHandle<()>>,
    stats: Statistics,
}

impl RunningQuery for PlanRunningQuery {
    fn results(&mut self) -> Option<mpsc::Receiver<QueryResult>> {
        self.results.take()
    }

    fn done(&mut self) {
        self.cancel.cancel();
        // Aborting the driver drops its JoinSet, which aborts every source
        // task that ignored the token.
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn statistics(&self) -> Statistics {
        self.stats.clone()
    }

    fn err(&self) -> Option<ExecutionError> {
        self.errors.get()
    }
}
