// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Physical plans: the DAG of sources, stages and yields a program executes

use crate::execute::error::ExecutionError;
use crate::execute::trigger::TriggerSpec;
use crate::table::{ColMeta, GroupKey, Value};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rows of one grouped table embedded in a plan
#[derive(Debug, Clone)]
pub struct StaticTable {
    pub key: GroupKey,
    pub cols: Vec<ColMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl StaticTable {
    pub fn new(key: GroupKey, cols: Vec<ColMeta>) -> Self {
        Self {
            key,
            cols,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    Count,
    Sum,
    Mean,
}

/// Root node kinds
#[derive(Debug, Clone)]
pub enum SourceSpec {
    /// Tables known at plan time
    Static {
        tables: Vec<StaticTable>,
        emit_watermarks: bool,
    },
    /// Source constructed from the procedure registry
    External {
        kind: String,
        config: serde_json::Value,
    },
}

/// Intermediate node kinds
#[derive(Debug, Clone, PartialEq)]
pub enum StageSpec {
    /// Forward every message unchanged
    Identity,
    /// Merge all parents, grouping by key
    Union,
    /// One row per group key
    Aggregate { kind: AggregateKind, column: String },
    /// Sort every table's rows by the given columns
    Sort { columns: Vec<String>, desc: bool },
    /// Stage constructed from the procedure registry
    External {
        kind: String,
        config: serde_json::Value,
    },
}

/// What a plan node does
#[derive(Debug, Clone)]
pub enum ProcedureSpec {
    Source(SourceSpec),
    Stage(StageSpec),
    /// Publish the parent's output under `name`
    Yield { name: String },
}

impl ProcedureSpec {
    pub fn kind(&self) -> &str {
        match self {
            ProcedureSpec::Source(SourceSpec::Static { .. }) => "static",
            ProcedureSpec::Source(SourceSpec::External { kind, .. }) => kind,
            ProcedureSpec::Stage(StageSpec::Identity) => "identity",
            ProcedureSpec::Stage(StageSpec::Union) => "union",
            ProcedureSpec::Stage(StageSpec::Aggregate { .. }) => "aggregate",
            ProcedureSpec::Stage(StageSpec::Sort { .. }) => "sort",
            ProcedureSpec::Stage(StageSpec::External { kind, .. }) => kind,
            ProcedureSpec::Yield { .. } => "yield",
        }
    }
}

/// One node of a plan
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub id: String,
    pub procedure: ProcedureSpec,
    pub trigger: Option<TriggerSpec>,
}

/// Directed acyclic graph of plan nodes; edges point downstream
#[derive(Debug, Clone, Default)]
pub struct PlanSpec {
    graph: DiGraph<PlanNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl PlanSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        id: impl Into<String>,
        procedure: ProcedureSpec,
    ) -> Result<NodeIndex, ExecutionError> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(ExecutionError::InvalidPlan(format!(
                "duplicate plan node id {}",
                id
            )));
        }
        let idx = self.graph.add_node(PlanNode {
            id: id.clone(),
            procedure,
            trigger: None,
        });
        self.index.insert(id, idx);
        Ok(idx)
    }

    /// Set the trigger of a stage node
    pub fn set_trigger(&mut self, id: &str, trigger: TriggerSpec) -> Result<(), ExecutionError> {
        let idx = self.lookup(id)?;
        self.graph[idx].trigger = Some(trigger);
        Ok(())
    }

    /// Route the output of `from` into `to`
    pub fn connect(&mut self, from: &str, to: &str) -> Result<(), ExecutionError> {
        let a = self.lookup(from)?;
        let b = self.lookup(to)?;
        self.graph.update_edge(a, b, ());
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<NodeIndex, ExecutionError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| ExecutionError::InvalidPlan(format!("unknown plan node {}", id)))
    }

    pub fn node(&self, idx: NodeIndex) -> &PlanNode {
        &self.graph[idx]
    }

    pub fn node_by_id(&self, id: &str) -> Option<&PlanNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Parents of `idx`, in node insertion order
    pub fn predecessors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut nodes: Vec<_> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        nodes.sort();
        nodes
    }

    /// Children of `idx`, in node insertion order
    pub fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut nodes: Vec<_> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        nodes.sort();
        nodes
    }

    /// Nodes ordered so every parent precedes its children
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>, ExecutionError> {
        toposort(&self.graph, None).map_err(|cycle| {
            ExecutionError::InvalidPlan(format!(
                "plan has a cycle through node {}",
                self.graph[cycle.node_id()].id
            ))
        })
    }

    /// Check the plan's shape
    ///
    /// The graph must be acyclic and non-empty; sources have no parents,
    /// stages have at least one, and yields have exactly one that is not
    /// itself a yield.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.is_empty() {
            return Err(ExecutionError::InvalidPlan("plan has no nodes".to_string()));
        }
        self.topological_order()?;
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let parents = self.predecessors(idx);
            match &node.procedure {
                ProcedureSpec::Source(_) if !parents.is_empty() => {
                    return Err(ExecutionError::InvalidPlan(format!(
                        "source {} cannot have inputs",
                        node.id
                    )))
                }
                ProcedureSpec::Stage(_) if parents.is_empty() => {
                    return Err(ExecutionError::InvalidPlan(format!(
                        "stage {} has no inputs",
                        node.id
                    )))
                }
                ProcedureSpec::Yield { .. } => {
                    if parents.len() != 1 {
                        return Err(ExecutionError::InvalidPlan(format!(
                            "yield {} must have exactly one input, found {}",
                            node.id,
                            parents.len()
                        )));
                    }
                    if matches!(self.graph[parents[0]].procedure, ProcedureSpec::Yield { .. }) {
                        return Err(ExecutionError::InvalidPlan(format!(
                            "yield {} cannot follow another yield",
                            node.id
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
