// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Aggregate stage: one output row per group key

use crate::execute::dataset::Dataset;
use crate::execute::error::ExecutionError;
use crate::execute::transformation::{DatasetId, Transformation};
use crate::plan::AggregateKind;
use crate::table::{ColMeta, ColReader, ColType, Column, GroupKey, TableChunk, Time, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
struct AggregateState {
    col_type: ColType,
    count: i64,
    int_sum: i64,
    uint_sum: u64,
    float_sum: f64,
}

impl AggregateState {
    fn new(col_type: ColType) -> Self {
        Self {
            col_type,
            count: 0,
            int_sum: 0,
            uint_sum: 0,
            float_sum: 0.0,
        }
    }

    fn add(&mut self, column: &Column) {
        match column {
            Column::Int(v) => {
                for x in v.iter().flatten() {
                    self.int_sum = self.int_sum.wrapping_add(*x);
                    self.float_sum += *x as f64;
                    self.count += 1;
                }
            }
            Column::UInt(v) => {
                for x in v.iter().flatten() {
                    self.uint_sum = self.uint_sum.wrapping_add(*x);
                    self.float_sum += *x as f64;
                    self.count += 1;
                }
            }
            Column::Float(v) => {
                for x in v.iter().flatten() {
                    self.float_sum += *x;
                    self.count += 1;
                }
            }
            other => {
                self.count += (0..other.len()).filter(|&i| !other.is_null(i)).count() as i64;
            }
        }
    }

    fn result(&self, kind: AggregateKind) -> Value {
        match kind {
            AggregateKind::Count => Value::Int(self.count),
            _ if self.count == 0 => Value::Null,
            AggregateKind::Sum => match self.col_type {
                ColType::Int => Value::Int(self.int_sum),
                ColType::UInt => Value::UInt(self.uint_sum),
                _ => Value::Float(self.float_sum),
            },
            AggregateKind::Mean => Value::Float(self.float_sum / self.count as f64),
        }
    }
}

fn output_type(kind: AggregateKind, input: ColType) -> ColType {
    match kind {
        AggregateKind::Count => ColType::Int,
        AggregateKind::Sum => input,
        AggregateKind::Mean => ColType::Float,
    }
}

/// Reduces each group key's values of one column to a single row
///
/// The output table carries the key columns plus the aggregated column.
/// Keys whose window has closed under the watermark are written out early
/// and accept no further input until retracted; the rest are written when
/// input completes.
pub struct AggregateTransformation {
    dataset: Dataset,
    kind: AggregateKind,
    column: String,
    states: BTreeMap<GroupKey, AggregateState>,
    closed: BTreeSet<GroupKey>,
}

impl AggregateTransformation {
    pub fn new(dataset: Dataset, kind: AggregateKind, column: impl Into<String>) -> Self {
        Self {
            dataset,
            kind,
            column: column.into(),
            states: BTreeMap::new(),
            closed: BTreeSet::new(),
        }
    }

    fn write_row(&mut self, key: &GroupKey, state: &AggregateState) -> Result<(), ExecutionError> {
        let meta = ColMeta::new(self.column.clone(), output_type(self.kind, state.col_type));
        let value = state.result(self.kind);
        let (builder, created) = self.dataset.table_builder(key)?;
        if created {
            builder.add_key_cols()?;
            builder.add_col(meta)?;
        }
        let j = builder.col_index(&self.column).ok_or_else(|| {
            ExecutionError::RuntimeError(format!("aggregate column {} missing", self.column))
        })?;
        builder.append_key_values()?;
        builder.append_value(j, &value)?;
        builder.level_columns();
        Ok(())
    }
}

impl Transformation for AggregateTransformation {
    fn retract_table(&mut self, _id: DatasetId, key: &GroupKey) -> Result<(), ExecutionError> {
        self.states.remove(key);
        self.closed.remove(key);
        self.dataset.retract_table(key)
    }

    fn process(&mut self, _id: DatasetId, chunk: &TableChunk) -> Result<(), ExecutionError> {
        self.dataset.ensure_open(chunk.key())?;
        if self.closed.contains(chunk.key()) {
            return Err(ExecutionError::ProtocolViolation(format!(
                "table with key {} was already aggregated",
                chunk.key()
            )));
        }
        let j = chunk.col_index(&self.column).ok_or_else(|| {
            ExecutionError::RuntimeError(format!(
                "column {} not found in table {}",
                self.column,
                chunk.key()
            ))
        })?;
        let col_type = chunk.cols()[j].col_type;
        if self.kind != AggregateKind::Count
            && !matches!(col_type, ColType::Int | ColType::UInt | ColType::Float)
        {
            return Err(ExecutionError::TypeError(format!(
                "cannot aggregate {} column {}",
                col_type, self.column
            )));
        }
        let state = self
            .states
            .entry(chunk.key().clone())
            .or_insert_with(|| AggregateState::new(col_type));
        if state.col_type != col_type {
            return Err(ExecutionError::TypeError(format!(
                "column {} changed type from {} to {}",
                self.column, state.col_type, col_type
            )));
        }
        state.add(chunk.column(j));
        Ok(())
    }

    fn update_watermark(&mut self, _id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        let closed: Vec<GroupKey> = self
            .states
            .keys()
            .filter(|k| k.bounds().map_or(false, |b| b.stop <= time))
            .cloned()
            .collect();
        for key in closed {
            if let Some(state) = self.states.remove(&key) {
                self.write_row(&key, &state)?;
            }
            self.closed.insert(key);
        }
        self.dataset.update_watermark(time)
    }

    fn update_processing_time(&mut self, _id: DatasetId, time: Time) -> Result<(), ExecutionError> {
        self.dataset.update_processing_time(time)
    }

    fn finish(&mut self, _id: DatasetId, err: Option<ExecutionError>) {
        let states = std::mem::take(&mut self.states);
        let mut err = err;
        if err.is_none() {
            for (key, state) in &states {
                if let Err(e) = self.write_row(key, state) {
                    err = Some(e);
                    break;
                }
            }
        }
        self.dataset.finish(err);
    }
}
