// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Mutable column-list table builder

use super::chunk::TableChunk;
use super::column::Column;
use super::group_key::GroupKey;
use super::reader::ColReader;
use super::types::{ColMeta, Time, Value};
use crate::execute::error::ExecutionError;
use crate::memory::Allocator;
use std::sync::Arc;

/// Accumulates rows for one group key and materializes them as chunks
///
/// Columns may be appended to independently; `level_columns` pads the short
/// ones with nulls. Materializing always levels first.
#[derive(Debug)]
pub struct ColListTableBuilder {
    key: GroupKey,
    cols: Vec<ColMeta>,
    columns: Vec<Column>,
    alloc: Arc<Allocator>,
}

impl ColListTableBuilder {
    pub fn new(key: GroupKey, alloc: Arc<Allocator>) -> Self {
        Self {
            key,
            cols: Vec::new(),
            columns: Vec::new(),
            alloc,
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn n_cols(&self) -> usize {
        self.cols.len()
    }

    /// Row count, the length of the longest column
    pub fn n_rows(&self) -> usize {
        self.columns.iter().map(Column::len).max().unwrap_or(0)
    }

    pub fn col_index(&self, label: &str) -> Option<usize> {
        self.cols.iter().position(|c| c.label == label)
    }

    /// Add an empty column padded to the current row count
    pub fn add_col(&mut self, meta: ColMeta) -> Result<usize, ExecutionError> {
        if self.col_index(&meta.label).is_some() {
            return Err(ExecutionError::RuntimeError(format!(
                "table builder already has a column labeled {}",
                meta.label
            )));
        }
        let column = Column::nulls(meta.col_type, self.n_rows());
        self.cols.push(meta);
        self.columns.push(column);
        Ok(self.cols.len() - 1)
    }

    /// Add every column of `reader` this builder does not have yet
    pub fn add_cols_from(&mut self, reader: &dyn ColReader) -> Result<(), ExecutionError> {
        for meta in reader.cols() {
            match self.col_index(&meta.label) {
                Some(j) if self.cols[j].col_type != meta.col_type => {
                    return Err(ExecutionError::TypeError(format!(
                        "column {} has type {} in the builder but {} in the table",
                        meta.label, self.cols[j].col_type, meta.col_type
                    )))
                }
                Some(_) => {}
                None => {
                    self.add_col(meta.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Add the key columns and return their indices
    pub fn add_key_cols(&mut self) -> Result<Vec<usize>, ExecutionError> {
        let key_cols: Vec<ColMeta> = self.key.cols().to_vec();
        key_cols
            .into_iter()
            .map(|meta| match self.col_index(&meta.label) {
                Some(j) => Ok(j),
                None => self.add_col(meta),
            })
            .collect()
    }

    pub fn append_value(&mut self, j: usize, value: &Value) -> Result<(), ExecutionError> {
        self.column_mut(j)?.push_value(value)
    }

    pub fn append_nil(&mut self, j: usize) -> Result<(), ExecutionError> {
        self.column_mut(j)?.grow(1);
        Ok(())
    }

    pub fn append_bool(&mut self, j: usize, v: bool) -> Result<(), ExecutionError> {
        self.append_value(j, &Value::Bool(v))
    }

    pub fn append_int(&mut self, j: usize, v: i64) -> Result<(), ExecutionError> {
        self.append_value(j, &Value::Int(v))
    }

    pub fn append_uint(&mut self, j: usize, v: u64) -> Result<(), ExecutionError> {
        self.append_value(j, &Value::UInt(v))
    }

    pub fn append_float(&mut self, j: usize, v: f64) -> Result<(), ExecutionError> {
        self.append_value(j, &Value::Float(v))
    }

    pub fn append_string(&mut self, j: usize, v: &str) -> Result<(), ExecutionError> {
        self.append_value(j, &Value::String(v.to_string()))
    }

    pub fn append_time(&mut self, j: usize, v: Time) -> Result<(), ExecutionError> {
        self.append_value(j, &Value::Time(v))
    }

    /// Append a row of key values to the key columns
    pub fn append_key_values(&mut self) -> Result<(), ExecutionError> {
        let key = self.key.clone();
        for (meta, value) in key.cols().iter().zip(key.values()) {
            let j = self.col_index(&meta.label).ok_or_else(|| {
                ExecutionError::RuntimeError(format!(
                    "table builder is missing key column {}",
                    meta.label
                ))
            })?;
            self.append_value(j, value)?;
        }
        Ok(())
    }

    /// Append every row of `reader`, matching columns by label
    ///
    /// Columns the builder lacks are added; builder columns the table lacks
    /// get nulls. The result is leveled.
    pub fn append_table(&mut self, reader: &dyn ColReader) -> Result<(), ExecutionError> {
        self.add_cols_from(reader)?;
        self.level_columns();
        let n = reader.len();
        for (meta, column) in self.cols.iter().zip(self.columns.iter_mut()) {
            match reader.col_index(&meta.label) {
                Some(j) => column.extend_from(reader.column(j))?,
                None => column.grow(n),
            }
        }
        Ok(())
    }

    /// Pad every column with nulls up to the row count
    pub fn level_columns(&mut self) {
        let n = self.n_rows();
        for column in &mut self.columns {
            let missing = n - column.len();
            if missing > 0 {
                column.grow(missing);
            }
        }
    }

    /// Stable sort of the rows by the labeled columns
    pub fn sort(&mut self, labels: &[String], desc: bool) -> Result<(), ExecutionError> {
        self.level_columns();
        let keys: Vec<usize> = labels
            .iter()
            .map(|label| {
                self.col_index(label).ok_or_else(|| {
                    ExecutionError::RuntimeError(format!("sort column {} not found", label))
                })
            })
            .collect::<Result<_, _>>()?;

        let mut order: Vec<usize> = (0..self.n_rows()).collect();
        order.sort_by(|&a, &b| {
            let ord = keys
                .iter()
                .map(|&j| self.columns[j].compare_rows(a, b))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal);
            if desc {
                ord.reverse()
            } else {
                ord
            }
        });
        for column in &mut self.columns {
            *column = column.take(&order);
        }
        Ok(())
    }

    /// Drop all rows, keeping the schema
    pub fn clear_data(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
    }

    /// Materialize the current rows as a chunk, keeping them in the builder
    pub fn table(&mut self) -> Result<TableChunk, ExecutionError> {
        self.level_columns();
        TableChunk::new(
            self.key.clone(),
            self.cols.clone(),
            self.columns.clone(),
            Arc::clone(&self.alloc),
        )
    }

    /// Materialize the current rows as a chunk, leaving the builder empty
    pub fn take_table(&mut self) -> Result<TableChunk, ExecutionError> {
        self.level_columns();
        let columns = self
            .columns
            .iter_mut()
            .map(|c| {
                let col_type = c.col_type();
                std::mem::replace(c, Column::new(col_type))
            })
            .collect();
        TableChunk::new(
            self.key.clone(),
            self.cols.clone(),
            columns,
            Arc::clone(&self.alloc),
        )
    }

    fn column_mut(&mut self, j: usize) -> Result<&mut Column, ExecutionError> {
        let n = self.columns.len();
        self.columns.get_mut(j).ok_or_else(|| {
            ExecutionError::RuntimeError(format!(
                "column index {} out of range for builder with {} columns",
                j, n
            ))
        })
    }
}
