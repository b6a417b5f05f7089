// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Typed, nullable column storage

use super::types::{ColType, Time, Value};
use crate::execute::error::ExecutionError;
use std::cmp::Ordering;
use std::mem::size_of;

/// One column of data; `None` entries are nulls
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Bool(Vec<Option<bool>>),
    Int(Vec<Option<i64>>),
    UInt(Vec<Option<u64>>),
    Float(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Time(Vec<Option<Time>>),
}

impl Column {
    pub fn new(col_type: ColType) -> Self {
        Self::with_capacity(col_type, 0)
    }

    pub fn with_capacity(col_type: ColType, capacity: usize) -> Self {
        match col_type {
            ColType::Bool => Column::Bool(Vec::with_capacity(capacity)),
            ColType::Int => Column::Int(Vec::with_capacity(capacity)),
            ColType::UInt => Column::UInt(Vec::with_capacity(capacity)),
            ColType::Float => Column::Float(Vec::with_capacity(capacity)),
            ColType::String => Column::String(Vec::with_capacity(capacity)),
            ColType::Time => Column::Time(Vec::with_capacity(capacity)),
        }
    }

    /// A column of `len` nulls
    pub fn nulls(col_type: ColType, len: usize) -> Self {
        let mut col = Self::with_capacity(col_type, len);
        col.grow(len);
        col
    }

    pub fn col_type(&self) -> ColType {
        match self {
            Column::Bool(_) => ColType::Bool,
            Column::Int(_) => ColType::Int,
            Column::UInt(_) => ColType::UInt,
            Column::Float(_) => ColType::Float,
            Column::String(_) => ColType::String,
            Column::Time(_) => ColType::Time,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Bool(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::UInt(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::String(v) => v.len(),
            Column::Time(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at row `i` (`Value::Null` past the end)
    pub fn value(&self, i: usize) -> Value {
        match self {
            Column::Bool(v) => v.get(i).copied().flatten().into(),
            Column::Int(v) => v.get(i).copied().flatten().into(),
            Column::UInt(v) => v.get(i).copied().flatten().into(),
            Column::Float(v) => v.get(i).copied().flatten().into(),
            Column::String(v) => v.get(i).cloned().flatten().into(),
            Column::Time(v) => v.get(i).copied().flatten().into(),
        }
    }

    pub fn is_null(&self, i: usize) -> bool {
        self.value(i).is_null()
    }

    /// Append a value, checking its type
    pub fn push_value(&mut self, value: &Value) -> Result<(), ExecutionError> {
        match (self, value) {
            (col, Value::Null) => {
                col.grow(1);
                Ok(())
            }
            (Column::Bool(v), Value::Bool(x)) => {
                v.push(Some(*x));
                Ok(())
            }
            (Column::Int(v), Value::Int(x)) => {
                v.push(Some(*x));
                Ok(())
            }
            (Column::UInt(v), Value::UInt(x)) => {
                v.push(Some(*x));
                Ok(())
            }
            (Column::Float(v), Value::Float(x)) => {
                v.push(Some(*x));
                Ok(())
            }
            (Column::String(v), Value::String(x)) => {
                v.push(Some(x.clone()));
                Ok(())
            }
            (Column::Time(v), Value::Time(x)) => {
                v.push(Some(*x));
                Ok(())
            }
            (col, value) => Err(ExecutionError::TypeError(format!(
                "cannot append {} value {} to {} column",
                value.col_type().map_or("null", |t| t.as_str()),
                value,
                col.col_type()
            ))),
        }
    }

    /// Append `n` nulls
    pub fn grow(&mut self, n: usize) {
        match self {
            Column::Bool(v) => v.resize(v.len() + n, None),
            Column::Int(v) => v.resize(v.len() + n, None),
            Column::UInt(v) => v.resize(v.len() + n, None),
            Column::Float(v) => v.resize(v.len() + n, None),
            Column::String(v) => v.resize(v.len() + n, None),
            Column::Time(v) => v.resize(v.len() + n, None),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Column::Bool(v) => v.clear(),
            Column::Int(v) => v.clear(),
            Column::UInt(v) => v.clear(),
            Column::Float(v) => v.clear(),
            Column::String(v) => v.clear(),
            Column::Time(v) => v.clear(),
        }
    }

    /// Append every row of `other`, which must have the same type
    pub fn extend_from(&mut self, other: &Column) -> Result<(), ExecutionError> {
        match (self, other) {
            (Column::Bool(a), Column::Bool(b)) => a.extend_from_slice(b),
            (Column::Int(a), Column::Int(b)) => a.extend_from_slice(b),
            (Column::UInt(a), Column::UInt(b)) => a.extend_from_slice(b),
            (Column::Float(a), Column::Float(b)) => a.extend_from_slice(b),
            (Column::String(a), Column::String(b)) => a.extend_from_slice(b),
            (Column::Time(a), Column::Time(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(ExecutionError::TypeError(format!(
                    "cannot append {} column to {} column",
                    b.col_type(),
                    a.col_type()
                )))
            }
        }
        Ok(())
    }

    /// Approximate heap footprint in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            Column::Bool(v) => v.len() * size_of::<Option<bool>>(),
            Column::Int(v) => v.len() * size_of::<Option<i64>>(),
            Column::UInt(v) => v.len() * size_of::<Option<u64>>(),
            Column::Float(v) => v.len() * size_of::<Option<f64>>(),
            Column::String(v) => {
                v.len() * size_of::<Option<String>>()
                    + v.iter().flatten().map(String::len).sum::<usize>()
            }
            Column::Time(v) => v.len() * size_of::<Option<Time>>(),
        }
    }

    /// Compare rows `i` and `j`; nulls sort first
    pub fn compare_rows(&self, i: usize, j: usize) -> Ordering {
        fn cmp<T: PartialOrd>(v: &[Option<T>], i: usize, j: usize) -> Ordering {
            match (&v[i], &v[j]) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            }
        }
        match self {
            Column::Bool(v) => cmp(v, i, j),
            Column::Int(v) => cmp(v, i, j),
            Column::UInt(v) => cmp(v, i, j),
            Column::Float(v) => match (v[i], v[j]) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => cmp(v, i, j),
            },
            Column::String(v) => cmp(v, i, j),
            Column::Time(v) => cmp(v, i, j),
        }
    }

    /// New column with rows in the order given by `indices`
    pub fn take(&self, indices: &[usize]) -> Column {
        fn pick<T: Clone>(v: &[T], indices: &[usize]) -> Vec<T> {
            indices.iter().map(|&i| v[i].clone()).collect()
        }
        match self {
            Column::Bool(v) => Column::Bool(pick(v, indices)),
            Column::Int(v) => Column::Int(pick(v, indices)),
            Column::UInt(v) => Column::UInt(pick(v, indices)),
            Column::Float(v) => Column::Float(pick(v, indices)),
            Column::String(v) => Column::String(pick(v, indices)),
            Column::Time(v) => Column::Time(pick(v, indices)),
        }
    }
}
