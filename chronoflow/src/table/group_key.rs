// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Group keys: the identity of a grouped table

use super::types::{Bounds, ColMeta, ColType, Time, Value, DEFAULT_START_LABEL, DEFAULT_STOP_LABEL};
use crate::execute::error::ExecutionError;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Ordered list of `(column, value)` pairs identifying one partition of data
///
/// Two keys are equal iff their column lists and values are equal. Keys are
/// totally ordered: lexicographically by column metadata first, then by
/// values. Cloning is cheap; the pairs are shared.
#[derive(Clone)]
pub struct GroupKey {
    inner: Arc<KeyData>,
}

struct KeyData {
    cols: Vec<ColMeta>,
    values: Vec<Value>,
}

impl GroupKey {
    /// Create a key, checking that every value fits its column
    pub fn new(cols: Vec<ColMeta>, values: Vec<Value>) -> Result<Self, ExecutionError> {
        if cols.len() != values.len() {
            return Err(ExecutionError::TypeError(format!(
                "group key has {} columns but {} values",
                cols.len(),
                values.len()
            )));
        }
        for (col, value) in cols.iter().zip(values.iter()) {
            if !value.fits(col.col_type) {
                return Err(ExecutionError::TypeError(format!(
                    "group key column {} has type {} but value {} was given",
                    col.label, col.col_type, value
                )));
            }
        }
        Ok(Self {
            inner: Arc::new(KeyData { cols, values }),
        })
    }

    /// The key of the single ungrouped table
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(KeyData {
                cols: Vec::new(),
                values: Vec::new(),
            }),
        }
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.inner.cols
    }

    pub fn values(&self) -> &[Value] {
        &self.inner.values
    }

    pub fn len(&self) -> usize {
        self.inner.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cols.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.inner.cols.iter().position(|c| c.label == label)
    }

    pub fn has_col(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    pub fn label_value(&self, label: &str) -> Option<&Value> {
        self.index_of(label).map(|j| &self.inner.values[j])
    }

    /// Window bounds from the `_start`/`_stop` columns, when both are
    /// present time values
    pub fn bounds(&self) -> Option<Bounds> {
        let start = self.label_value(DEFAULT_START_LABEL)?.as_time()?;
        let stop = self.label_value(DEFAULT_STOP_LABEL)?.as_time()?;
        Some(Bounds::new(start, stop))
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.cols == other.inner.cols && self.inner.values == other.inner.values)
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.cols.hash(state);
        self.inner.values.hash(state);
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner
            .cols
            .cmp(&other.inner.cols)
            .then_with(|| self.inner.values.cmp(&other.inner.values))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (j, (col, value)) in self.inner.cols.iter().zip(&self.inner.values).enumerate() {
            if j > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", col.label, value)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupKey{}", self)
    }
}

/// Incremental constructor for group keys
#[derive(Debug, Default)]
pub struct GroupKeyBuilder {
    cols: Vec<ColMeta>,
    values: Vec<Value>,
}

impl GroupKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(mut self, label: &str, col_type: ColType, value: Value) -> Self {
        self.cols.push(ColMeta::new(label, col_type));
        self.values.push(value);
        self
    }

    pub fn add_string(self, label: &str, value: &str) -> Self {
        self.add_value(label, ColType::String, Value::String(value.to_string()))
    }

    pub fn add_int(self, label: &str, value: i64) -> Self {
        self.add_value(label, ColType::Int, Value::Int(value))
    }

    pub fn add_time(self, label: &str, value: Time) -> Self {
        self.add_value(label, ColType::Time, Value::Time(value))
    }

    /// Add `_start` and `_stop` window columns
    pub fn add_bounds(self, bounds: Bounds) -> Self {
        self.add_time(DEFAULT_START_LABEL, bounds.start)
            .add_time(DEFAULT_STOP_LABEL, bounds.stop)
    }

    pub fn build(self) -> Result<GroupKey, ExecutionError> {
        GroupKey::new(self.cols, self.values)
    }
}
