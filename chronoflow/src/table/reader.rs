// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Read-only columnar view of a table

use super::column::Column;
use super::group_key::GroupKey;
use super::types::{ColMeta, ColType, Time, Value};

/// Columnar accessor over a table's rows
///
/// The typed accessors panic when the column at `j` has another type;
/// callers check `cols()[j].col_type` first, the same way they would check
/// an index before slicing.
pub trait ColReader {
    fn key(&self) -> &GroupKey;
    fn cols(&self) -> &[ColMeta];
    fn len(&self) -> usize;
    fn column(&self, j: usize) -> &Column;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn col_index(&self, label: &str) -> Option<usize> {
        self.cols().iter().position(|c| c.label == label)
    }

    fn value(&self, i: usize, j: usize) -> Value {
        self.column(j).value(i)
    }

    fn bools(&self, j: usize) -> &[Option<bool>] {
        match self.column(j) {
            Column::Bool(v) => v,
            other => type_panic(j, ColType::Bool, other),
        }
    }

    fn ints(&self, j: usize) -> &[Option<i64>] {
        match self.column(j) {
            Column::Int(v) => v,
            other => type_panic(j, ColType::Int, other),
        }
    }

    fn uints(&self, j: usize) -> &[Option<u64>] {
        match self.column(j) {
            Column::UInt(v) => v,
            other => type_panic(j, ColType::UInt, other),
        }
    }

    fn floats(&self, j: usize) -> &[Option<f64>] {
        match self.column(j) {
            Column::Float(v) => v,
            other => type_panic(j, ColType::Float, other),
        }
    }

    fn strings(&self, j: usize) -> &[Option<String>] {
        match self.column(j) {
            Column::String(v) => v,
            other => type_panic(j, ColType::String, other),
        }
    }

    fn times(&self, j: usize) -> &[Option<Time>] {
        match self.column(j) {
            Column::Time(v) => v,
            other => type_panic(j, ColType::Time, other),
        }
    }
}

fn type_panic(j: usize, want: ColType, got: &Column) -> ! {
    panic!(
        "column {} has type {}, not {}",
        j,
        got.col_type(),
        want
    )
}
