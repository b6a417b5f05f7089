// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Grouped columnar tables
//!
//! - `types`: time, bounds, column metadata and cell values
//! - `group_key`: the partition identity of a table
//! - `column`: typed nullable column storage
//! - `chunk`: reference-counted, allocator-accounted row batches
//! - `builder`: mutable column-list builder producing chunks
//! - `reader`: read-only columnar access trait

pub mod builder;
pub mod chunk;
pub mod column;
pub mod group_key;
pub mod reader;
pub mod types;

pub use builder::ColListTableBuilder;
pub use chunk::{concat_chunks, TableChunk};
pub use column::Column;
pub use group_key::{GroupKey, GroupKeyBuilder};
pub use reader::ColReader;
pub use types::{
    Bounds, ColMeta, ColType, Time, Value, DEFAULT_START_LABEL, DEFAULT_STOP_LABEL,
    DEFAULT_TIME_LABEL, DEFAULT_VALUE_LABEL,
};
