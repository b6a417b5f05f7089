// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Reference-counted table buffers
//!
//! A [`TableChunk`] is an immutable, allocator-accounted batch of rows that
//! all share one group key. Ownership is explicit: [`TableChunk::retain`]
//! adds a holder and [`TableChunk::release`] gives one up. The bytes are
//! returned to the query's allocator when the last holder releases.
//! `release` consumes the handle, so releasing a chunk twice through the
//! same handle does not compile.

use super::column::Column;
use super::group_key::GroupKey;
use super::reader::ColReader;
use super::types::ColMeta;
use crate::execute::error::ExecutionError;
use crate::memory::Allocator;
use std::fmt;
use std::sync::Arc;

/// Immutable batch of rows sharing a group key
pub struct TableChunk {
    buffer: Arc<ChunkBuffer>,
}

struct ChunkBuffer {
    key: GroupKey,
    cols: Vec<ColMeta>,
    columns: Vec<Column>,
    len: usize,
    size_bytes: usize,
    alloc: Arc<Allocator>,
}

impl Drop for ChunkBuffer {
    fn drop(&mut self) {
        self.alloc.free(self.size_bytes);
    }
}

impl TableChunk {
    /// Create a chunk and account its bytes against `alloc`
    ///
    /// Every column must match its metadata type and all columns must have
    /// the same length.
    pub fn new(
        key: GroupKey,
        cols: Vec<ColMeta>,
        columns: Vec<Column>,
        alloc: Arc<Allocator>,
    ) -> Result<Self, ExecutionError> {
        if cols.len() != columns.len() {
            return Err(ExecutionError::TypeError(format!(
                "table has {} column definitions but {} columns",
                cols.len(),
                columns.len()
            )));
        }
        let len = columns.first().map_or(0, Column::len);
        for (meta, column) in cols.iter().zip(&columns) {
            if meta.col_type != column.col_type() {
                return Err(ExecutionError::TypeError(format!(
                    "column {} is declared {} but holds {} data",
                    meta.label,
                    meta.col_type,
                    column.col_type()
                )));
            }
            if column.len() != len {
                return Err(ExecutionError::TypeError(format!(
                    "column {} has {} rows, expected {}",
                    meta.label,
                    column.len(),
                    len
                )));
            }
        }

        let size_bytes = columns.iter().map(Column::size_bytes).sum();
        alloc.allocate(size_bytes)?;

        Ok(Self {
            buffer: Arc::new(ChunkBuffer {
                key,
                cols,
                columns,
                len,
                size_bytes,
                alloc,
            }),
        })
    }

    /// Add a holder; the returned handle must itself be released
    pub fn retain(&self) -> TableChunk {
        TableChunk {
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Give up this holder's reference
    pub fn release(self) {
        drop(self);
    }

    /// Number of live holders
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.buffer)
    }

    /// Bytes accounted for this buffer
    pub fn size_bytes(&self) -> usize {
        self.buffer.size_bytes
    }

    pub fn columns(&self) -> &[Column] {
        &self.buffer.columns
    }
}

impl ColReader for TableChunk {
    fn key(&self) -> &GroupKey {
        &self.buffer.key
    }

    fn cols(&self) -> &[ColMeta] {
        &self.buffer.cols
    }

    fn len(&self) -> usize {
        self.buffer.len
    }

    fn column(&self, j: usize) -> &Column {
        &self.buffer.columns[j]
    }
}

impl fmt::Debug for TableChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableChunk")
            .field("key", &self.buffer.key)
            .field("cols", &self.buffer.cols)
            .field("len", &self.buffer.len)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Concatenate chunks of one group key into a single chunk
///
/// The inputs are held for the duration of the copy and released when this
/// returns, on success and on error alike. Columns are matched by label;
/// a column missing from some inputs is filled with nulls.
pub fn concat_chunks(
    chunks: Vec<TableChunk>,
    alloc: &Arc<Allocator>,
) -> Result<TableChunk, ExecutionError> {
    let first = chunks.first().ok_or_else(|| {
        ExecutionError::RuntimeError("cannot concatenate an empty list of tables".to_string())
    })?;
    let key = first.key().clone();

    let mut cols: Vec<ColMeta> = Vec::new();
    for chunk in &chunks {
        if chunk.key() != &key {
            return Err(ExecutionError::ProtocolViolation(format!(
                "cannot concatenate table with key {} into table with key {}",
                chunk.key(),
                key
            )));
        }
        for meta in chunk.cols() {
            match cols.iter().find(|c| c.label == meta.label) {
                Some(existing) if existing.col_type != meta.col_type => {
                    return Err(ExecutionError::TypeError(format!(
                        "column {} has conflicting types {} and {}",
                        meta.label, existing.col_type, meta.col_type
                    )))
                }
                Some(_) => {}
                None => cols.push(meta.clone()),
            }
        }
    }

    let total: usize = chunks.iter().map(ColReader::len).sum();
    let mut columns: Vec<Column> = cols
        .iter()
        .map(|c| Column::with_capacity(c.col_type, total))
        .collect();
    for chunk in &chunks {
        for (meta, column) in cols.iter().zip(columns.iter_mut()) {
            match chunk.col_index(&meta.label) {
                Some(j) => column.extend_from(chunk.column(j))?,
                None => column.grow(chunk.len()),
            }
        }
    }

    TableChunk::new(key, cols, columns, Arc::clone(alloc))
}
