// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Data sources: the roots of an execution graph

use super::dataset::PassthroughDataset;
use super::error::ExecutionError;
use super::transformation::DatasetId;
use super::transport::TransformationHandle;
use crate::memory::Allocator;
use crate::plan::StaticTable;
use crate::table::{ColListTableBuilder, ColReader, ColType, TableChunk, Time, DEFAULT_TIME_LABEL};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runtime services shared by every node of one execution
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub cancel: CancellationToken,
    pub alloc: Arc<Allocator>,
}

impl ExecutionContext {
    pub fn new(cancel: CancellationToken, alloc: Arc<Allocator>) -> Self {
        Self { cancel, alloc }
    }
}

/// A node that produces tables on its own task
///
/// `run` pushes every table into the source's outputs and finishes them
/// exactly once, with an error if production failed or was canceled.
/// Sources check the cancellation token between emissions.
#[async_trait]
pub trait Source: Send {
    fn id(&self) -> DatasetId;

    fn add_transformation(&mut self, t: TransformationHandle);

    async fn run(self: Box<Self>, ctx: ExecutionContext);
}

/// Source that replays tables known at plan time
pub struct StaticSource {
    output: PassthroughDataset,
    tables: Vec<StaticTable>,
    emit_watermarks: bool,
}

impl StaticSource {
    pub fn new(output: PassthroughDataset, tables: Vec<StaticTable>, emit_watermarks: bool) -> Self {
        Self {
            output,
            tables,
            emit_watermarks,
        }
    }

    fn emit(
        &self,
        table: &StaticTable,
        ctx: &ExecutionContext,
        watermark: &mut Time,
    ) -> Result<(), ExecutionError> {
        let chunk = build_chunk(table, &ctx.alloc)?;
        self.output.process(&chunk)?;
        if self.emit_watermarks {
            if let Some(latest) = max_time(&chunk) {
                if latest > *watermark {
                    *watermark = latest;
                    self.output.update_watermark(latest)?;
                }
            }
            self.output.update_processing_time(Time::now())?;
        }
        chunk.release();
        Ok(())
    }
}

#[async_trait]
impl Source for StaticSource {
    fn id(&self) -> DatasetId {
        self.output.id()
    }

    fn add_transformation(&mut self, t: TransformationHandle) {
        self.output.add_transformation(t);
    }

    async fn run(self: Box<Self>, ctx: ExecutionContext) {
        let mut this = self;
        let tables = std::mem::take(&mut this.tables);
        let mut watermark = Time::MIN;
        let mut err = None;
        for table in &tables {
            if ctx.cancel.is_cancelled() {
                err = Some(ExecutionError::Canceled);
                break;
            }
            if let Err(e) = this.emit(table, &ctx, &mut watermark) {
                err = Some(e);
                break;
            }
            tokio::task::yield_now().await;
        }
        this.output.finish(err);
    }
}

/// Materialize a static table as a chunk
pub fn build_chunk(
    table: &StaticTable,
    alloc: &Arc<Allocator>,
) -> Result<TableChunk, ExecutionError> {
    let mut builder = ColListTableBuilder::new(table.key.clone(), Arc::clone(alloc));
    for meta in &table.cols {
        builder.add_col(meta.clone())?;
    }
    for row in &table.rows {
        if row.len() != table.cols.len() {
            return Err(ExecutionError::TypeError(format!(
                "row has {} values but table {} has {} columns",
                row.len(),
                table.key,
                table.cols.len()
            )));
        }
        for (j, value) in row.iter().enumerate() {
            builder.append_value(j, value)?;
        }
    }
    builder.take_table()
}

fn max_time(chunk: &TableChunk) -> Option<Time> {
    let j = chunk.col_index(DEFAULT_TIME_LABEL)?;
    if chunk.cols()[j].col_type != ColType::Time {
        return None;
    }
    chunk.times(j).iter().flatten().max().copied()
}
