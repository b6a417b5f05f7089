// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Named query results and the sink stage that feeds them

use super::error::ExecutionError;
use super::transformation::{DatasetId, Transformation};
use crate::table::{ColReader, GroupKey, TableChunk, Time};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Name given to results of terminal nodes without an explicit yield
pub const DEFAULT_RESULT_NAME: &str = "_result";

type TableItem = Result<TableChunk, ExecutionError>;

/// Records the first error raised anywhere in a running program
#[derive(Debug, Clone, Default)]
pub struct ErrorSlot {
    inner: Arc<Mutex<Option<ExecutionError>>>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `err` unless an error was already recorded
    pub fn set(&self, err: ExecutionError) {
        let mut slot = self.inner.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn get(&self) -> Option<ExecutionError> {
        self.inner.lock().clone()
    }
}

/// One named output of a query: a stream of tables
pub struct QueryResult {
    name: String,
    tables: TableStream,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult").field("name", &self.name).finish()
    }
}

impl QueryResult {
    /// Create a result and the sender that feeds it
    pub fn channel(name: impl Into<String>) -> (TableSender, QueryResult) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            TableSender { tx },
            QueryResult {
                name: name.into(),
                tables: TableStream { rx },
            },
        )
    }

    /// A result whose tables are already known
    pub fn from_tables(name: impl Into<String>, tables: Vec<TableChunk>) -> QueryResult {
        let (sender, result) = Self::channel(name);
        for table in tables {
            sender.send(table);
        }
        result
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&mut self) -> &mut TableStream {
        &mut self.tables
    }

    pub fn into_tables(self) -> TableStream {
        self.tables
    }
}

/// Producer side of a [`QueryResult`]
#[derive(Debug, Clone)]
pub struct TableSender {
    tx: mpsc::UnboundedSender<TableItem>,
}

impl TableSender {
    /// Hand a table to the consumer; returns false if the consumer is gone
    pub fn send(&self, table: TableChunk) -> bool {
        self.tx.send(Ok(table)).is_ok()
    }

    /// Report a terminal error to the consumer
    pub fn fail(&self, err: ExecutionError) -> bool {
        self.tx.send(Err(err)).is_ok()
    }
}

/// Consumer side of a [`QueryResult`]
pub struct TableStream {
    rx: mpsc::UnboundedReceiver<TableItem>,
}

impl TableStream {
    /// Next table, an error, or `None` once the producer is done
    pub async fn next(&mut self) -> Option<Result<TableChunk, ExecutionError>> {
        self.rx.recv().await
    }

    /// Visit every table until the stream ends
    ///
    /// Each table is released after `f` returns. Stops at the first error
    /// from the stream or from `f`.
    pub async fn for_each<F>(&mut self, mut f: F) -> Result<(), ExecutionError>
    where
        F: FnMut(&TableChunk) -> Result<(), ExecutionError>,
    {
        while let Some(item) = self.rx.recv().await {
            let table = item?;
            let outcome = f(&table);
            table.release();
            outcome?;
        }
        Ok(())
    }

    /// Drain the stream, releasing every table
    pub async fn drain(&mut self) -> Result<usize, ExecutionError> {
        let mut count = 0;
        self.for_each(|_| {
            count += 1;
            Ok(())
        })
        .await?;
        Ok(count)
    }
}

/// Terminal stage that hands tables to a [`QueryResult`]
pub struct ResultSink {
    name: String,
    sender: Option<TableSender>,
    errors: ErrorSlot,
}

impl ResultSink {
    pub fn new(name: impl Into<String>, sender: TableSender, errors: ErrorSlot) -> Self {
        Self {
            name: name.into(),
            sender: Some(sender),
            errors,
        }
    }
}

impl Transformation for ResultSink {
    fn retract_table(&mut self, _id: DatasetId, key: &GroupKey) -> Result<(), ExecutionError> {
        log::debug!(
            "result {} ignoring retraction of already delivered table {}",
            self.name,
            key
        );
        Ok(())
    }

    fn process(&mut self, _id: DatasetId, chunk: &TableChunk) -> Result<(), ExecutionError> {
        if let Some(sender) = &self.sender {
            if !sender.send(chunk.retain()) {
                log::debug!("result {} was abandoned by its consumer", self.name);
                self.sender = None;
            }
        }
        Ok(())
    }

    fn update_watermark(&mut self, _id: DatasetId, _time: Time) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn update_processing_time(&mut self, _id: DatasetId, _time: Time) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn finish(&mut self, _id: DatasetId, err: Option<ExecutionError>) {
        if let Some(err) = err {
            self.errors.set(err.clone());
            if let Some(sender) = &self.sender {
                sender.fail(err);
            }
        }
        self.sender = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Allocator;
    use crate::table::{ColMeta, ColType, Column};

    fn chunk(alloc: &Arc<Allocator>) -> TableChunk {
        TableChunk::new(
            GroupKey::empty(),
            vec![ColMeta::new("_value", ColType::Int)],
            vec![Column::Int(vec![Some(1)])],
            alloc.clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_error_slot_keeps_first() {
        let slot = ErrorSlot::new();
        slot.set(ExecutionError::RuntimeError("first".into()));
        slot.set(ExecutionError::RuntimeError("second".into()));
        assert_eq!(
            slot.get(),
            Some(ExecutionError::RuntimeError("first".into()))
        );
    }

    #[tokio::test]
    async fn test_sink_delivers_and_fails() {
        let alloc = Arc::new(Allocator::unlimited());
        let errors = ErrorSlot::new();
        let (sender, mut result) = QueryResult::channel("_result");
        let mut sink = ResultSink::new("_result", sender, errors.clone());
        let id = DatasetId::from_node_id("src");

        let c = chunk(&alloc);
        sink.process(id, &c).unwrap();
        c.release();
        sink.finish(id, Some(ExecutionError::RuntimeError("boom".into())));

        let first = result.tables().next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        first.release();
        assert!(result.tables().next().await.unwrap().is_err());
        assert!(result.tables().next().await.is_none());
        assert!(errors.get().is_some());
        assert_eq!(alloc.allocated(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_result_drops_tables() {
        let alloc = Arc::new(Allocator::unlimited());
        let (sender, result) = QueryResult::channel("r");
        drop(result);
        let mut sink = ResultSink::new("r", sender, ErrorSlot::new());
        let c = chunk(&alloc);
        sink.process(DatasetId::random(), &c).unwrap();
        c.release();
        assert_eq!(alloc.allocated(), 0);
    }

    #[tokio::test]
    async fn test_drain_counts() {
        let alloc = Arc::new(Allocator::unlimited());
        let mut result = QueryResult::from_tables("r", vec![chunk(&alloc), chunk(&alloc)]);
        assert_eq!(result.name(), "r");
        assert_eq!(result.tables().drain().await.unwrap(), 2);
        assert_eq!(alloc.allocated(), 0);
    }
}
