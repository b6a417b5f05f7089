// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-group-key builder cache

use super::error::ExecutionError;
use super::trigger::{TableContext, Trigger, TriggerContext, TriggerSpec};
use crate::memory::Allocator;
use crate::table::{ColListTableBuilder, GroupKey, TableChunk, Time};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

struct TableState {
    builder: ColListTableBuilder,
    trigger: Trigger,
    emitted_rows: usize,
}

impl TableState {
    fn pending_rows(&self) -> usize {
        self.builder.n_rows().saturating_sub(self.emitted_rows)
    }
}

/// Outcome of evaluating one key's trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub key: GroupKey,
    pub triggered: bool,
    pub finished: bool,
}

/// Maps group keys to their in-progress builders
///
/// At most one builder exists per key. Once a key is expired it is
/// finalized: asking for its builder again is a protocol violation until the
/// key is retracted. Iteration follows group key order.
pub struct TableBuilderCache {
    tables: BTreeMap<GroupKey, TableState>,
    finalized: BTreeSet<GroupKey>,
    trigger_spec: TriggerSpec,
    alloc: Arc<Allocator>,
}

impl TableBuilderCache {
    pub fn new(alloc: Arc<Allocator>) -> Self {
        Self {
            tables: BTreeMap::new(),
            finalized: BTreeSet::new(),
            trigger_spec: TriggerSpec::default(),
            alloc,
        }
    }

    /// Trigger applied to builders created from now on
    pub fn set_trigger_spec(&mut self, spec: TriggerSpec) {
        self.trigger_spec = spec;
    }

    pub fn trigger_spec(&self) -> &TriggerSpec {
        &self.trigger_spec
    }

    /// Builder for `key`, created on first use
    ///
    /// # Returns
    /// - `Ok((builder, created))`; `created` is true when a new builder was
    ///   made for this call
    /// - `Err(ExecutionError::ProtocolViolation)` if the key was finalized
    pub fn table_builder(
        &mut self,
        key: &GroupKey,
    ) -> Result<(&mut ColListTableBuilder, bool), ExecutionError> {
        if self.finalized.contains(key) {
            return Err(ExecutionError::ProtocolViolation(format!(
                "table with key {} was already finalized",
                key
            )));
        }
        match self.tables.entry(key.clone()) {
            Entry::Occupied(e) => Ok((&mut e.into_mut().builder, false)),
            Entry::Vacant(e) => {
                let state = TableState {
                    builder: ColListTableBuilder::new(key.clone(), Arc::clone(&self.alloc)),
                    trigger: Trigger::new(&self.trigger_spec),
                    emitted_rows: 0,
                };
                Ok((&mut e.insert(state).builder, true))
            }
        }
    }

    /// Existing builder for `key`, without creating one
    pub fn lookup(&self, key: &GroupKey) -> Option<&ColListTableBuilder> {
        self.tables.get(key).map(|s| &s.builder)
    }

    /// Materialize the rows buffered for `key`
    pub fn table(&mut self, key: &GroupKey) -> Result<TableChunk, ExecutionError> {
        match self.tables.get_mut(key) {
            Some(state) => state.builder.table(),
            None => Err(ExecutionError::TableNotFound(key.to_string())),
        }
    }

    /// Drop the rows buffered for `key`, keeping its builder and trigger
    pub fn clear_data(&mut self, key: &GroupKey) {
        if let Some(state) = self.tables.get_mut(key) {
            state.builder.clear_data();
            state.emitted_rows = 0;
        }
    }

    /// Record that every row currently buffered for `key` was emitted
    pub fn mark_emitted(&mut self, key: &GroupKey) {
        if let Some(state) = self.tables.get_mut(key) {
            state.emitted_rows = state.builder.n_rows();
        }
    }

    /// Rows buffered for `key` since its last emission
    pub fn pending_rows(&self, key: &GroupKey) -> usize {
        self.tables.get(key).map_or(0, TableState::pending_rows)
    }

    /// Abandon `key` without emitting it; a later builder request starts over
    pub fn discard_table(&mut self, key: &GroupKey) -> bool {
        self.tables.remove(key).is_some()
    }

    /// Remove `key` and finalize it
    pub fn expire_table(&mut self, key: &GroupKey) -> bool {
        self.finalized.insert(key.clone());
        self.tables.remove(key).is_some()
    }

    /// Remove `key` and lift its finalization
    pub fn retract_table(&mut self, key: &GroupKey) -> bool {
        self.finalized.remove(key);
        self.tables.remove(key).is_some()
    }

    pub fn is_finalized(&self, key: &GroupKey) -> bool {
        self.finalized.contains(key)
    }

    /// Keys with a live builder, in group key order
    pub fn keys(&self) -> Vec<GroupKey> {
        self.tables.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Visit every live key in order
    pub fn for_each<F: FnMut(&GroupKey)>(&self, mut f: F) {
        for key in self.tables.keys() {
            f(key);
        }
    }

    /// Visit every live key with its trigger and table context
    pub fn for_each_with_context<F>(&mut self, mut f: F)
    where
        F: FnMut(&GroupKey, &mut Trigger, &TableContext),
    {
        for (key, state) in self.tables.iter_mut() {
            let table = TableContext {
                key: key.clone(),
                count: state.pending_rows(),
            };
            f(key, &mut state.trigger, &table);
        }
    }

    /// Evaluate every live key's trigger against the given clocks
    pub fn evaluate_triggers(&mut self, watermark: Time, processing_time: Time) -> Vec<TriggerOutcome> {
        let mut outcomes = Vec::new();
        self.for_each_with_context(|key, trigger, table| {
            let c = TriggerContext {
                table: table.clone(),
                watermark,
                current_processing_time: processing_time,
            };
            let triggered = trigger.triggered(&c);
            outcomes.push(TriggerOutcome {
                key: key.clone(),
                triggered,
                finished: trigger.finished(),
            });
        });
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColMeta, ColReader, ColType, GroupKeyBuilder};

    fn key(v: &str) -> GroupKey {
        GroupKeyBuilder::new().add_string("t", v).build().unwrap()
    }

    fn cache() -> TableBuilderCache {
        TableBuilderCache::new(Arc::new(Allocator::unlimited()))
    }

    #[test]
    fn test_one_builder_per_key() {
        let mut c = cache();
        {
            let (b, created) = c.table_builder(&key("a")).unwrap();
            assert!(created);
            let j = b.add_col(ColMeta::new("_value", ColType::Int)).unwrap();
            b.append_int(j, 1).unwrap();
        }
        let (b, created) = c.table_builder(&key("a")).unwrap();
        assert!(!created);
        assert_eq!(b.n_rows(), 1);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_expired_key_is_finalized() {
        let mut c = cache();
        c.table_builder(&key("a")).unwrap();
        assert!(c.expire_table(&key("a")));
        assert!(c.is_finalized(&key("a")));
        assert!(matches!(
            c.table_builder(&key("a")),
            Err(ExecutionError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_retract_lifts_finalization() {
        let mut c = cache();
        c.table_builder(&key("a")).unwrap();
        c.expire_table(&key("a"));
        c.retract_table(&key("a"));
        let (_, created) = c.table_builder(&key("a")).unwrap();
        assert!(created);
    }

    #[test]
    fn test_discard_does_not_finalize() {
        let mut c = cache();
        c.table_builder(&key("a")).unwrap();
        assert!(c.discard_table(&key("a")));
        assert!(!c.is_finalized(&key("a")));
        assert!(c.lookup(&key("a")).is_none());
        assert!(!c.discard_table(&key("a")));
    }

    #[test]
    fn test_sorted_iteration() {
        let mut c = cache();
        for v in ["c", "a", "b"] {
            c.table_builder(&key(v)).unwrap();
        }
        let mut seen = Vec::new();
        c.for_each(|k| seen.push(k.to_string()));
        assert_eq!(seen, vec!["{t=a}", "{t=b}", "{t=c}"]);
    }

    #[test]
    fn test_table_of_unknown_key() {
        let mut c = cache();
        assert!(matches!(
            c.table(&key("zz")),
            Err(ExecutionError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_evaluate_count_trigger() {
        let mut c = cache();
        c.set_trigger_spec(TriggerSpec::AfterAtLeastCount { count: 2 });
        {
            let (b, _) = c.table_builder(&key("a")).unwrap();
            let j = b.add_col(ColMeta::new("_value", ColType::Int)).unwrap();
            b.append_int(j, 1).unwrap();
            b.append_int(j, 2).unwrap();
        }
        c.table_builder(&key("b")).unwrap();

        let outcomes = c.evaluate_triggers(Time::MIN, Time::MIN);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].triggered && outcomes[0].finished);
        assert!(!outcomes[1].triggered);

        let chunk = c.table(&key("a")).unwrap();
        assert_eq!(chunk.len(), 2);
    }

    #[test]
    fn test_count_excludes_emitted_rows() {
        let mut c = cache();
        c.set_trigger_spec(TriggerSpec::repeated(TriggerSpec::AfterAtLeastCount {
            count: 2,
        }));
        let append = |c: &mut TableBuilderCache, values: &[i64]| {
            let (b, created) = c.table_builder(&key("a")).unwrap();
            if created {
                b.add_col(ColMeta::new("_value", ColType::Int)).unwrap();
            }
            for &v in values {
                b.append_int(0, v).unwrap();
            }
        };
        append(&mut c, &[1, 2]);
        assert!(c.evaluate_triggers(Time::MIN, Time::MIN)[0].triggered);
        c.mark_emitted(&key("a"));
        assert_eq!(c.pending_rows(&key("a")), 0);
        assert!(!c.evaluate_triggers(Time(1), Time::MIN)[0].triggered);

        append(&mut c, &[3]);
        assert_eq!(c.pending_rows(&key("a")), 1);
        assert!(!c.evaluate_triggers(Time(2), Time::MIN)[0].triggered);
        append(&mut c, &[4]);
        assert!(c.evaluate_triggers(Time(3), Time::MIN)[0].triggered);
        assert_eq!(c.lookup(&key("a")).unwrap().n_rows(), 4);

        c.clear_data(&key("a"));
        assert_eq!(c.pending_rows(&key("a")), 0);
    }
}
