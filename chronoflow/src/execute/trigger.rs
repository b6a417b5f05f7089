// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Emission triggers for buffered tables
//!
//! A trigger decides when a dataset materializes a group key's builder and
//! sends it downstream. `TriggerSpec` is the declarative, cloneable form
//! stored in plans; `Trigger` is the per-key runtime state created from it.

use crate::table::{GroupKey, Time};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Declarative trigger description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Fire once, when the dataset finishes
    #[default]
    OnFinish,
    /// Fire once the watermark passes the key's window stop plus lateness
    AfterWatermark { allowed_lateness: Duration },
    /// Fire once `duration` of processing time elapsed since the key was
    /// first seen
    AfterProcessingTime { duration: Duration },
    /// Fire once the key holds at least `count` rows
    AfterAtLeastCount { count: usize },
    /// Re-arm the inner trigger every time it fires
    Repeated(Box<TriggerSpec>),
    /// Fire on `main`; fire and finish on `finally`
    OrFinally {
        main: Box<TriggerSpec>,
        finally: Box<TriggerSpec>,
    },
}

impl TriggerSpec {
    pub fn repeated(inner: TriggerSpec) -> Self {
        TriggerSpec::Repeated(Box::new(inner))
    }

    pub fn or_finally(main: TriggerSpec, finally: TriggerSpec) -> Self {
        TriggerSpec::OrFinally {
            main: Box::new(main),
            finally: Box::new(finally),
        }
    }
}

/// What a trigger knows about the table it guards
#[derive(Debug, Clone)]
pub struct TableContext {
    pub key: GroupKey,
    /// Rows buffered since the key was last emitted
    pub count: usize,
}

/// Inputs to a trigger evaluation
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub table: TableContext,
    pub watermark: Time,
    pub current_processing_time: Time,
}

/// Runtime trigger state for one group key
#[derive(Debug, Clone)]
pub enum Trigger {
    OnFinish,
    AfterWatermark {
        allowed_lateness: Duration,
        finished: bool,
    },
    AfterProcessingTime {
        duration: Duration,
        start: Option<Time>,
        finished: bool,
    },
    AfterAtLeastCount {
        count: usize,
        finished: bool,
    },
    Repeated {
        spec: TriggerSpec,
        current: Box<Trigger>,
    },
    OrFinally {
        main: Box<Trigger>,
        finally: Box<Trigger>,
        finished: bool,
    },
}

impl Trigger {
    pub fn new(spec: &TriggerSpec) -> Self {
        match spec {
            TriggerSpec::OnFinish => Trigger::OnFinish,
            TriggerSpec::AfterWatermark { allowed_lateness } => Trigger::AfterWatermark {
                allowed_lateness: *allowed_lateness,
                finished: false,
            },
            TriggerSpec::AfterProcessingTime { duration } => Trigger::AfterProcessingTime {
                duration: *duration,
                start: None,
                finished: false,
            },
            TriggerSpec::AfterAtLeastCount { count } => Trigger::AfterAtLeastCount {
                count: *count,
                finished: false,
            },
            TriggerSpec::Repeated(inner) => Trigger::Repeated {
                spec: (**inner).clone(),
                current: Box::new(Trigger::new(inner)),
            },
            TriggerSpec::OrFinally { main, finally } => Trigger::OrFinally {
                main: Box::new(Trigger::new(main)),
                finally: Box::new(Trigger::new(finally)),
                finished: false,
            },
        }
    }

    /// Evaluate the trigger; one-shot triggers latch `finished` when they fire
    pub fn triggered(&mut self, c: &TriggerContext) -> bool {
        match self {
            Trigger::OnFinish => false,
            Trigger::AfterWatermark {
                allowed_lateness,
                finished,
            } => {
                let Some(bounds) = c.table.key.bounds() else {
                    return false;
                };
                let fired = c.watermark >= bounds.stop.add(*allowed_lateness);
                if fired {
                    *finished = true;
                }
                fired
            }
            Trigger::AfterProcessingTime {
                duration,
                start,
                finished,
            } => {
                let started = *start.get_or_insert(c.current_processing_time);
                let fired = c.current_processing_time >= started.add(*duration);
                if fired {
                    *finished = true;
                }
                fired
            }
            Trigger::AfterAtLeastCount { count, finished } => {
                let fired = c.table.count >= *count;
                if fired {
                    *finished = true;
                }
                fired
            }
            Trigger::Repeated { spec, current } => {
                let fired = current.triggered(c);
                if fired {
                    **current = Trigger::new(spec);
                }
                fired
            }
            Trigger::OrFinally {
                main,
                finally,
                finished,
            } => {
                if finally.triggered(c) {
                    *finished = true;
                    return true;
                }
                main.triggered(c)
            }
        }
    }

    /// Whether the trigger will never fire again
    pub fn finished(&self) -> bool {
        match self {
            Trigger::OnFinish => false,
            Trigger::AfterWatermark { finished, .. }
            | Trigger::AfterProcessingTime { finished, .. }
            | Trigger::AfterAtLeastCount { finished, .. }
            | Trigger::OrFinally { finished, .. } => *finished,
            Trigger::Repeated { .. } => false,
        }
    }
}
