// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a query
///
/// ```text
/// Created -> Compiling -> Queueing -> Executing -> Finished
///     \__________\____________\___________\-----> Errored | Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryState {
    Created,
    Compiling,
    Queueing,
    Executing,
    Errored,
    Finished,
    Canceled,
}

impl QueryState {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Errored | QueryState::Finished | QueryState::Canceled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: QueryState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            QueryState::Errored | QueryState::Canceled => true,
            QueryState::Compiling => *self == QueryState::Created,
            QueryState::Queueing => *self == QueryState::Compiling,
            QueryState::Executing => *self == QueryState::Queueing,
            QueryState::Finished => *self == QueryState::Executing,
            QueryState::Created => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Created => "created",
            QueryState::Compiling => "compiling",
            QueryState::Queueing => "queueing",
            QueryState::Executing => "executing",
            QueryState::Errored => "errored",
            QueryState::Finished => "finished",
            QueryState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
