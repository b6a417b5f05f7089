// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Caller context for query submission

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Cancellation scope and labels of a query submission
///
/// Canceling the context's token cancels every query submitted with it.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
    labels: HashMap<String, String>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Values for `keys` in order; missing labels become empty strings
    pub fn label_values(&self, keys: &[String]) -> Vec<String> {
        keys.iter()
            .map(|k| self.label(k).unwrap_or_default().to_string())
            .collect()
    }
}
