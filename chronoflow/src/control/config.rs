// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Controller configuration

use serde::{Deserialize, Serialize};

/// Admission and resource settings for a [`Controller`](super::Controller)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Maximum number of queries executing at once
    pub concurrency_quota: usize,

    /// Maximum number of queries waiting for an execution slot
    pub queue_size: usize,

    /// Per-query memory ceiling in bytes (`None` for no ceiling)
    pub memory_bytes_quota_per_query: Option<usize>,

    /// Capacity of each query's result channel
    pub result_buffer_size: usize,

    /// Query context labels copied onto every metric
    pub metric_label_keys: Vec<String>,

    /// Log compiled programs at info level
    pub verbose: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrency_quota: 10,
            queue_size: 100,
            memory_bytes_quota_per_query: None,
            result_buffer_size: 1,
            metric_label_keys: Vec::new(),
            verbose: false,
        }
    }
}

impl ControllerConfig {
    /// Effectively unbounded admission (tests, embedded use)
    pub fn unlimited() -> Self {
        Self {
            concurrency_quota: tokio::sync::Semaphore::MAX_PERMITS,
            queue_size: usize::MAX,
            ..Default::default()
        }
    }

    /// Small footprint for memory-constrained hosts
    pub fn constrained() -> Self {
        Self {
            concurrency_quota: 2,
            queue_size: 10,
            memory_bytes_quota_per_query: Some(64 * 1024 * 1024), // 64MB
            ..Default::default()
        }
    }

    pub fn with_concurrency_quota(mut self, quota: usize) -> Self {
        self.concurrency_quota = quota;
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn with_memory_quota(mut self, bytes: usize) -> Self {
        self.memory_bytes_quota_per_query = Some(bytes);
        self
    }

    pub fn with_metric_label_keys(mut self, keys: Vec<String>) -> Self {
        self.metric_label_keys = keys;
        self
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("invalid controller config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency_quota == 0 {
            return Err("concurrency_quota must be greater than 0".to_string());
        }
        if self.concurrency_quota > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(format!(
                "concurrency_quota must not exceed {}",
                tokio::sync::Semaphore::MAX_PERMITS
            ));
        }
        if self.result_buffer_size == 0 {
            return Err("result_buffer_size must be greater than 0".to_string());
        }
        if self.memory_bytes_quota_per_query == Some(0) {
            return Err("memory_bytes_quota_per_query must be greater than 0".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for key in &self.metric_label_keys {
            if key.is_empty() {
                return Err("metric label keys must not be empty".to_string());
            }
            if key == "result" || key == "compiler_type" {
                return Err(format!("metric label key {} is reserved", key));
            }
            if !seen.insert(key) {
                return Err(format!("duplicate metric label key {}", key));
            }
        }
        Ok(())
    }
}
