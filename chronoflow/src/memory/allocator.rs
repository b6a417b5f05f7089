// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-query memory accounting
//!
//! Tracks cumulative and peak byte usage of the column buffers a query
//! allocates and rejects an allocation when the configured ceiling would be
//! exceeded. The allocator is exclusively owned by one query for the lifetime
//! of its execution and shared by reference (`Arc`) with every buffer that
//! must return its bytes on release.

use crate::execute::error::ExecutionError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory accountant for a single query
///
/// # Usage
/// ```ignore
/// let alloc = Allocator::with_limit(100 * 1024 * 1024); // 100MB ceiling
///
/// alloc.allocate(1024)?;
/// assert_eq!(alloc.allocated(), 1024);
///
/// alloc.free(1024);
/// assert_eq!(alloc.max_allocated(), 1024);
/// ```
pub struct Allocator {
    /// Maximum allowed bytes, `None` for no ceiling
    limit: Option<usize>,

    /// Currently allocated bytes
    allocated: AtomicUsize,

    /// Peak allocated bytes
    max: AtomicUsize,
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("limit", &self.limit)
            .field("allocated", &self.allocated.load(Ordering::SeqCst))
            .field("max", &self.max.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl Allocator {
    /// Create an allocator with an optional ceiling in bytes
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            allocated: AtomicUsize::new(0),
            max: AtomicUsize::new(0),
        }
    }

    /// Create an allocator that fails requests beyond `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self::new(Some(limit))
    }

    /// Create an allocator without a ceiling (tests, admin queries)
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Account for `bytes` newly allocated bytes
    ///
    /// # Returns
    /// - `Ok(())` if the allocation fits under the ceiling
    /// - `Err(ExecutionError::MemoryLimitExceeded)` otherwise; nothing is
    ///   accounted in that case
    pub fn allocate(&self, bytes: usize) -> Result<(), ExecutionError> {
        let current = self.allocated.fetch_add(bytes, Ordering::SeqCst);
        let new_total = current.saturating_add(bytes);

        if let Some(limit) = self.limit {
            if new_total > limit {
                // Rollback allocation
                self.allocated.fetch_sub(bytes, Ordering::SeqCst);

                return Err(ExecutionError::MemoryLimitExceeded {
                    limit,
                    requested: new_total,
                });
            }
        }

        self.max.fetch_max(new_total, Ordering::SeqCst);
        Ok(())
    }

    /// Return `bytes` to the allocator
    ///
    /// Freeing more than is outstanding is a bookkeeping bug; the counter
    /// saturates at zero and the mismatch is logged.
    pub fn free(&self, bytes: usize) {
        let result = self
            .allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
        if let Ok(previous) = result {
            if previous < bytes {
                log::error!(
                    "allocator freed {} bytes with only {} outstanding",
                    bytes,
                    previous
                );
                debug_assert!(previous >= bytes, "allocator free underflow");
            }
        }
    }

    /// Currently allocated bytes
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    /// Peak allocated bytes over the allocator's lifetime
    pub fn max_allocated(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    /// Configured ceiling, if any
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Snapshot of the allocator counters
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            limit: self.limit,
            allocated: self.allocated(),
            peak: self.max_allocated(),
        }
    }
}

/// Memory usage statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStats {
    /// Ceiling in bytes
    pub limit: Option<usize>,

    /// Currently allocated bytes
    pub allocated: usize,

    /// Peak allocated bytes
    pub peak: usize,
}

impl MemoryStats {
    /// Format as human-readable string
    pub fn format_human_readable(&self) -> String {
        match self.limit {
            Some(limit) => format!(
                "Memory: {}/{} ({:.1}%), Peak: {}",
                Self::format_bytes(self.allocated),
                Self::format_bytes(limit),
                (self.allocated as f64 / limit.max(1) as f64) * 100.0,
                Self::format_bytes(self.peak)
            ),
            None => format!(
                "Memory: {} (unlimited), Peak: {}",
                Self::format_bytes(self.allocated),
                Self::format_bytes(self.peak)
            ),
        }
    }

    fn format_bytes(bytes: usize) -> String {
        const KB: usize = 1024;
        const MB: usize = KB * 1024;
        const GB: usize = MB * 1024;

        if bytes >= GB {
            format!("{:.2}GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2}MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2}KB", bytes as f64 / KB as f64)
        } else {
            format!("{}B", bytes)
        }
    }
}
