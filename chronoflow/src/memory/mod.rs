// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Memory accounting for running queries

pub mod allocator;

pub use allocator::{Allocator, MemoryStats};
