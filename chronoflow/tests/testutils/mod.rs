//! Test utilities for chronoflow integration tests
//!
//! - `mock_program`: scripted compilers, programs and running queries for
//!   exercising the controller without a real plan
//! - `fixtures`: small tables and plans for dataflow tests

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_program;

/// Route `log` output through the test harness; safe to call repeatedly
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}
