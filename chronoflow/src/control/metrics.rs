// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Prometheus metrics for query admission and lifecycle phases
//!
//! Each controller owns its own [`Registry`] so several controllers can live
//! in one process. Every metric is labeled with the configured query
//! context label keys; compile metrics add `compiler_type` and the request
//! counter adds `result`.

use super::error::ControlError;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

const NAMESPACE: &str = "chronoflow";
const SUBSYSTEM: &str = "qc";

/// Outcome label values of the request counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestResult {
    Success,
    CompileError,
    QueueError,
    RuntimeError,
}

impl RequestResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestResult::Success => "success",
            RequestResult::CompileError => "compile_error",
            RequestResult::QueueError => "queue_error",
            RequestResult::RuntimeError => "runtime_error",
        }
    }
}

/// Lifecycle phases that are timed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    All,
    Compiling,
    Queueing,
    Executing,
}

/// Gauge and histogram pair for one phase
pub struct PhaseMetrics {
    pub active: IntGaugeVec,
    pub duration: HistogramVec,
}

impl PhaseMetrics {
    fn new(name: &str, help: &str, labels: &[&str], registry: &Registry) -> Result<Self, ControlError> {
        let active = IntGaugeVec::new(
            Opts::new(format!("{}_active", name), format!("Number of queries {}", help))
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            labels,
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{}_duration_seconds", name),
                format!("Seconds spent {}", help),
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM)
            .buckets(prometheus::exponential_buckets(1e-3, 5.0, 7)?),
            labels,
        )?;
        registry.register(Box::new(active.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self { active, duration })
    }
}

/// Metrics owned by one controller
pub struct ControllerMetrics {
    registry: Registry,
    label_keys: Vec<String>,
    requests: IntCounterVec,
    all: PhaseMetrics,
    compiling: PhaseMetrics,
    queueing: PhaseMetrics,
    executing: PhaseMetrics,
}

impl ControllerMetrics {
    pub fn new(label_keys: &[String]) -> Result<Self, ControlError> {
        let registry = Registry::new();
        let keys: Vec<&str> = label_keys.iter().map(String::as_str).collect();

        let mut request_labels = keys.clone();
        request_labels.push("result");
        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Count of query requests by admission result")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
            &request_labels,
        )?;
        registry.register(Box::new(requests.clone()))?;

        let mut compile_labels = keys.clone();
        compile_labels.push("compiler_type");

        Ok(Self {
            all: PhaseMetrics::new("all", "in all states", &keys, &registry)?,
            compiling: PhaseMetrics::new("compiling", "compiling", &compile_labels, &registry)?,
            queueing: PhaseMetrics::new("queueing", "queueing", &keys, &registry)?,
            executing: PhaseMetrics::new("executing", "executing", &keys, &registry)?,
            requests,
            label_keys: label_keys.to_vec(),
            registry,
        })
    }

    /// Registry to expose through an HTTP handler or to gather in tests
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    pub fn record_request(&self, label_values: &[String], result: RequestResult) {
        let mut values: Vec<&str> = label_values.iter().map(String::as_str).collect();
        values.push(result.as_str());
        self.requests.with_label_values(&values).inc();
    }

    /// Gauge and histogram of `phase` for the given label values
    pub fn phase(
        &self,
        phase: Phase,
        label_values: &[String],
        compiler_type: &str,
    ) -> (IntGauge, Histogram) {
        let mut values: Vec<&str> = label_values.iter().map(String::as_str).collect();
        let metrics = match phase {
            Phase::All => &self.all,
            Phase::Compiling => {
                values.push(compiler_type);
                &self.compiling
            }
            Phase::Queueing => &self.queueing,
            Phase::Executing => &self.executing,
        };
        (
            metrics.active.with_label_values(&values),
            metrics.duration.with_label_values(&values),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counter() {
        let metrics = ControllerMetrics::new(&["org".to_string()]).unwrap();
        metrics.record_request(&["acme".to_string()], RequestResult::Success);
        metrics.record_request(&["acme".to_string()], RequestResult::Success);
        metrics.record_request(&["acme".to_string()], RequestResult::CompileError);

        let families = metrics.registry().gather();
        let requests = families
            .iter()
            .find(|f| f.get_name() == "chronoflow_qc_requests_total")
            .unwrap();
        let total: f64 = requests
            .get_metric()
            .iter()
            .map(|m| m.get_counter().get_value())
            .sum();
        assert_eq!(total, 3.0);
    }

    #[test]
    fn test_compiling_phase_has_compiler_label() {
        let metrics = ControllerMetrics::new(&[]).unwrap();
        let (gauge, histogram) = metrics.phase(Phase::Compiling, &[], "plan");
        gauge.inc();
        histogram.observe(0.01);

        let families = metrics.registry().gather();
        let active = families
            .iter()
            .find(|f| f.get_name() == "chronoflow_qc_compiling_active")
            .unwrap();
        let labels = active.get_metric()[0].get_label();
        assert_eq!(labels[0].get_name(), "compiler_type");
        assert_eq!(labels[0].get_value(), "plan");
    }

    #[test]
    fn test_independent_registries() {
        assert!(ControllerMetrics::new(&[]).is_ok());
        assert!(ControllerMetrics::new(&[]).is_ok());
    }
}
