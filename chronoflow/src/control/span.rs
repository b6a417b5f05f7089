// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Timed lifecycle phases

use prometheus::{Histogram, IntGauge};
use std::time::{Duration, Instant};

/// Measures one phase of a query's lifecycle
///
/// The phase's gauge is incremented on start and decremented exactly once,
/// when the span finishes or is dropped; the duration is observed into the
/// phase histogram at the same time.
pub struct PhaseSpan {
    start: Instant,
    gauge: IntGauge,
    histogram: Histogram,
    elapsed: Option<Duration>,
}

impl PhaseSpan {
    pub fn start(gauge: IntGauge, histogram: Histogram) -> Self {
        gauge.inc();
        Self {
            start: Instant::now(),
            gauge,
            histogram,
            elapsed: None,
        }
    }

    /// Stop the span; later calls return the same duration
    pub fn finish(&mut self) -> Duration {
        if let Some(elapsed) = self.elapsed {
            return elapsed;
        }
        let elapsed = self.start.elapsed();
        self.gauge.dec();
        self.histogram.observe(elapsed.as_secs_f64());
        self.elapsed = Some(elapsed);
        elapsed
    }
}

impl Drop for PhaseSpan {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::HistogramOpts;

    #[test]
    fn test_gauge_balanced() {
        let gauge = IntGauge::new("g", "g").unwrap();
        let histogram = Histogram::with_opts(HistogramOpts::new("h", "h")).unwrap();

        let mut span = PhaseSpan::start(gauge.clone(), histogram.clone());
        assert_eq!(gauge.get(), 1);
        let first = span.finish();
        assert_eq!(span.finish(), first);
        assert_eq!(gauge.get(), 0);
        drop(span);
        assert_eq!(gauge.get(), 0);
        assert_eq!(histogram.get_sample_count(), 1);
    }

    #[test]
    fn test_drop_finishes() {
        let gauge = IntGauge::new("g", "g").unwrap();
        let histogram = Histogram::with_opts(HistogramOpts::new("h", "h")).unwrap();
        drop(PhaseSpan::start(gauge.clone(), histogram.clone()));
        assert_eq!(gauge.get(), 0);
        assert_eq!(histogram.get_sample_count(), 1);
    }
}
