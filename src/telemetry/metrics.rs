//! Inference latency and scheduler counters

use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept by [`LatencyProfiler`] (10 seconds at 30 inferences/s)
const MAX_SAMPLES: usize = 300;

/// Inference latency statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyStats {
    /// Average latency in milliseconds
    pub avg_ms: f64,
    /// Minimum latency in milliseconds
    pub min_ms: f64,
    /// Maximum latency in milliseconds
    pub max_ms: f64,
    /// 50th percentile (median) latency
    pub p50_ms: f64,
    /// 95th percentile latency
    pub p95_ms: f64,
    /// 99th percentile latency
    pub p99_ms: f64,
    /// Number of samples in the statistics
    pub sample_count: usize,
}

/// Rolling window of inference durations
#[derive(Debug, Clone)]
pub struct LatencyProfiler {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl Default for LatencyProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyProfiler {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SAMPLES)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record one completed inference
    pub fn record(&mut self, elapsed: Duration) {
        self.samples.push_back(elapsed);
        if self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    pub fn stats(&self) -> LatencyStats {
        if self.samples.is_empty() {
            return LatencyStats::default();
        }

        let mut times: Vec<f64> = self
            .samples
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = times.iter().sum();
        LatencyStats {
            avg_ms: sum / times.len() as f64,
            min_ms: times.first().copied().unwrap_or(0.0),
            max_ms: times.last().copied().unwrap_or(0.0),
            p50_ms: percentile(&times, 0.50),
            p95_ms: percentile(&times, 0.95),
            p99_ms: percentile(&times, 0.99),
            sample_count: times.len(),
        }
    }

    pub fn last_ms(&self) -> f64 {
        self.samples
            .back()
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Calculate percentile from sorted array
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx]
}

/// Snapshot of the frame scheduler's counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    /// Ticks received while running
    pub ticks: u64,
    /// Frames handed to the pipeline
    pub submitted: u64,
    /// Ticks skipped because an inference was in flight
    pub dropped: u64,
    /// Ticks where the source had no frame
    pub no_frame: u64,
    /// Results presented to the display
    pub displayed: u64,
    /// Results that arrived after a stop and were thrown away
    pub discarded: u64,
    /// Submissions that failed
    pub failed: u64,
    /// Inference latency over the recent window
    pub latency: LatencyStats,
}

impl SchedulerStats {
    /// Share of running ticks that were dropped for backpressure
    pub fn drop_ratio(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.dropped as f64 / self.ticks as f64
        }
    }
}
