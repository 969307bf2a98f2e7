//! Counters and timings for the orchestration primitives
//!
//! Every gate, batch and processor reports into [`global_metrics`]. Timings keep
//! a bounded window of recent samples per name so long-lived processes do not
//! grow without limit.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metric names recorded by this crate.
pub mod names {
    pub const GATE_WAIT: &str = "gate.wait";
    pub const GATE_FAILED: &str = "gate.failed";
    pub const BATCH_SUCCEEDED: &str = "batch.succeeded";
    pub const BATCH_FAILED: &str = "batch.failed";
    pub const BATCH_SKIPPED: &str = "batch.skipped";
    pub const SINK_MERGED: &str = "sink.merged";
    pub const SINK_UNCHANGED: &str = "sink.unchanged";
    pub const SEQUENTIAL_RUN: &str = "sequential.run";
    pub const SEQUENTIAL_COMPLETED: &str = "sequential.completed";
    pub const PRIORITIZED_RUN: &str = "prioritized.run";
    pub const PRIORITIZED_COMPLETED: &str = "prioritized.completed";
}

/// Samples kept per timing name.
const MAX_SAMPLES: usize = 1024;

/// Counter and timing collector
pub struct OrchestrationMetrics {
    counters: DashMap<String, AtomicU64>,
    timings: RwLock<HashMap<String, VecDeque<Duration>>>,
    start_time: Instant,
}

impl OrchestrationMetrics {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            timings: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a timing sample, evicting the oldest once the window is full
    pub fn record_timing(&self, name: &str, duration: Duration) {
        let mut timings = self.timings.write();
        match timings.get_mut(name) {
            Some(samples) => {
                if samples.len() == MAX_SAMPLES {
                    samples.pop_front();
                }
                samples.push_back(duration);
            }
            None => {
                timings.insert(name.to_string(), VecDeque::from([duration]));
            }
        }
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn get_timing_stats(&self, name: &str) -> Option<TimingStats> {
        let timings = self.timings.read();
        timings.get(name).map(|samples| {
            let samples: Vec<Duration> = samples.iter().copied().collect();
            TimingStats::from_durations(&samples)
        })
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn reset(&self) {
        self.counters.clear();
        self.timings.write().clear();
    }

    pub fn summary(&self) -> MetricsSummary {
        let timings = self
            .timings
            .read()
            .iter()
            .map(|(name, samples)| {
                let samples: Vec<Duration> = samples.iter().copied().collect();
                (name.clone(), TimingStats::from_durations(&samples))
            })
            .collect();

        let counters = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSummary {
            uptime: self.uptime(),
            timings,
            counters,
        }
    }
}

impl Default for OrchestrationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics over the retained timing window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingStats {
    pub count: usize,
    pub total: Duration,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl TimingStats {
    fn from_durations(durations: &[Duration]) -> Self {
        if durations.is_empty() {
            return Self {
                count: 0,
                total: Duration::ZERO,
                mean: Duration::ZERO,
                min: Duration::ZERO,
                max: Duration::ZERO,
                p50: Duration::ZERO,
                p95: Duration::ZERO,
                p99: Duration::ZERO,
            };
        }

        let mut sorted = durations.to_vec();
        sorted.sort();

        let count = sorted.len();
        let total: Duration = sorted.iter().sum();
        let percentile = |p: f64| {
            let idx = ((count as f64 * p) as usize).min(count - 1);
            sorted[idx]
        };

        Self {
            count,
            total,
            mean: total / count as u32,
            min: sorted[0],
            max: sorted[count - 1],
            p50: percentile(0.50),
            p95: percentile(0.95),
            p99: percentile(0.99),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime: Duration,
    pub timings: HashMap<String, TimingStats>,
    pub counters: HashMap<String, u64>,
}

impl MetricsSummary {
    /// Human-readable report, names sorted for stable output
    pub fn report(&self) -> String {
        let mut lines = vec![format!("Uptime: {:.2?}", self.uptime), String::new()];

        lines.push("=== Timings ===".to_string());
        let mut timing_names: Vec<_> = self.timings.keys().collect();
        timing_names.sort();
        for name in timing_names {
            let stats = &self.timings[name];
            lines.push(format!(
                "{}: count={} mean={:.2?} p50={:.2?} p95={:.2?} max={:.2?}",
                name, stats.count, stats.mean, stats.p50, stats.p95, stats.max
            ));
        }

        lines.push(String::new());
        lines.push("=== Counters ===".to_string());
        let mut counter_names: Vec<_> = self.counters.keys().collect();
        counter_names.sort();
        for name in counter_names {
            lines.push(format!("{}: {}", name, self.counters[name]));
        }

        lines.join("\n")
    }
}

/// RAII timer that records into a metrics collector on drop
pub struct Timer {
    metrics: Arc<OrchestrationMetrics>,
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(metrics: Arc<OrchestrationMetrics>, name: &'static str) -> Self {
        Self {
            metrics,
            name,
            start: Instant::now(),
        }
    }

    /// Timer against the process-wide collector
    pub fn global(name: &'static str) -> Self {
        Self::new(global_metrics(), name)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.metrics.record_timing(self.name, self.start.elapsed());
    }
}

static METRICS: Lazy<Arc<OrchestrationMetrics>> = Lazy::new(|| Arc::new(OrchestrationMetrics::new()));

/// Process-wide metrics instance
pub fn global_metrics() -> Arc<OrchestrationMetrics> {
    METRICS.clone()
}
