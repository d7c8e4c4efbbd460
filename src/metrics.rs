// Copyright 2025 Cowboy AI, LLC.

//! In-process engine metrics

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const MAX_SAMPLES: usize = 1000;

/// Counter names shared by the ingress pool and the orchestrator
pub mod names {
    /// Events applied with at least one change
    pub const EVENTS_APPLIED: &str = "events.applied";
    /// Events that left the graph unchanged
    pub const EVENTS_UNCHANGED: &str = "events.unchanged";
    /// Events skipped as stale
    pub const EVENTS_STALE: &str = "events.stale";
    /// Events of unconsumed types
    pub const EVENTS_IGNORED: &str = "events.ignored";
    /// Events parked in the dead-letter sink
    pub const EVENTS_DEAD_LETTERED: &str = "events.dead_lettered";
    /// Apply attempts retried after a store outage
    pub const EVENT_RETRIES: &str = "events.retries";
    /// Time spent applying one event
    pub const EVENT_APPLY: &str = "events.apply";
    /// Optimizations that committed an assignment
    pub const OPTIMIZATIONS_SUCCEEDED: &str = "optimizations.succeeded";
    /// Optimizations that ended without an assignment, labeled by reason
    pub const OPTIMIZATIONS_FAILED: &str = "optimizations.failed";
    /// Optimizations that fell back to straight-line geometry
    pub const ROUTING_FALLBACKS: &str = "routing.fallbacks";
    /// Time spent on one optimization request
    pub const OPTIMIZATION: &str = "optimizations.total";
}

/// Counters and duration samples
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    counters: Arc<RwLock<HashMap<String, u64>>>,
    durations: Arc<RwLock<HashMap<String, Vec<Duration>>>>,
    errors: Arc<RwLock<HashMap<String, u64>>>,
}

impl EngineMetrics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter
    pub async fn increment(&self, name: &str) {
        let mut counters = self.counters.write().await;
        *counters.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Increment a counter qualified by a label, e.g. `events.applied.LOAD_CREATED`
    pub async fn increment_labeled(&self, name: &str, label: &str) {
        self.increment(name).await;
        self.increment(&format!("{}.{}", name, label)).await;
    }

    /// Record a failure for an operation
    pub async fn record_error(&self, operation: &str) {
        let mut errors = self.errors.write().await;
        *errors.entry(operation.to_string()).or_insert(0) += 1;
    }

    /// Record how long an operation took
    pub async fn record_duration(&self, operation: &str, duration: Duration) {
        let mut durations = self.durations.write().await;
        let samples = durations.entry(operation.to_string()).or_default();
        samples.push(duration);
        if samples.len() > MAX_SAMPLES {
            let excess = samples.len() - MAX_SAMPLES;
            samples.drain(0..excess);
        }
    }

    /// Current counter value
    pub async fn counter(&self, name: &str) -> u64 {
        self.counters.read().await.get(name).copied().unwrap_or(0)
    }

    /// Failures recorded for an operation
    pub async fn error_count(&self, operation: &str) -> u64 {
        self.errors.read().await.get(operation).copied().unwrap_or(0)
    }

    /// Mean duration of an operation
    pub async fn avg_duration(&self, operation: &str) -> Option<Duration> {
        let durations = self.durations.read().await;
        let samples = durations.get(operation).filter(|s| !s.is_empty())?;
        let sum: Duration = samples.iter().sum();
        Some(sum / samples.len() as u32)
    }

    /// Duration at a percentile between 0 and 100
    pub async fn percentile_duration(&self, operation: &str, percentile: f64) -> Option<Duration> {
        let durations = self.durations.read().await;
        let samples = durations.get(operation).filter(|s| !s.is_empty())?;
        let mut sorted = samples.clone();
        sorted.sort();
        Some(sorted[percentile_index(sorted.len(), percentile / 100.0)])
    }

    /// Snapshot of every metric
    pub async fn summary(&self) -> MetricsSummary {
        let counters = self.counters.read().await.clone();
        let errors = self.errors.read().await.clone();

        let durations = self.durations.read().await;
        let mut stats = HashMap::new();
        for (operation, samples) in durations.iter() {
            let mut sorted = samples.clone();
            sorted.sort();
            let (Some(min), Some(max)) = (sorted.first().copied(), sorted.last().copied()) else {
                continue;
            };
            let sum: Duration = sorted.iter().sum();
            stats.insert(
                operation.clone(),
                DurationStats {
                    count: sorted.len(),
                    avg: sum / sorted.len() as u32,
                    p50: sorted[percentile_index(sorted.len(), 0.5)],
                    p95: sorted[percentile_index(sorted.len(), 0.95)],
                    p99: sorted[percentile_index(sorted.len(), 0.99)],
                    min,
                    max,
                },
            );
        }

        MetricsSummary {
            counters,
            errors,
            durations: stats,
        }
    }

    /// Clear everything
    pub async fn reset(&self) {
        self.counters.write().await.clear();
        self.durations.write().await.clear();
        self.errors.write().await.clear();
    }
}

fn percentile_index(len: usize, fraction: f64) -> usize {
    (((len as f64 - 1.0) * fraction) as usize).min(len.saturating_sub(1))
}

/// All metrics at one point in time
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    /// Counter values
    pub counters: HashMap<String, u64>,
    /// Failure counts
    pub errors: HashMap<String, u64>,
    /// Duration statistics per operation
    pub durations: HashMap<String, DurationStats>,
}

/// Duration statistics for one operation
#[derive(Debug, Clone)]
pub struct DurationStats {
    /// Number of samples
    pub count: usize,
    /// Mean
    pub avg: Duration,
    /// Median
    pub p50: Duration,
    /// 95th percentile
    pub p95: Duration,
    /// 99th percentile
    pub p99: Duration,
    /// Fastest sample
    pub min: Duration,
    /// Slowest sample
    pub max: Duration,
}

/// Measures one operation
pub struct MetricsTimer<'a> {
    metrics: &'a EngineMetrics,
    operation: &'static str,
    start: Instant,
}

impl<'a> MetricsTimer<'a> {
    /// Start timing
    pub fn new(metrics: &'a EngineMetrics, operation: &'static str) -> Self {
        Self {
            metrics,
            operation,
            start: Instant::now(),
        }
    }

    /// Record the elapsed time
    pub async fn record(self) {
        self.metrics
            .record_duration(self.operation, self.start.elapsed())
            .await;
    }
}
