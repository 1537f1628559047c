//! Fine-grained latency monitoring.
//!
//! Tracks, per command, how many executions crossed a microsecond-level
//! threshold, the worst case seen, and a power-of-two bucket histogram of
//! the offending durations.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default microsecond threshold for an execution to count as an event.
pub const DEFAULT_LATENCY_THRESHOLD: Duration = Duration::from_micros(100);

/// Histogram buckets: `buckets[i]` counts events with
/// `2^i <= duration_us < 2^(i+1)`; the last bucket catches everything above.
pub const LATENCY_BUCKETS: usize = 24;

/// Per-command counters. All fields are atomics; recording takes no lock
/// beyond the map shard.
#[derive(Debug, Default)]
pub struct CommandLatency {
    events: AtomicU64,
    max_us: AtomicU64,
    buckets: [AtomicU64; LATENCY_BUCKETS],
}

impl CommandLatency {
    fn record(&self, duration_us: u64) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.max_us.fetch_max(duration_us, Ordering::Relaxed);

        let bucket = (64 - duration_us.max(1).leading_zeros() as usize - 1)
            .min(LATENCY_BUCKETS - 1);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of one command's counters.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub command: String,
    pub events: u64,
    pub max_us: u64,
    pub buckets: Vec<u64>,
}

/// Threshold-gated latency tracker, keyed by command name.
pub struct LatencyMonitor {
    threshold: Duration,
    per_command: DashMap<String, CommandLatency>,
    total_events: AtomicU64,
}

impl LatencyMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            per_command: DashMap::new(),
            total_events: AtomicU64::new(0),
        }
    }

    /// Record one execution; sub-threshold durations are free.
    pub fn record(&self, command: &str, duration: Duration) {
        if duration < self.threshold {
            return;
        }

        let duration_us = duration.as_micros().min(u128::from(u64::MAX)) as u64;
        self.total_events.fetch_add(1, Ordering::Relaxed);
        self.per_command
            .entry(command.to_string())
            .or_default()
            .record(duration_us);
    }

    pub fn total_events(&self) -> u64 {
        self.total_events.load(Ordering::Relaxed)
    }

    /// Per-command stats, busiest first.
    pub fn stats(&self) -> Vec<LatencyStats> {
        let mut stats: Vec<LatencyStats> = self
            .per_command
            .iter()
            .map(|item| LatencyStats {
                command: item.key().clone(),
                events: item.events.load(Ordering::Relaxed),
                max_us: item.max_us.load(Ordering::Relaxed),
                buckets: item
                    .buckets
                    .iter()
                    .map(|b| b.load(Ordering::Relaxed))
                    .collect(),
            })
            .collect();
        stats.sort_by(|a, b| b.events.cmp(&a.events));
        stats
    }

    pub fn reset(&self) {
        self.per_command.clear();
        self.total_events.store(0, Ordering::Relaxed);
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl Default for LatencyMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_THRESHOLD)
    }
}
