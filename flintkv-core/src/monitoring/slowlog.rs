//! Bounded ring buffer of the slowest recent commands.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default capacity of the ring buffer.
pub const DEFAULT_SLOWLOG_CAPACITY: usize = 128;

/// Default threshold above which a command is recorded.
pub const DEFAULT_SLOWLOG_THRESHOLD: Duration = Duration::from_millis(10);

/// One recorded slow command.
#[derive(Debug, Clone)]
pub struct SlowLogEntry {
    /// Monotonically increasing id, never reused across resets.
    pub id: u64,
    pub at: DateTime<Utc>,
    pub command: String,
    pub duration: Duration,
}

/// Ring buffer of commands slower than the configured threshold; oldest
/// entries are dropped first once full.
pub struct SlowLog {
    entries: Mutex<VecDeque<SlowLogEntry>>,
    threshold: Duration,
    capacity: usize,
    next_id: AtomicU64,
}

impl SlowLog {
    pub fn new(threshold: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            threshold,
            capacity: capacity.max(1),
            next_id: AtomicU64::new(0),
        }
    }

    /// Record a command execution. Fast commands are discarded without
    /// taking the lock.
    pub fn record(&self, command: &str, duration: Duration) {
        if duration < self.threshold {
            return;
        }

        let entry = SlowLogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            at: Utc::now(),
            command: command.to_string(),
            duration,
        };

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent entries first.
    pub fn entries(&self) -> Vec<SlowLogEntry> {
        self.entries.lock().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl Default for SlowLog {
    fn default() -> Self {
        Self::new(DEFAULT_SLOWLOG_THRESHOLD, DEFAULT_SLOWLOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_commands_are_not_recorded() {
        let log = SlowLog::new(Duration::from_millis(10), 4);
        log.record("GET", Duration::from_millis(1));
        assert!(log.is_empty());
    }

    #[test]
    fn test_slow_commands_recorded_newest_first() {
        let log = SlowLog::new(Duration::from_millis(10), 4);
        log.record("GET", Duration::from_millis(12));
        log.record("SET", Duration::from_millis(30));

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].command, "SET");
        assert_eq!(entries[1].command, "GET");
        assert!(entries[0].id > entries[1].id);
    }

    #[test]
    fn test_capacity_drops_oldest_first() {
        let log = SlowLog::new(Duration::ZERO, 3);
        for i in 0..5 {
            log.record(&format!("CMD{i}"), Duration::from_millis(20));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].command, "CMD4");
        assert_eq!(entries[2].command, "CMD2");
    }

    #[test]
    fn test_reset_keeps_id_sequence() {
        let log = SlowLog::new(Duration::ZERO, 8);
        log.record("A", Duration::from_millis(20));
        log.reset();
        assert!(log.is_empty());

        log.record("B", Duration::from_millis(20));
        assert_eq!(log.entries()[0].id, 1);
    }
}
