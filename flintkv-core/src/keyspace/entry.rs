//! Entry and value definitions for the key space.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed per-entry bookkeeping overhead folded into the footprint estimate.
pub const ENTRY_OVERHEAD: usize = 64;

/// Typed value container held by an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    Hash(BTreeMap<String, String>),
}

impl Value {
    /// Estimated heap footprint of the payload in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(items) => items.iter().map(|s| s.len() + 8).sum(),
            Value::Set(members) => members.iter().map(|s| s.len() + 8).sum(),
            Value::Hash(fields) => fields.iter().map(|(k, v)| k.len() + v.len() + 16).sum(),
        }
    }

    /// Type tag used in replies and type-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
        }
    }
}

/// A single key's stored state.
///
/// The last-access stamp is a logical clock tick, not wall time: ticks are
/// strictly increasing per touch, so recency comparisons never tie the way
/// millisecond timestamps do under bursts.
#[derive(Debug)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<DateTime<Utc>>,
    /// Logical access stamp; updated on reads without exclusive locking.
    last_access: AtomicU64,
    /// Index of this key in the keyspace slot vector.
    pub(crate) slot: usize,
    /// Cached footprint estimate: key + value + overhead.
    pub size_bytes: usize,
}

impl Entry {
    pub fn new(
        value: Value,
        expires_at: Option<DateTime<Utc>>,
        access_stamp: u64,
        slot: usize,
        key_len: usize,
    ) -> Self {
        let size_bytes = key_len + value.size_bytes() + ENTRY_OVERHEAD;
        Self {
            value,
            expires_at,
            last_access: AtomicU64::new(access_stamp),
            slot,
            size_bytes,
        }
    }

    /// Record an access at the given logical stamp.
    pub fn touch(&self, stamp: u64) {
        self.last_access.store(stamp, Ordering::Relaxed);
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Recompute the cached size after an in-place value mutation.
    pub fn resize(&mut self, key_len: usize) {
        self.size_bytes = key_len + self.value.size_bytes() + ENTRY_OVERHEAD;
    }
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            expires_at: self.expires_at,
            last_access: AtomicU64::new(self.last_access.load(Ordering::Relaxed)),
            slot: self.slot,
            size_bytes: self.size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_value_sizes() {
        assert_eq!(Value::Str("hello".into()).size_bytes(), 5);

        let list = Value::List(VecDeque::from(["ab".to_string(), "cd".to_string()]));
        assert_eq!(list.size_bytes(), 2 * (2 + 8));

        let hash = Value::Hash(BTreeMap::from([("f".to_string(), "vv".to_string())]));
        assert_eq!(hash.size_bytes(), 1 + 2 + 16);
    }

    #[test]
    fn test_entry_expiry() {
        let now = Utc::now();
        let entry = Entry::new(Value::Str("x".into()), Some(now - Duration::seconds(1)), 0, 0, 1);
        assert!(entry.is_expired(now));

        let entry = Entry::new(Value::Str("x".into()), Some(now + Duration::seconds(60)), 0, 0, 1);
        assert!(!entry.is_expired(now));

        let entry = Entry::new(Value::Str("x".into()), None, 0, 0, 1);
        assert!(!entry.is_expired(now));
    }

    #[test]
    fn test_touch_updates_stamp() {
        let entry = Entry::new(Value::Str("x".into()), None, 7, 0, 1);
        assert_eq!(entry.last_access(), 7);
        entry.touch(42);
        assert_eq!(entry.last_access(), 42);
    }
}
