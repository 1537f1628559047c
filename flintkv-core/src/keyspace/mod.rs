//! In-memory key space: the mapping, its recency metadata and the
//! incrementally maintained footprint estimate.
//!
//! Keys live in a `HashMap` plus a dense slot vector so uniform random
//! sampling (for eviction) and swap-remove deletion are both O(1). The
//! aggregate footprint is adjusted on every insert, update and delete; it is
//! an estimate, never an exact byte count, and always stays close enough to
//! the truth that eviction cannot starve.

pub mod entry;

pub use entry::{Entry, Value, ENTRY_OVERHEAD};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of a key lookup.
#[derive(Debug)]
pub enum Lookup<'a> {
    /// Present and not expired; the access stamp has been refreshed.
    Live(&'a Entry),
    /// Present but past its expiration; must never be observed by callers.
    Expired,
    Absent,
}

/// The in-memory mapping with recency and footprint bookkeeping.
pub struct KeySpace {
    entries: HashMap<String, Entry>,
    /// Dense vector of keys; each entry records its index here.
    slots: Vec<String>,
    footprint: usize,
    /// Logical clock handing out strictly increasing access stamps.
    access_clock: AtomicU64,
}

impl KeySpace {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            slots: Vec::new(),
            footprint: 0,
            access_clock: AtomicU64::new(1),
        }
    }

    fn next_stamp(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a key, refreshing its access stamp when live.
    ///
    /// Expired entries are reported as such but not removed here; removal
    /// needs exclusive access and is the caller's responsibility.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Lookup<'_> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) => {
                entry.touch(self.next_stamp());
                Lookup::Live(entry)
            }
            None => Lookup::Absent,
        }
    }

    /// Whether the key is present and past its expiration.
    pub fn is_expired(&self, key: &str, now: DateTime<Utc>) -> bool {
        matches!(self.entries.get(key), Some(entry) if entry.is_expired(now))
    }

    /// Insert or replace a key, returning the previous live value.
    ///
    /// A previous value that had already expired is not observable and is
    /// reported as absent.
    pub fn insert(
        &mut self,
        key: String,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Value> {
        let stamp = self.next_stamp();
        match self.entries.get_mut(&key) {
            Some(existing) => {
                let was_live = !existing.is_expired(now);
                let old_size = existing.size_bytes;
                let previous = std::mem::replace(&mut existing.value, value);
                existing.expires_at = expires_at;
                existing.touch(stamp);
                existing.resize(key.len());
                let new_size = existing.size_bytes;
                self.footprint = self.footprint - old_size + new_size;
                was_live.then_some(previous)
            }
            None => {
                let slot = self.slots.len();
                let entry = Entry::new(value, expires_at, stamp, slot, key.len());
                self.footprint += entry.size_bytes;
                self.slots.push(key.clone());
                self.entries.insert(key, entry);
                None
            }
        }
    }

    /// Mutate a value in place, keeping the footprint estimate current.
    ///
    /// Returns `None` when the key is absent. Expiry is the caller's concern;
    /// an expired entry here is a logic error upstream.
    pub fn modify<R>(&mut self, key: &str, f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        let stamp = self.next_stamp();
        let entry = self.entries.get_mut(key)?;
        let old_size = entry.size_bytes;
        let result = f(&mut entry.value);
        entry.touch(stamp);
        entry.resize(key.len());
        let new_size = entry.size_bytes;
        self.footprint = self.footprint - old_size + new_size;
        Some(result)
    }

    /// Like [`KeySpace::modify`], but also returns the post-image value and
    /// expiration so the caller can log the mutation as a replayable record.
    pub fn modify_with_meta<R>(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Option<(R, Value, Option<DateTime<Utc>>)> {
        let stamp = self.next_stamp();
        let entry = self.entries.get_mut(key)?;
        let old_size = entry.size_bytes;
        let result = f(&mut entry.value);
        entry.touch(stamp);
        entry.resize(key.len());
        let new_size = entry.size_bytes;
        self.footprint = self.footprint - old_size + new_size;
        Some((result, entry.value.clone(), entry.expires_at))
    }

    /// Remove a key outright, fixing up the slot vector.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.footprint -= entry.size_bytes;
        let slot = entry.slot;
        self.slots.swap_remove(slot);
        if slot < self.slots.len() {
            let moved = self.slots[slot].clone();
            if let Some(moved_entry) = self.entries.get_mut(&moved) {
                moved_entry.slot = slot;
            }
        }
        Some(entry)
    }

    /// Set or clear the expiration on a live key.
    pub fn set_expiry(
        &mut self,
        key: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = expires_at;
                true
            }
            _ => false,
        }
    }

    /// Sample up to `count` distinct keys uniformly at random, skipping
    /// `exclude`. When the candidate pool is no larger than `count`, the whole
    /// pool is returned in slot order; otherwise random probing stays O(count).
    pub fn sample_keys(&self, rng: &mut StdRng, count: usize, exclude: Option<&str>) -> Vec<String> {
        let candidates = self.slots.len() - exclude.map_or(0, |k| self.entries.contains_key(k) as usize);
        if candidates == 0 || count == 0 {
            return Vec::new();
        }

        if candidates <= count {
            return self
                .slots
                .iter()
                .filter(|k| Some(k.as_str()) != exclude)
                .cloned()
                .collect();
        }

        let mut picked: Vec<String> = Vec::with_capacity(count);
        let mut attempts = 0;
        while picked.len() < count && attempts < count * 16 {
            attempts += 1;
            let idx = rng.gen_range(0..self.slots.len());
            let key = &self.slots[idx];
            if Some(key.as_str()) == exclude || picked.iter().any(|p| p == key) {
                continue;
            }
            picked.push(key.clone());
        }
        picked
    }

    /// Cursor-based iteration over live keys. A returned cursor of 0 means
    /// the scan is complete. Concurrent mutations may skip or repeat keys,
    /// as with any slot-based cursor.
    pub fn scan(&self, cursor: usize, count: usize, now: DateTime<Utc>) -> (Vec<String>, usize) {
        if cursor >= self.slots.len() {
            return (Vec::new(), 0);
        }
        let end = (cursor + count.max(1)).min(self.slots.len());
        let keys = self.slots[cursor..end]
            .iter()
            .filter(|k| matches!(self.entries.get(*k), Some(e) if !e.is_expired(now)))
            .cloned()
            .collect();
        let next = if end >= self.slots.len() { 0 } else { end };
        (keys, next)
    }

    /// Access stamp of a key without refreshing it; used by eviction to rank
    /// sampled candidates.
    pub fn last_access_of(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|e| e.last_access())
    }

    /// Iterate every entry, expired ones included; snapshot and sweep callers
    /// filter as they need.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn footprint(&self) -> usize {
        self.footprint
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.slots.clear();
        self.footprint = 0;
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new()
    }
}
