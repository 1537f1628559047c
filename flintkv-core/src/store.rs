//! The store: single-writer coordination of key space, eviction and
//! persistence.
//!
//! Mutations serialize on the key-space write lock; the matching log append
//! happens inside that critical path, so log order and application order
//! coincide exactly. Reads share the read lock and update recency through
//! atomics. Snapshots and log rewrites run on background workers against a
//! cloned point-in-time view, never blocking writers beyond a bounded
//! buffering window.

use crate::config::{SnapshotRule, StoreConfig};
use crate::error::StoreError;
use crate::eviction::EvictionEngine;
use crate::keyspace::{KeySpace, Lookup, Value, ENTRY_OVERHEAD};
use crate::oplog::{encode_record, replay_oplog, LogError, LogOp, LogRecord, OplogWriter};
use crate::snapshot::{read_snapshot, write_snapshot, SnapshotEntry};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tracing::{info, warn};

/// Current snapshot file name inside the data directory.
pub const SNAPSHOT_FILE: &str = "snapshot.fkv";

/// Operation log file name inside the data directory.
pub const OPLOG_FILE: &str = "store.oplog";

/// Keys returned per SCAN page.
const SCAN_COUNT: usize = 10;

/// Keys probed per expiry sweep round.
const SWEEP_BATCH: usize = 20;

const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct StoreStats {
    hits: AtomicU64,
    misses: AtomicU64,
    mutations: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    snapshots: AtomicU64,
}

struct RuleWindow {
    rule: SnapshotRule,
    window_start: Instant,
    count: u64,
}

/// Read-only view of store state for INFO.
#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub keys: usize,
    pub footprint_bytes: usize,
    pub ceiling_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub mutations: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub snapshots: u64,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub log_bytes: u64,
    pub log_sequence: u64,
    pub durability_degraded: bool,
    pub uptime_secs: u64,
}

/// The coordinated store.
pub struct Store {
    config: StoreConfig,
    keyspace: RwLock<KeySpace>,
    /// Only locked from inside the key-space write path and the sweeper;
    /// never held across an await point.
    eviction: Mutex<EvictionEngine>,
    oplog: Arc<OplogWriter>,
    snapshot_path: PathBuf,
    rule_windows: Mutex<Vec<RuleWindow>>,
    snapshot_notify: Notify,
    rewrite_notify: Notify,
    snapshot_in_flight: AtomicBool,
    rewrite_in_flight: AtomicBool,
    last_snapshot_at: Mutex<Option<DateTime<Utc>>>,
    stats: StoreStats,
    started_at: Instant,
}

impl Store {
    /// Open the store: create the data directory, recover state from the
    /// latest valid snapshot plus the operation log, and resume the log.
    pub fn open(config: StoreConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let data_dir = &config.persistence.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let oplog_path = data_dir.join(OPLOG_FILE);

        // Stale intermediates from an interrupted snapshot or rewrite are
        // never the durable copy; clear them out.
        let _ = std::fs::remove_file(data_dir.join(format!("{SNAPSHOT_FILE}.tmp")));
        let _ = std::fs::remove_file(data_dir.join(format!("{OPLOG_FILE}.rewrite")));

        let mut keyspace = KeySpace::new();
        let mut snapshot_sequence = 0;

        if snapshot_path.exists() {
            match read_snapshot(&snapshot_path) {
                Ok((header, entries)) => {
                    let now = Utc::now();
                    let mut loaded = 0usize;
                    for entry in entries {
                        if matches!(entry.expires_at, Some(at) if at <= now) {
                            continue;
                        }
                        keyspace.insert(entry.key, entry.value, entry.expires_at, now);
                        loaded += 1;
                    }
                    snapshot_sequence = header.sequence;
                    info!(
                        entries = loaded,
                        sequence = snapshot_sequence,
                        "recovered key space from snapshot"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "snapshot rejected; falling back to log-only recovery");
                }
            }
        }

        let outcome = replay_oplog(&oplog_path, &mut keyspace, snapshot_sequence)
            .context("operation log replay failed")?;
        let start_sequence = outcome.last_sequence.max(snapshot_sequence);

        let oplog = Arc::new(
            OplogWriter::open(&oplog_path, config.persistence.flush_policy, start_sequence)
                .context("failed to open operation log")?,
        );

        let eviction = EvictionEngine::new(
            config.memory.eviction_sample_size,
            config.memory.eviction_seed,
        );

        let rule_windows = config
            .persistence
            .snapshot_rules
            .iter()
            .map(|&rule| RuleWindow {
                rule,
                window_start: Instant::now(),
                count: 0,
            })
            .collect();

        info!(
            keys = keyspace.len(),
            footprint = keyspace.footprint(),
            sequence = start_sequence,
            "store opened"
        );

        Ok(Arc::new(Self {
            config,
            keyspace: RwLock::new(keyspace),
            eviction: Mutex::new(eviction),
            oplog,
            snapshot_path,
            rule_windows: Mutex::new(rule_windows),
            snapshot_notify: Notify::new(),
            rewrite_notify: Notify::new(),
            snapshot_in_flight: AtomicBool::new(false),
            rewrite_in_flight: AtomicBool::new(false),
            last_snapshot_at: Mutex::new(None),
            stats: StoreStats::default(),
            started_at: Instant::now(),
        }))
    }

    /// Spawn the background workers: periodic log flush, rule-triggered
    /// snapshots, size-triggered log rewrites and the expiry sweeper.
    pub fn start_background_tasks(self: Arc<Self>) {
        Arc::clone(&self.oplog).start_background_flush();

        let store = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                store.snapshot_notify.notified().await;
                if store.snapshot_in_flight.swap(true, Ordering::SeqCst) {
                    continue;
                }
                let result = store.snapshot_inner().await;
                store.snapshot_in_flight.store(false, Ordering::SeqCst);
                if let Err(e) = result {
                    warn!(error = %e, "background snapshot failed");
                }
            }
        });

        let store = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                store.rewrite_notify.notified().await;
                if store.rewrite_in_flight.swap(true, Ordering::SeqCst) {
                    continue;
                }
                let result = store.rewrite_inner().await;
                store.rewrite_in_flight.store(false, Ordering::SeqCst);
                if let Err(e) = result {
                    warn!(error = %e, "background log rewrite failed");
                }
            }
        });

        let store = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = store.sweep_expired(SWEEP_BATCH).await {
                    warn!(error = %e, "expiry sweep failed");
                }
            }
        });
    }

    /// Flush the log and wait out nothing else; in-flight snapshots hold
    /// only temp files, so the prior durable state stays intact.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.oplog.flush().await?;
        Ok(())
    }

    // ---- reads -----------------------------------------------------------

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = Utc::now();
        {
            let ks = self.keyspace.read().await;
            match ks.get(key, now) {
                Lookup::Live(entry) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Lookup::Absent => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
                Lookup::Expired => {}
            }
        }

        // Lazy expiry: upgrade to the write path and delete, so the dead
        // entry is never observable and recovery cannot resurrect it.
        let mut ks = self.keyspace.write().await;
        if ks.is_expired(key, now) {
            ks.remove(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            self.append_op(LogOp::Delete { key: key.to_string() }).await?;
            drop(ks);
            self.after_mutation(1).await;
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Seconds until expiry: -2 when absent, -1 when the key never expires.
    pub async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let now = Utc::now();
        let ks = self.keyspace.read().await;
        match ks.get(key, now) {
            Lookup::Live(entry) => match entry.expires_at {
                Some(at) => {
                    let ms = (at - now).num_milliseconds().max(0);
                    Ok((ms + 999) / 1000)
                }
                None => Ok(-1),
            },
            _ => Ok(-2),
        }
    }

    pub async fn scan(&self, cursor: u64) -> Result<(Vec<String>, u64), StoreError> {
        let now = Utc::now();
        let ks = self.keyspace.read().await;
        let (keys, next) = ks.scan(cursor as usize, SCAN_COUNT, now);
        Ok((keys, next as u64))
    }

    pub async fn dbsize(&self) -> Result<usize, StoreError> {
        Ok(self.keyspace.read().await.len())
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let now = Utc::now();
        let ks = self.keyspace.read().await;
        match ks.get(key, now) {
            Lookup::Live(entry) => match &entry.value {
                Value::List(items) => Ok(range_of(items.iter(), items.len(), start, stop)),
                _ => Err(StoreError::WrongType),
            },
            _ => Ok(Vec::new()),
        }
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = Utc::now();
        let ks = self.keyspace.read().await;
        match ks.get(key, now) {
            Lookup::Live(entry) => match &entry.value {
                Value::Set(members) => Ok(members.iter().cloned().collect()),
                _ => Err(StoreError::WrongType),
            },
            _ => Ok(Vec::new()),
        }
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let now = Utc::now();
        let ks = self.keyspace.read().await;
        match ks.get(key, now) {
            Lookup::Live(entry) => match &entry.value {
                Value::Hash(fields) => Ok(fields.get(field).cloned()),
                _ => Err(StoreError::WrongType),
            },
            _ => Ok(None),
        }
    }

    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let now = Utc::now();
        let ks = self.keyspace.read().await;
        match ks.get(key, now) {
            Lookup::Live(entry) => match &entry.value {
                Value::Hash(fields) => {
                    Ok(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                }
                _ => Err(StoreError::WrongType),
            },
            _ => Ok(Vec::new()),
        }
    }

    // ---- writes ----------------------------------------------------------

    /// Store a string value, returning the previous live value.
    pub async fn set(
        &self,
        key: &str,
        value: String,
        ttl_secs: Option<u64>,
    ) -> Result<Option<Value>, StoreError> {
        let now = Utc::now();
        let expires_at = ttl_secs.map(|s| now + ChronoDuration::seconds(s as i64));
        let value = Value::Str(value);

        let ceiling = self.config.memory.ceiling_bytes;
        let entry_size = key.len() + value.size_bytes() + ENTRY_OVERHEAD;
        if entry_size > ceiling {
            return Err(StoreError::CapacityExceeded {
                required: entry_size,
                ceiling,
            });
        }

        let mut ks = self.keyspace.write().await;
        let previous = ks.insert(key.to_string(), value.clone(), expires_at, now);
        let evicted = self.evict_locked(&mut ks, Some(key))?;
        self.append_op(LogOp::Set {
            key: key.to_string(),
            value,
            expires_at,
        })
        .await?;
        self.append_evictions(&evicted).await?;
        drop(ks);

        self.after_mutation(1 + evicted.len() as u64).await;
        Ok(previous)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut ks = self.keyspace.write().await;

        if ks.is_expired(key, now) {
            ks.remove(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            self.append_op(LogOp::Delete { key: key.to_string() }).await?;
            drop(ks);
            self.after_mutation(1).await;
            return Ok(false);
        }

        let existed = ks.remove(key).is_some();
        if existed {
            self.append_op(LogOp::Delete { key: key.to_string() }).await?;
            drop(ks);
            self.after_mutation(1).await;
        }
        Ok(existed)
    }

    pub async fn expire(&self, key: &str, secs: u64) -> Result<bool, StoreError> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(secs as i64);
        self.set_expiry(key, Some(expires_at), now).await
    }

    pub async fn persist(&self, key: &str) -> Result<bool, StoreError> {
        self.set_expiry(key, None, Utc::now()).await
    }

    async fn set_expiry(
        &self,
        key: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut ks = self.keyspace.write().await;
        if !ks.set_expiry(key, expires_at, now) {
            return Ok(false);
        }

        let post = match ks.get(key, now) {
            Lookup::Live(entry) => entry.value.clone(),
            // set_expiry only succeeds on a live entry under this same lock.
            _ => unreachable!("entry live under exclusive lock"),
        };
        self.append_op(LogOp::Set {
            key: key.to_string(),
            value: post,
            expires_at,
        })
        .await?;
        drop(ks);
        self.after_mutation(1).await;
        Ok(true)
    }

    pub async fn lpush(&self, key: &str, values: Vec<String>) -> Result<usize, StoreError> {
        self.push_list(key, values, true).await
    }

    pub async fn rpush(&self, key: &str, values: Vec<String>) -> Result<usize, StoreError> {
        self.push_list(key, values, false).await
    }

    async fn push_list(
        &self,
        key: &str,
        values: Vec<String>,
        front: bool,
    ) -> Result<usize, StoreError> {
        let delta = values.iter().map(|v| v.len() + 8).sum();
        self.mutate_container(
            key,
            delta,
            |value| matches!(value, Value::List(_)),
            || Value::List(Default::default()),
            move |value| {
                if let Value::List(items) = value {
                    for item in values {
                        if front {
                            items.push_front(item);
                        } else {
                            items.push_back(item);
                        }
                    }
                    items.len()
                } else {
                    0
                }
            },
        )
        .await
    }

    pub async fn sadd(&self, key: &str, members: Vec<String>) -> Result<usize, StoreError> {
        let delta = members.iter().map(|m| m.len() + 8).sum();
        self.mutate_container(
            key,
            delta,
            |value| matches!(value, Value::Set(_)),
            || Value::Set(Default::default()),
            move |value| {
                if let Value::Set(set) = value {
                    members.into_iter().filter(|m| set.insert(m.clone())).count()
                } else {
                    0
                }
            },
        )
        .await
    }

    /// Set one hash field; returns whether the field was newly created.
    pub async fn hset(&self, key: &str, field: String, value: String) -> Result<bool, StoreError> {
        let delta = field.len() + value.len() + 16;
        self.mutate_container(
            key,
            delta,
            |v| matches!(v, Value::Hash(_)),
            || Value::Hash(Default::default()),
            move |v| {
                if let Value::Hash(fields) = v {
                    fields.insert(field, value).is_none()
                } else {
                    false
                }
            },
        )
        .await
    }

    /// Shared read-modify-write path for the container types: expired-entry
    /// cleanup, type check, capacity pre-check, in-place mutation, eviction
    /// and the post-image log append.
    async fn mutate_container<T>(
        &self,
        key: &str,
        delta_estimate: usize,
        type_ok: impl FnOnce(&Value) -> bool,
        init: impl FnOnce() -> Value,
        apply: impl FnOnce(&mut Value) -> T,
    ) -> Result<T, StoreError> {
        let now = Utc::now();
        let ceiling = self.config.memory.ceiling_bytes;

        let mut ks = self.keyspace.write().await;

        let mut expired_removed = 0u64;
        if ks.is_expired(key, now) {
            ks.remove(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            expired_removed = 1;
        }

        let base_size = match ks.get(key, now) {
            Lookup::Live(entry) => {
                if !type_ok(&entry.value) {
                    return Err(StoreError::WrongType);
                }
                entry.size_bytes
            }
            _ => key.len() + ENTRY_OVERHEAD,
        };
        if base_size + delta_estimate > ceiling {
            return Err(StoreError::CapacityExceeded {
                required: base_size + delta_estimate,
                ceiling,
            });
        }

        if matches!(ks.get(key, now), Lookup::Absent) {
            ks.insert(key.to_string(), init(), None, now);
        }

        let Some((result, post, expires_at)) = ks.modify_with_meta(key, apply) else {
            // Inserted or verified live three lines up under this same lock.
            unreachable!("entry present under exclusive lock");
        };

        let evicted = self.evict_locked(&mut ks, Some(key))?;
        self.append_op(LogOp::Set {
            key: key.to_string(),
            value: post,
            expires_at,
        })
        .await?;
        self.append_evictions(&evicted).await?;
        drop(ks);

        self.after_mutation(1 + expired_removed + evicted.len() as u64).await;
        Ok(result)
    }

    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let mut ks = self.keyspace.write().await;
        ks.clear();
        self.append_op(LogOp::Clear).await?;
        drop(ks);
        self.after_mutation(1).await;
        Ok(())
    }

    // ---- persistence surface --------------------------------------------

    /// Explicit snapshot request; fails if one is already running.
    pub async fn save(&self) -> Result<(), StoreError> {
        if self.snapshot_in_flight.swap(true, Ordering::SeqCst) {
            return Err(StoreError::CommandRejected(
                "a snapshot is already in progress".into(),
            ));
        }
        let result = self.snapshot_inner().await;
        self.snapshot_in_flight.store(false, Ordering::SeqCst);
        result
    }

    /// Explicit log rewrite request; fails if one is already running.
    pub async fn rewrite_log(&self) -> Result<(), StoreError> {
        if self.rewrite_in_flight.swap(true, Ordering::SeqCst) {
            return Err(StoreError::CommandRejected(
                "a log rewrite is already in progress".into(),
            ));
        }
        let result = self.rewrite_inner().await;
        self.rewrite_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn snapshot_inner(&self) -> Result<(), StoreError> {
        // Point-in-time view: the clone happens under a short read lock;
        // serialization runs on the blocking pool. Writes landing after the
        // clone miss this snapshot but are in the log.
        let (entries, sequence) = {
            let ks = self.keyspace.read().await;
            let now = Utc::now();
            let entries: Vec<SnapshotEntry> = ks
                .iter()
                .filter(|(_, entry)| !entry.is_expired(now))
                .map(|(key, entry)| SnapshotEntry {
                    key: key.clone(),
                    value: entry.value.clone(),
                    expires_at: entry.expires_at,
                })
                .collect();
            (entries, self.oplog.last_sequence())
        };

        let path = self.snapshot_path.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&path, sequence, &entries))
            .await
            .map_err(|e| {
                StoreError::IoFailure(std::io::Error::new(std::io::ErrorKind::Other, e))
            })??;

        self.stats.snapshots.fetch_add(1, Ordering::Relaxed);
        *self.last_snapshot_at.lock() = Some(Utc::now());
        self.reset_rule_windows();
        Ok(())
    }

    async fn rewrite_inner(&self) -> Result<(), StoreError> {
        // Writers are held off only long enough to clone the view and arm
        // the append buffer, so the cut point is exact.
        let (entries, cut_sequence) = {
            let ks = self.keyspace.write().await;
            self.oplog.begin_rewrite().await?;
            let now = Utc::now();
            let entries: Vec<(String, Value, Option<DateTime<Utc>>)> = ks
                .iter()
                .filter(|(_, entry)| !entry.is_expired(now))
                .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.expires_at))
                .collect();
            (entries, self.oplog.last_sequence())
        };

        let replacement = self
            .oplog
            .path()
            .with_file_name(format!("{OPLOG_FILE}.rewrite"));
        let dump_path = replacement.clone();

        let dump = tokio::task::spawn_blocking(move || -> Result<(), LogError> {
            let mut file = BufWriter::new(File::create(&dump_path)?);
            for (key, value, expires_at) in entries {
                let mut record = LogRecord::new(
                    cut_sequence,
                    LogOp::Set {
                        key,
                        value,
                        expires_at,
                    },
                );
                record.checksum = record.compute_checksum()?;
                file.write_all(&encode_record(&record)?)?;
            }
            file.flush()?;
            file.get_ref().sync_all()?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::IoFailure(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        match dump {
            Ok(()) => {
                self.oplog.complete_rewrite(&replacement).await?;
                Ok(())
            }
            Err(e) => {
                self.oplog.abort_rewrite().await;
                let _ = std::fs::remove_file(&replacement);
                Err(e.into())
            }
        }
    }

    /// Probe a random handful of keys and delete the expired ones, logging
    /// each deletion so recovery cannot resurrect them.
    pub async fn sweep_expired(&self, limit: usize) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut ks = self.keyspace.write().await;
        let candidates = self.eviction.lock().sample_candidates(&ks, limit);

        let mut removed = 0u64;
        for key in candidates {
            if ks.is_expired(&key, now) {
                ks.remove(&key);
                self.append_op(LogOp::Delete { key }).await?;
                removed += 1;
            }
        }
        drop(ks);

        if removed > 0 {
            self.stats.expirations.fetch_add(removed, Ordering::Relaxed);
            self.after_mutation(removed).await;
        }
        Ok(removed as usize)
    }

    pub async fn info(&self) -> StoreInfo {
        let (keys, footprint) = {
            let ks = self.keyspace.read().await;
            (ks.len(), ks.footprint())
        };

        let last_snapshot_at = *self.last_snapshot_at.lock();

        StoreInfo {
            keys,
            footprint_bytes: footprint,
            ceiling_bytes: self.config.memory.ceiling_bytes,
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            mutations: self.stats.mutations.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            snapshots: self.stats.snapshots.load(Ordering::Relaxed),
            last_snapshot_at,
            log_bytes: self.oplog.size_bytes().await,
            log_sequence: self.oplog.last_sequence(),
            durability_degraded: self.oplog.is_degraded(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    // ---- internals -------------------------------------------------------

    fn evict_locked(
        &self,
        ks: &mut KeySpace,
        protect: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let ceiling = self.config.memory.ceiling_bytes;
        if ks.footprint() <= ceiling {
            return Ok(Vec::new());
        }
        let evicted = self
            .eviction
            .lock()
            .evict_until_within(ks, ceiling, protect)?;
        self.stats
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        Ok(evicted)
    }

    async fn append_op(&self, op: LogOp) -> Result<u64, StoreError> {
        Ok(self.oplog.append(op).await?)
    }

    async fn append_evictions(&self, evicted: &[String]) -> Result<(), StoreError> {
        for key in evicted {
            self.append_op(LogOp::Delete { key: key.clone() }).await?;
        }
        Ok(())
    }

    /// Count mutations against every snapshot rule (OR semantics; any rule
    /// holding triggers) and nudge the rewrite worker when the log has
    /// outgrown its threshold.
    async fn after_mutation(&self, count: u64) {
        self.stats.mutations.fetch_add(count, Ordering::Relaxed);

        let fire = {
            let mut windows = self.rule_windows.lock();
            let now = Instant::now();
            let mut fire = false;
            for window in windows.iter_mut() {
                if now.duration_since(window.window_start).as_secs() >= window.rule.within_secs {
                    window.window_start = now;
                    window.count = 0;
                }
                window.count += count;
                if window.count >= window.rule.mutations {
                    fire = true;
                }
            }
            fire
        };
        if fire {
            self.reset_rule_windows();
            self.snapshot_notify.notify_one();
        }

        let threshold = self.config.persistence.rewrite_min_bytes;
        if threshold > 0
            && !self.rewrite_in_flight.load(Ordering::Relaxed)
            && self.oplog.size_bytes().await > threshold
        {
            self.rewrite_notify.notify_one();
        }
    }

    fn reset_rule_windows(&self) {
        let mut windows = self.rule_windows.lock();
        let now = Instant::now();
        for window in windows.iter_mut() {
            window.window_start = now;
            window.count = 0;
        }
    }
}

/// Normalize negative range indices and slice out `start..=stop`.
fn range_of<'a>(
    items: impl Iterator<Item = &'a String>,
    len: usize,
    start: i64,
    stop: i64,
) -> Vec<String> {
    let len = len as i64;
    let normalize = |idx: i64| -> i64 {
        if idx < 0 {
            (len + idx).max(0)
        } else {
            idx
        }
    };
    let start = normalize(start);
    let stop = normalize(stop).min(len - 1);
    if len == 0 || start > stop {
        return Vec::new();
    }

    items
        .skip(start as usize)
        .take((stop - start + 1) as usize)
        .cloned()
        .collect()
}
