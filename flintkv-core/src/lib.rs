//! flintkv core - bounded-memory key-value store
//!
//! This crate provides the storage engine behind flintkv:
//! - Key space with typed values, expirations and footprint accounting
//! - Sampled-LRU eviction against a configurable memory ceiling
//! - Dual-mode persistence: operation log plus point-in-time snapshots
//! - Command gateway with a startup-frozen security policy
//! - Slow-log and latency observability
//!
//! Wire framing and process supervision are external concerns; the crate
//! exposes a command → (reply | error) contract and the persistence files.

pub mod config;
pub mod error;
pub mod eviction;
pub mod gateway;
pub mod keyspace;
pub mod monitoring;
pub mod oplog;
pub mod snapshot;
pub mod store;

pub use config::*;
pub use error::StoreError;
pub use eviction::*;
pub use gateway::*;
pub use keyspace::{Entry, KeySpace, Lookup, Value};
pub use monitoring::*;
pub use oplog::*;
pub use snapshot::*;
pub use store::{Store, StoreInfo, OPLOG_FILE, SNAPSHOT_FILE};
