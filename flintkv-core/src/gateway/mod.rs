//! Command gateway: the sole security boundary in front of the store.
//!
//! Every command passes the same pipeline: resolve the raw token through the
//! frozen rename/deny table, gate on authentication and permission scope,
//! then dispatch. Execution is timed around dispatch and fed to the slow log
//! and latency monitor; recording can never fail the command.

pub mod command;
pub mod policy;
pub mod session;

pub use command::{Command, LatencySub, Reply, SlowLogSub};
pub use policy::{Role, SecurityPolicy, COMMAND_NAMES};
pub use session::{Session, SessionState};

use crate::error::StoreError;
use crate::monitoring::{LatencyMonitor, SlowLog};
use crate::store::Store;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// The gateway. Shared across connections; sessions are per-connection.
pub struct CommandGateway {
    store: Arc<Store>,
    policy: SecurityPolicy,
    slowlog: SlowLog,
    latency: LatencyMonitor,
    next_session: AtomicU64,
}

impl CommandGateway {
    pub fn new(
        store: Arc<Store>,
        policy: SecurityPolicy,
        slowlog: SlowLog,
        latency: LatencyMonitor,
    ) -> Self {
        Self {
            store,
            policy,
            slowlog,
            latency,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn open_session(&self) -> Session {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        Session::new(id, self.policy.require_auth())
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run one raw command through the full gate-and-dispatch pipeline.
    pub async fn dispatch(
        &self,
        session: &mut Session,
        tokens: &[String],
    ) -> Result<Reply, StoreError> {
        if session.is_closed() {
            return Err(StoreError::CommandRejected("session is closed".into()));
        }
        let Some(name) = tokens.first() else {
            return Err(StoreError::CommandRejected("empty command".into()));
        };

        // (1) rename/deny resolution; a denied or unknown-after-rename
        // command never executes.
        let canonical = self.policy.resolve(name)?;
        let command = Command::parse(canonical, &tokens[1..])?;

        // (2) authentication gate: only AUTH passes an unauthenticated
        // session when the policy demands credentials.
        if self.policy.require_auth()
            && !session.is_authenticated()
            && !matches!(command, Command::Auth { .. })
        {
            return Err(StoreError::AuthRequired);
        }

        // (3) permission scope.
        if let Some(required) = command.required_role() {
            if !session.role().allows(required) {
                return Err(StoreError::CommandRejected(format!(
                    "'{}' requires {} scope",
                    canonical,
                    required.as_str()
                )));
            }
        }

        // (4) timed dispatch.
        let start = Instant::now();
        let result = self.execute(session, command).await;
        let elapsed = start.elapsed();
        self.slowlog.record(canonical, elapsed);
        self.latency.record(canonical, elapsed);

        if let Err(e) = &result {
            debug!(session = session.id(), command = canonical, error = %e, "command failed");
        }
        result
    }

    async fn execute(
        &self,
        session: &mut Session,
        command: Command,
    ) -> Result<Reply, StoreError> {
        let store = &self.store;

        let reply = match command {
            Command::Auth { username, password } => {
                let role = self.policy.authenticate(&username, &password)?;
                session.promote(&username, role);
                Reply::Ok
            }
            Command::Ping => Reply::Pong,
            Command::Get { key } => match store.get(&key).await? {
                Some(value) => value_reply(value),
                None => Reply::Nil,
            },
            Command::Set { key, value, ttl_secs } => {
                store.set(&key, value, ttl_secs).await?;
                Reply::Ok
            }
            Command::Del { key } => Reply::Int(store.delete(&key).await? as i64),
            Command::Exists { key } => Reply::Int(store.exists(&key).await? as i64),
            Command::Expire { key, secs } => Reply::Int(store.expire(&key, secs).await? as i64),
            Command::Ttl { key } => Reply::Int(store.ttl(&key).await?),
            Command::Persist { key } => Reply::Int(store.persist(&key).await? as i64),
            Command::Scan { cursor } => {
                let (keys, cursor) = store.scan(cursor).await?;
                Reply::Scan { cursor, keys }
            }
            Command::DbSize => Reply::Int(store.dbsize().await? as i64),
            Command::LPush { key, values } => Reply::Int(store.lpush(&key, values).await? as i64),
            Command::RPush { key, values } => Reply::Int(store.rpush(&key, values).await? as i64),
            Command::LRange { key, start, stop } => {
                Reply::Array(store.lrange(&key, start, stop).await?)
            }
            Command::SAdd { key, members } => Reply::Int(store.sadd(&key, members).await? as i64),
            Command::SMembers { key } => Reply::Array(store.smembers(&key).await?),
            Command::HSet { key, field, value } => {
                Reply::Int(store.hset(&key, field, value).await? as i64)
            }
            Command::HGet { key, field } => match store.hget(&key, &field).await? {
                Some(value) => Reply::Str(value),
                None => Reply::Nil,
            },
            Command::HGetAll { key } => Reply::Pairs(store.hgetall(&key).await?),
            Command::FlushAll => {
                store.flush_all().await?;
                Reply::Ok
            }
            Command::Save => {
                store.save().await?;
                Reply::Ok
            }
            Command::RewriteLog => {
                store.rewrite_log().await?;
                Reply::Ok
            }
            Command::SlowLog(SlowLogSub::Get) => Reply::SlowLogEntries(self.slowlog.entries()),
            Command::SlowLog(SlowLogSub::Len) => Reply::Int(self.slowlog.len() as i64),
            Command::SlowLog(SlowLogSub::Reset) => {
                self.slowlog.reset();
                Reply::Ok
            }
            Command::Latency(LatencySub::Stats) => Reply::LatencyReport(self.latency.stats()),
            Command::Latency(LatencySub::Reset) => {
                self.latency.reset();
                Reply::Ok
            }
            Command::Info => {
                let info = store.info().await;
                Reply::Info(vec![
                    ("keys".into(), info.keys.to_string()),
                    ("footprint_bytes".into(), info.footprint_bytes.to_string()),
                    ("ceiling_bytes".into(), info.ceiling_bytes.to_string()),
                    ("hits".into(), info.hits.to_string()),
                    ("misses".into(), info.misses.to_string()),
                    ("mutations".into(), info.mutations.to_string()),
                    ("evictions".into(), info.evictions.to_string()),
                    ("expirations".into(), info.expirations.to_string()),
                    ("snapshots".into(), info.snapshots.to_string()),
                    (
                        "last_snapshot_at".into(),
                        info.last_snapshot_at
                            .map(|at| at.to_rfc3339())
                            .unwrap_or_else(|| "never".into()),
                    ),
                    ("log_bytes".into(), info.log_bytes.to_string()),
                    ("log_sequence".into(), info.log_sequence.to_string()),
                    (
                        "durability_degraded".into(),
                        info.durability_degraded.to_string(),
                    ),
                    ("uptime_secs".into(), info.uptime_secs.to_string()),
                ])
            }
        };

        Ok(reply)
    }
}

fn value_reply(value: crate::keyspace::Value) -> Reply {
    use crate::keyspace::Value;
    match value {
        Value::Str(s) => Reply::Str(s),
        Value::List(items) => Reply::Array(items.into_iter().collect()),
        Value::Set(members) => Reply::Array(members.into_iter().collect()),
        Value::Hash(fields) => Reply::Pairs(fields.into_iter().collect()),
    }
}
