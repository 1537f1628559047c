//! Parsed command forms and reply values.

use super::policy::Role;
use crate::error::StoreError;
use crate::monitoring::{LatencyStats, SlowLogEntry};

/// Subcommands of SLOWLOG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowLogSub {
    Get,
    Len,
    Reset,
}

/// Subcommands of LATENCY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencySub {
    Stats,
    Reset,
}

/// A fully parsed command, ready for dispatch.
#[derive(Debug, Clone)]
pub enum Command {
    Auth { username: String, password: String },
    Ping,
    Get { key: String },
    Set { key: String, value: String, ttl_secs: Option<u64> },
    Del { key: String },
    Exists { key: String },
    Expire { key: String, secs: u64 },
    Ttl { key: String },
    Persist { key: String },
    Scan { cursor: u64 },
    DbSize,
    LPush { key: String, values: Vec<String> },
    RPush { key: String, values: Vec<String> },
    LRange { key: String, start: i64, stop: i64 },
    SAdd { key: String, members: Vec<String> },
    SMembers { key: String },
    HSet { key: String, field: String, value: String },
    HGet { key: String, field: String },
    HGetAll { key: String },
    FlushAll,
    Save,
    RewriteLog,
    SlowLog(SlowLogSub),
    Latency(LatencySub),
    Info,
}

impl Command {
    /// Parse arguments for an already-resolved canonical command name.
    pub fn parse(canonical: &'static str, args: &[String]) -> Result<Command, StoreError> {
        let arity = |ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(StoreError::CommandRejected(format!(
                    "wrong number of arguments for '{}'",
                    canonical
                )))
            }
        };

        let command = match canonical {
            "AUTH" => {
                arity(args.len() == 2)?;
                Command::Auth {
                    username: args[0].clone(),
                    password: args[1].clone(),
                }
            }
            "PING" => {
                arity(args.is_empty())?;
                Command::Ping
            }
            "GET" => {
                arity(args.len() == 1)?;
                Command::Get { key: args[0].clone() }
            }
            "SET" => {
                arity(args.len() == 2 || args.len() == 4)?;
                let ttl_secs = if args.len() == 4 {
                    if !args[2].eq_ignore_ascii_case("EX") {
                        return Err(StoreError::CommandRejected(format!(
                            "unknown SET option '{}'",
                            args[2]
                        )));
                    }
                    Some(parse_int::<u64>(canonical, &args[3])?)
                } else {
                    None
                };
                Command::Set {
                    key: args[0].clone(),
                    value: args[1].clone(),
                    ttl_secs,
                }
            }
            "DEL" => {
                arity(args.len() == 1)?;
                Command::Del { key: args[0].clone() }
            }
            "EXISTS" => {
                arity(args.len() == 1)?;
                Command::Exists { key: args[0].clone() }
            }
            "EXPIRE" => {
                arity(args.len() == 2)?;
                Command::Expire {
                    key: args[0].clone(),
                    secs: parse_int::<u64>(canonical, &args[1])?,
                }
            }
            "TTL" => {
                arity(args.len() == 1)?;
                Command::Ttl { key: args[0].clone() }
            }
            "PERSIST" => {
                arity(args.len() == 1)?;
                Command::Persist { key: args[0].clone() }
            }
            "SCAN" => {
                arity(args.len() == 1)?;
                Command::Scan {
                    cursor: parse_int::<u64>(canonical, &args[0])?,
                }
            }
            "DBSIZE" => {
                arity(args.is_empty())?;
                Command::DbSize
            }
            "LPUSH" => {
                arity(args.len() >= 2)?;
                Command::LPush {
                    key: args[0].clone(),
                    values: args[1..].to_vec(),
                }
            }
            "RPUSH" => {
                arity(args.len() >= 2)?;
                Command::RPush {
                    key: args[0].clone(),
                    values: args[1..].to_vec(),
                }
            }
            "LRANGE" => {
                arity(args.len() == 3)?;
                Command::LRange {
                    key: args[0].clone(),
                    start: parse_int::<i64>(canonical, &args[1])?,
                    stop: parse_int::<i64>(canonical, &args[2])?,
                }
            }
            "SADD" => {
                arity(args.len() >= 2)?;
                Command::SAdd {
                    key: args[0].clone(),
                    members: args[1..].to_vec(),
                }
            }
            "SMEMBERS" => {
                arity(args.len() == 1)?;
                Command::SMembers { key: args[0].clone() }
            }
            "HSET" => {
                arity(args.len() == 3)?;
                Command::HSet {
                    key: args[0].clone(),
                    field: args[1].clone(),
                    value: args[2].clone(),
                }
            }
            "HGET" => {
                arity(args.len() == 2)?;
                Command::HGet {
                    key: args[0].clone(),
                    field: args[1].clone(),
                }
            }
            "HGETALL" => {
                arity(args.len() == 1)?;
                Command::HGetAll { key: args[0].clone() }
            }
            "FLUSHALL" => {
                arity(args.is_empty())?;
                Command::FlushAll
            }
            "SAVE" => {
                arity(args.is_empty())?;
                Command::Save
            }
            "REWRITELOG" => {
                arity(args.is_empty())?;
                Command::RewriteLog
            }
            "SLOWLOG" => {
                arity(args.len() == 1)?;
                let sub = match args[0].to_ascii_uppercase().as_str() {
                    "GET" => SlowLogSub::Get,
                    "LEN" => SlowLogSub::Len,
                    "RESET" => SlowLogSub::Reset,
                    other => {
                        return Err(StoreError::CommandRejected(format!(
                            "unknown SLOWLOG subcommand '{}'",
                            other
                        )))
                    }
                };
                Command::SlowLog(sub)
            }
            "LATENCY" => {
                arity(args.len() == 1)?;
                let sub = match args[0].to_ascii_uppercase().as_str() {
                    "STATS" => LatencySub::Stats,
                    "RESET" => LatencySub::Reset,
                    other => {
                        return Err(StoreError::CommandRejected(format!(
                            "unknown LATENCY subcommand '{}'",
                            other
                        )))
                    }
                };
                Command::Latency(sub)
            }
            "INFO" => {
                arity(args.is_empty())?;
                Command::Info
            }
            other => {
                return Err(StoreError::CommandRejected(format!(
                    "unknown command '{}'",
                    other
                )))
            }
        };

        Ok(command)
    }

    /// Canonical name, used for observability recording.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Auth { .. } => "AUTH",
            Command::Ping => "PING",
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::Del { .. } => "DEL",
            Command::Exists { .. } => "EXISTS",
            Command::Expire { .. } => "EXPIRE",
            Command::Ttl { .. } => "TTL",
            Command::Persist { .. } => "PERSIST",
            Command::Scan { .. } => "SCAN",
            Command::DbSize => "DBSIZE",
            Command::LPush { .. } => "LPUSH",
            Command::RPush { .. } => "RPUSH",
            Command::LRange { .. } => "LRANGE",
            Command::SAdd { .. } => "SADD",
            Command::SMembers { .. } => "SMEMBERS",
            Command::HSet { .. } => "HSET",
            Command::HGet { .. } => "HGET",
            Command::HGetAll { .. } => "HGETALL",
            Command::FlushAll => "FLUSHALL",
            Command::Save => "SAVE",
            Command::RewriteLog => "REWRITELOG",
            Command::SlowLog(_) => "SLOWLOG",
            Command::Latency(_) => "LATENCY",
            Command::Info => "INFO",
        }
    }

    /// Minimum role required to execute; `None` means the command is open
    /// to unauthenticated sessions (AUTH itself, liveness checks aside).
    pub fn required_role(&self) -> Option<Role> {
        match self {
            Command::Auth { .. } => None,
            Command::Ping
            | Command::Get { .. }
            | Command::Exists { .. }
            | Command::Ttl { .. }
            | Command::Scan { .. }
            | Command::DbSize
            | Command::LRange { .. }
            | Command::SMembers { .. }
            | Command::HGet { .. }
            | Command::HGetAll { .. }
            | Command::SlowLog(SlowLogSub::Get)
            | Command::SlowLog(SlowLogSub::Len)
            | Command::Latency(LatencySub::Stats)
            | Command::Info => Some(Role::ReadOnly),
            Command::Set { .. }
            | Command::Del { .. }
            | Command::Expire { .. }
            | Command::Persist { .. }
            | Command::LPush { .. }
            | Command::RPush { .. }
            | Command::SAdd { .. }
            | Command::HSet { .. } => Some(Role::ReadWrite),
            Command::FlushAll
            | Command::Save
            | Command::RewriteLog
            | Command::SlowLog(SlowLogSub::Reset)
            | Command::Latency(LatencySub::Reset) => Some(Role::Admin),
        }
    }
}

fn parse_int<T: std::str::FromStr>(canonical: &str, raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(|_| {
        StoreError::CommandRejected(format!(
            "value is not an integer or out of range in '{}'",
            canonical
        ))
    })
}

/// Successful command result.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Pong,
    Nil,
    Str(String),
    Int(i64),
    Array(Vec<String>),
    Pairs(Vec<(String, String)>),
    Scan { cursor: u64, keys: Vec<String> },
    SlowLogEntries(Vec<SlowLogEntry>),
    LatencyReport(Vec<LatencyStats>),
    Info(Vec<(String, String)>),
}
