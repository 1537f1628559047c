//! Operation-log record definitions and framing.

use crate::keyspace::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on a single framed record; a length field beyond this is
/// treated as trailing garbage rather than an allocation request.
pub const MAX_RECORD_BYTES: u32 = 64 * 1024 * 1024;

/// A single logged mutation.
///
/// Operations are post-images: `Set` carries the entry's full resulting
/// state, so every record is independently replayable and replay is
/// idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogOp {
    Set {
        key: String,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
    },
    Delete {
        key: String,
    },
    Clear,
}

impl LogOp {
    pub fn describe(&self) -> String {
        match self {
            LogOp::Set { key, .. } => format!("set {}", key),
            LogOp::Delete { key } => format!("delete {}", key),
            LogOp::Clear => "clear".to_string(),
        }
    }
}

/// Framed log record with integrity checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Monotonically increasing, assigned at append time.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub op: LogOp,
    /// CRC32 over the record serialized with this field zeroed.
    pub checksum: u32,
}

impl LogRecord {
    pub fn new(sequence: u64, op: LogOp) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            op,
            checksum: 0,
        }
    }

    pub fn compute_checksum(&self) -> Result<u32, LogError> {
        let mut zeroed = self.clone();
        zeroed.checksum = 0;
        let bytes =
            serde_json::to_vec(&zeroed).map_err(|e| LogError::Serialization(e.to_string()))?;
        Ok(crc32fast::hash(&bytes))
    }

    pub fn verify_checksum(&self) -> Result<bool, LogError> {
        Ok(self.compute_checksum()? == self.checksum)
    }
}

/// Frame a record as `[len u32 LE][record json][crc32 u32 LE]`.
pub fn encode_record(record: &LogRecord) -> Result<Vec<u8>, LogError> {
    let body = serde_json::to_vec(record).map_err(|e| LogError::Serialization(e.to_string()))?;

    let mut bytes = Vec::with_capacity(4 + body.len() + 4);
    bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&body);
    bytes.extend_from_slice(&record.checksum.to_le_bytes());
    Ok(bytes)
}

/// Operation-log errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("log file not found: {0}")]
    NotFound(String),

    /// A partial or corrupt record at the tail: a crash mid-append. The log
    /// is valid up to `valid_len` bytes; everything after is discardable.
    #[error("torn record at log tail; valid prefix is {valid_len} bytes")]
    TornTail { valid_len: u64 },

    #[error("a log rewrite is already in progress")]
    RewriteInProgress,
}
