//! Snapshot file format definitions.

use crate::keyspace::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Magic bytes for snapshot files.
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"FLINTKV\0";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// End marker preceding the checksum in the trailer.
pub const SNAPSHOT_END_MARKER: &[u8; 8] = b"FKV_END\0";

/// Fixed on-disk size of the serialized, zero-padded header.
pub const SNAPSHOT_HEADER_LEN: usize = 256;

/// Fixed on-disk size of the trailer: end marker, CRC32, padding.
pub const SNAPSHOT_TRAILER_LEN: usize = 16;

/// Snapshot header, serialized as JSON and zero-padded to
/// [`SNAPSHOT_HEADER_LEN`] bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Last operation-log sequence applied to the serialized state; replay
    /// resumes after this point.
    pub sequence: u64,
    pub entry_count: u64,
}

impl SnapshotHeader {
    pub fn new(sequence: u64, entry_count: u64) -> Self {
        Self {
            magic: *SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            sequence,
            entry_count,
        }
    }

    pub fn verify_magic(&self) -> bool {
        &self.magic == SNAPSHOT_MAGIC
    }
}

/// One serialized key-space entry. Access recency is runtime state and is
/// not persisted; recovered entries start fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: Value,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Snapshot-related errors.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid snapshot magic bytes")]
    InvalidMagic,

    #[error("unsupported snapshot version: {0}")]
    InvalidVersion(u32),

    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid snapshot end marker")]
    InvalidEndMarker,

    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("truncated snapshot")]
    Truncated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_magic() {
        let header = SnapshotHeader::new(12, 3);
        assert!(header.verify_magic());
        assert_eq!(header.version, SNAPSHOT_VERSION);

        let mut bad = header;
        bad.magic[0] = b'X';
        assert!(!bad.verify_magic());
    }

    #[test]
    fn test_header_fits_padded_slot() {
        let header = SnapshotHeader::new(u64::MAX, u64::MAX);
        let json = serde_json::to_vec(&header).unwrap();
        assert!(json.len() < SNAPSHOT_HEADER_LEN);
    }
}
