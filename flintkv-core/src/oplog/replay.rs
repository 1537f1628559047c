//! Log replay for startup recovery.

use super::reader::OplogReader;
use super::record::{LogError, LogOp};
use crate::keyspace::KeySpace;
use chrono::Utc;
use std::path::Path;
use tracing::{info, warn};

/// What a replay pass did.
#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    pub records_applied: u64,
    /// Records at or before the starting sequence, or whose payload had
    /// already expired at load time.
    pub records_skipped: u64,
    /// Highest sequence seen, applied or not.
    pub last_sequence: u64,
    /// Bytes discarded from a torn tail, if any.
    pub truncated_bytes: u64,
}

/// Replay records with sequence greater than `from_sequence` into the key
/// space. A torn tail is truncated away and replay finishes at the last
/// whole record; recovery proceeds from a strict prefix of the log.
pub fn replay_oplog(
    path: &Path,
    keyspace: &mut KeySpace,
    from_sequence: u64,
) -> Result<ReplayOutcome, LogError> {
    if !path.exists() {
        return Ok(ReplayOutcome::default());
    }

    let file_len = std::fs::metadata(path)?.len();
    let mut reader = OplogReader::open(path)?;
    let mut outcome = ReplayOutcome::default();
    let now = Utc::now();

    loop {
        match reader.next_record() {
            Ok(Some(record)) => {
                outcome.last_sequence = outcome.last_sequence.max(record.sequence);
                if record.sequence <= from_sequence {
                    outcome.records_skipped += 1;
                    continue;
                }
                match record.op {
                    LogOp::Set {
                        key,
                        value,
                        expires_at,
                    } => {
                        // Entries already dead at load time stay dead.
                        if matches!(expires_at, Some(at) if at <= now) {
                            keyspace.remove(&key);
                            outcome.records_skipped += 1;
                            continue;
                        }
                        keyspace.insert(key, value, expires_at, now);
                    }
                    LogOp::Delete { key } => {
                        keyspace.remove(&key);
                    }
                    LogOp::Clear => keyspace.clear(),
                }
                outcome.records_applied += 1;
            }
            Ok(None) => break,
            Err(LogError::TornTail { valid_len }) => {
                outcome.truncated_bytes = file_len - valid_len;
                warn!(
                    discarded = outcome.truncated_bytes,
                    "torn record at log tail; truncating to last whole record"
                );
                let file = std::fs::OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
                break;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        applied = outcome.records_applied,
        skipped = outcome.records_skipped,
        last_sequence = outcome.last_sequence,
        "operation log replayed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::{Lookup, Value};
    use crate::oplog::writer::{FlushPolicy, OplogWriter};
    use chrono::Duration;
    use tempfile::TempDir;

    fn set_op(key: &str, value: &str) -> LogOp {
        LogOp::Set {
            key: key.into(),
            value: Value::Str(value.into()),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_replay_rebuilds_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.oplog");

        let writer = OplogWriter::open(&path, FlushPolicy::Always, 0).unwrap();
        writer.append(set_op("a", "1")).await.unwrap();
        writer.append(set_op("b", "2")).await.unwrap();
        writer.append(LogOp::Delete { key: "a".into() }).await.unwrap();
        writer.append(set_op("a", "3")).await.unwrap();

        let mut ks = KeySpace::new();
        let outcome = replay_oplog(&path, &mut ks, 0).unwrap();

        assert_eq!(outcome.records_applied, 4);
        assert_eq!(outcome.last_sequence, 4);
        assert_eq!(ks.len(), 2);
        match ks.get("a", Utc::now()) {
            Lookup::Live(e) => assert_eq!(e.value, Value::Str("3".into())),
            other => panic!("expected a=3, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_replay_skips_up_to_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.oplog");

        let writer = OplogWriter::open(&path, FlushPolicy::Always, 0).unwrap();
        for key in ["a", "b", "c"] {
            writer.append(set_op(key, "v")).await.unwrap();
        }

        let mut ks = KeySpace::new();
        let outcome = replay_oplog(&path, &mut ks, 2).unwrap();

        assert_eq!(outcome.records_applied, 1);
        assert_eq!(outcome.records_skipped, 2);
        assert_eq!(ks.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_truncates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.oplog");

        let writer = OplogWriter::open(&path, FlushPolicy::Always, 0).unwrap();
        writer.append(set_op("a", "1")).await.unwrap();
        writer.append(set_op("b", "2")).await.unwrap();
        drop(writer);

        // Chop into the second record.
        let full = std::fs::read(&path).unwrap();
        let first_body = u32::from_le_bytes(full[..4].try_into().unwrap()) as usize;
        let boundary = 4 + first_body + 4;
        std::fs::write(&path, &full[..boundary + 5]).unwrap();

        let mut ks = KeySpace::new();
        let outcome = replay_oplog(&path, &mut ks, 0).unwrap();

        assert_eq!(outcome.records_applied, 1);
        assert!(outcome.truncated_bytes > 0);
        assert_eq!(ks.len(), 1);

        // The file itself was cut back to the valid prefix, so a second
        // replay is clean.
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, boundary);
        let outcome = replay_oplog(&path, &mut KeySpace::new(), 0).unwrap();
        assert_eq!(outcome.truncated_bytes, 0);
    }

    #[tokio::test]
    async fn test_replay_drops_expired_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.oplog");

        let writer = OplogWriter::open(&path, FlushPolicy::Always, 0).unwrap();
        writer
            .append(LogOp::Set {
                key: "gone".into(),
                value: Value::Str("v".into()),
                expires_at: Some(Utc::now() - Duration::seconds(10)),
            })
            .await
            .unwrap();
        writer.append(set_op("kept", "v")).await.unwrap();

        let mut ks = KeySpace::new();
        replay_oplog(&path, &mut ks, 0).unwrap();

        assert_eq!(ks.len(), 1);
        assert!(matches!(ks.get("gone", Utc::now()), Lookup::Absent));
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut ks = KeySpace::new();
        let outcome = replay_oplog(&dir.path().join("absent"), &mut ks, 0).unwrap();
        assert_eq!(outcome.records_applied, 0);
        assert!(ks.is_empty());
    }
}
