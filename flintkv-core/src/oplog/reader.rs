//! Operation-log reader for replay and recovery.

use super::record::{LogError, LogRecord, MAX_RECORD_BYTES};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Sequential reader that tracks the byte length of the valid prefix.
///
/// A partial or corrupt record at the tail (a crash mid-append) surfaces as
/// [`LogError::TornTail`] carrying the offset recovery should truncate to.
pub struct OplogReader {
    reader: BufReader<File>,
    path: PathBuf,
    valid_len: u64,
    records_read: u64,
}

impl OplogReader {
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let file = File::open(path)
            .map_err(|e| LogError::NotFound(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            valid_len: 0,
            records_read: 0,
        })
    }

    /// Read the next record; `Ok(None)` at a clean end of file.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>, LogError> {
        let mut len_bytes = [0u8; 4];
        match read_exact_or_eof(&mut self.reader, &mut len_bytes)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => return Err(self.torn()),
            ReadOutcome::Full => {}
        }

        let body_len = u32::from_le_bytes(len_bytes);
        if body_len > MAX_RECORD_BYTES {
            return Err(self.torn());
        }

        let mut body = vec![0u8; body_len as usize];
        match read_exact_or_eof(&mut self.reader, &mut body)? {
            ReadOutcome::Full => {}
            _ => return Err(self.torn()),
        }

        let mut checksum_bytes = [0u8; 4];
        match read_exact_or_eof(&mut self.reader, &mut checksum_bytes)? {
            ReadOutcome::Full => {}
            _ => return Err(self.torn()),
        }
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let mut record: LogRecord = match serde_json::from_slice(&body) {
            Ok(record) => record,
            Err(_) => return Err(self.torn()),
        };

        record.checksum = stored_checksum;
        if !record.verify_checksum()? {
            return Err(self.torn());
        }

        self.valid_len += 4 + body_len as u64 + 4;
        self.records_read += 1;
        Ok(Some(record))
    }

    /// Byte length of the prefix containing only whole, verified records.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn torn(&self) -> LogError {
        LogError::TornTail {
            valid_len: self.valid_len,
        }
    }
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// `read_exact` that distinguishes a clean EOF from a torn read.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<ReadOutcome, LogError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Value;
    use crate::oplog::record::LogOp;
    use crate::oplog::writer::{FlushPolicy, OplogWriter};
    use tempfile::TempDir;

    async fn write_records(path: &Path, keys: &[&str]) {
        let writer = OplogWriter::open(path, FlushPolicy::Always, 0).unwrap();
        for key in keys {
            writer
                .append(LogOp::Set {
                    key: key.to_string(),
                    value: Value::Str("v".into()),
                    expires_at: None,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.oplog");
        write_records(&path, &["a", "b"]).await;

        let mut reader = OplogReader::open(&path).unwrap();
        assert_eq!(reader.next_record().unwrap().unwrap().sequence, 1);
        assert_eq!(reader.next_record().unwrap().unwrap().sequence, 2);
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.records_read(), 2);
    }

    #[tokio::test]
    async fn test_torn_tail_reports_valid_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.oplog");
        write_records(&path, &["a", "b"]).await;

        let full = std::fs::read(&path).unwrap();
        // First frame length comes straight off the wire; cut 3 bytes into
        // the second record.
        let first_body = u32::from_le_bytes(full[..4].try_into().unwrap()) as usize;
        let cut = (4 + first_body + 4) + 3;
        std::fs::write(&path, &full[..cut.min(full.len())]).unwrap();

        let mut reader = OplogReader::open(&path).unwrap();
        let mut valid = 0;
        loop {
            match reader.next_record() {
                Ok(Some(_)) => valid += 1,
                Ok(None) => break,
                Err(LogError::TornTail { valid_len }) => {
                    assert!(valid_len as usize <= cut);
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(valid <= 1);
    }

    #[tokio::test]
    async fn test_flipped_byte_is_torn() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.oplog");
        write_records(&path, &["a"]).await;

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = OplogReader::open(&path).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(LogError::TornTail { valid_len: 0 })
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            OplogReader::open(&dir.path().join("absent.oplog")),
            Err(LogError::NotFound(_))
        ));
    }
}
