//! Snapshot writer: checksummed serialization with an atomic swap.

use super::format::{
    SnapshotEntry, SnapshotError, SnapshotHeader, SNAPSHOT_END_MARKER, SNAPSHOT_HEADER_LEN,
    SNAPSHOT_TRAILER_LEN,
};
use crc32fast::Hasher;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Streams a snapshot into a file, keeping a running CRC32 over everything
/// ahead of the trailer.
pub struct SnapshotWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    hasher: Hasher,
    bytes_written: u64,
}

impl SnapshotWriter {
    pub fn create(path: &Path) -> Result<Self, SnapshotError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            path: path.to_path_buf(),
            hasher: Hasher::new(),
            bytes_written: 0,
        })
    }

    /// Write the zero-padded header slot.
    pub fn write_header(&mut self, header: &SnapshotHeader) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec(header)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        if json.len() > SNAPSHOT_HEADER_LEN {
            return Err(SnapshotError::Serialization(format!(
                "header is {} bytes, slot is {}",
                json.len(),
                SNAPSHOT_HEADER_LEN
            )));
        }

        let mut padded = vec![0u8; SNAPSHOT_HEADER_LEN];
        padded[..json.len()].copy_from_slice(&json);
        self.write_bytes(&padded)
    }

    /// Write one length-prefixed entry.
    pub fn write_entry(&mut self, entry: &SnapshotEntry) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec(entry)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        self.write_bytes(&(json.len() as u32).to_le_bytes())?;
        self.write_bytes(&json)
    }

    /// Write the trailer and make the file durable. The trailer itself is
    /// not part of the checksummed region.
    pub fn finalize(mut self) -> Result<(), SnapshotError> {
        let checksum = self.hasher.finalize();

        let mut trailer = [0u8; SNAPSHOT_TRAILER_LEN];
        trailer[..8].copy_from_slice(SNAPSHOT_END_MARKER);
        trailer[8..12].copy_from_slice(&checksum.to_le_bytes());

        self.writer.write_all(&trailer)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        self.writer.write_all(bytes)?;
        self.hasher.update(bytes);
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

/// Serialize `entries` to a temp file beside `dest`, then atomically rename
/// it into place. A crash anywhere before the rename leaves the previous
/// snapshot untouched.
pub fn write_snapshot(
    dest: &Path,
    sequence: u64,
    entries: &[SnapshotEntry],
) -> Result<(), SnapshotError> {
    let temp = temp_path(dest);

    let result = (|| {
        let mut writer = SnapshotWriter::create(&temp)?;
        writer.write_header(&SnapshotHeader::new(sequence, entries.len() as u64))?;
        for entry in entries {
            writer.write_entry(entry)?;
        }
        writer.finalize()?;
        std::fs::rename(&temp, dest)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp);
    } else {
        info!(
            entries = entries.len(),
            sequence,
            path = %dest.display(),
            "snapshot written"
        );
    }
    result
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Value;
    use tempfile::TempDir;

    fn entry(key: &str) -> SnapshotEntry {
        SnapshotEntry {
            key: key.into(),
            value: Value::Str("v".into()),
            expires_at: None,
        }
    }

    #[test]
    fn test_write_snapshot_creates_file_atomically() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("snapshot.fkv");

        write_snapshot(&dest, 9, &[entry("a"), entry("b")]).unwrap();

        assert!(dest.exists());
        assert!(!temp_path(&dest).exists());

        let len = std::fs::metadata(&dest).unwrap().len() as usize;
        assert!(len > SNAPSHOT_HEADER_LEN + SNAPSHOT_TRAILER_LEN);
    }

    #[test]
    fn test_rewrite_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("snapshot.fkv");

        write_snapshot(&dest, 1, &[entry("a")]).unwrap();
        let first_len = std::fs::metadata(&dest).unwrap().len();

        write_snapshot(&dest, 2, &[entry("a"), entry("b"), entry("c")]).unwrap();
        assert!(std::fs::metadata(&dest).unwrap().len() > first_len);
    }

    #[test]
    fn test_empty_snapshot_is_valid_shape() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("snapshot.fkv");

        write_snapshot(&dest, 0, &[]).unwrap();
        let len = std::fs::metadata(&dest).unwrap().len() as usize;
        assert_eq!(len, SNAPSHOT_HEADER_LEN + SNAPSHOT_TRAILER_LEN);
    }
}
