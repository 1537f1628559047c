//! Snapshot reader and validation.

use super::format::{
    SnapshotEntry, SnapshotError, SnapshotHeader, SNAPSHOT_END_MARKER, SNAPSHOT_HEADER_LEN,
    SNAPSHOT_TRAILER_LEN, SNAPSHOT_VERSION,
};
use crc32fast::Hasher;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Load and fully validate a snapshot: magic, version, entry framing and the
/// trailing checksum. Any failure rejects the whole file; a rejected
/// snapshot falls back to log-only recovery at the call site.
pub fn read_snapshot(path: &Path) -> Result<(SnapshotHeader, Vec<SnapshotEntry>), SnapshotError> {
    let file = File::open(path)
        .map_err(|e| SnapshotError::NotFound(format!("{}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Hasher::new();

    // Header slot.
    let mut header_bytes = [0u8; SNAPSHOT_HEADER_LEN];
    read_fully(&mut reader, &mut header_bytes)?;
    hasher.update(&header_bytes);

    let json_end = header_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(SNAPSHOT_HEADER_LEN);
    let header: SnapshotHeader = serde_json::from_slice(&header_bytes[..json_end])
        .map_err(|e| SnapshotError::Deserialization(e.to_string()))?;

    if !header.verify_magic() {
        return Err(SnapshotError::InvalidMagic);
    }
    if header.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::InvalidVersion(header.version));
    }

    // Entries.
    let mut entries = Vec::with_capacity(header.entry_count as usize);
    for _ in 0..header.entry_count {
        let mut len_bytes = [0u8; 4];
        read_fully(&mut reader, &mut len_bytes)?;
        hasher.update(&len_bytes);

        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut body = vec![0u8; len];
        read_fully(&mut reader, &mut body)?;
        hasher.update(&body);

        let entry: SnapshotEntry = serde_json::from_slice(&body)
            .map_err(|e| SnapshotError::Deserialization(e.to_string()))?;
        entries.push(entry);
    }

    // Trailer.
    let mut trailer = [0u8; SNAPSHOT_TRAILER_LEN];
    read_fully(&mut reader, &mut trailer)?;

    if &trailer[..8] != SNAPSHOT_END_MARKER {
        return Err(SnapshotError::InvalidEndMarker);
    }
    let stored = u32::from_le_bytes(trailer[8..12].try_into().expect("fixed slice"));
    if stored != hasher.finalize() {
        return Err(SnapshotError::ChecksumMismatch);
    }

    Ok((header, entries))
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), SnapshotError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SnapshotError::Truncated
        } else {
            SnapshotError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Value;
    use crate::snapshot::writer::write_snapshot;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn sample_entries() -> Vec<SnapshotEntry> {
        vec![
            SnapshotEntry {
                key: "a".into(),
                value: Value::Str("1".into()),
                expires_at: None,
            },
            SnapshotEntry {
                key: "b".into(),
                value: Value::List(["x".to_string(), "y".to_string()].into()),
                expires_at: Some(Utc::now() + Duration::hours(1)),
            },
        ]
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.fkv");
        write_snapshot(&path, 17, &sample_entries()).unwrap();

        let (header, entries) = read_snapshot(&path).unwrap();
        assert_eq!(header.sequence, 17);
        assert_eq!(header.entry_count, 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "a");
        assert_eq!(entries[1].value.type_name(), "list");
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.fkv");
        write_snapshot(&path, 1, &sample_entries()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        // Flip a byte inside the entry region, past the header slot.
        let idx = SNAPSHOT_HEADER_LEN + 6;
        bytes[idx] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read_snapshot(&path),
            Err(SnapshotError::ChecksumMismatch) | Err(SnapshotError::Deserialization(_))
        ));
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.fkv");
        write_snapshot(&path, 1, &sample_entries()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - SNAPSHOT_TRAILER_LEN - 2]).unwrap();

        assert!(matches!(read_snapshot(&path), Err(SnapshotError::Truncated)));
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.fkv");
        write_snapshot(&path, 1, &[]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        // The magic field is serialized as a JSON byte array; corrupt its
        // first element.
        let json = String::from_utf8(bytes[..SNAPSHOT_HEADER_LEN].to_vec()).unwrap();
        let patched = json.replacen("[70,", "[88,", 1);
        bytes[..SNAPSHOT_HEADER_LEN].copy_from_slice(patched.as_bytes());
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(read_snapshot(&path), Err(SnapshotError::InvalidMagic)));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_snapshot(&dir.path().join("absent")),
            Err(SnapshotError::NotFound(_))
        ));
    }
}
