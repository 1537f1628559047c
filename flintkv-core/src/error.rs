//! Command-path error taxonomy.
//!
//! Module-local errors (`LogError`, `SnapshotError`) convert into this
//! taxonomy at the store boundary; nothing on the command path is silently
//! dropped.

use thiserror::Error;

/// Errors surfaced synchronously to command callers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Eviction could not free enough space for a write.
    #[error("capacity exceeded: {required} bytes cannot fit under the {ceiling} byte ceiling")]
    CapacityExceeded { required: usize, ceiling: usize },

    /// Denied, disabled, unknown or malformed command.
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// The session must authenticate before issuing this command.
    #[error("authentication required")]
    AuthRequired,

    /// Credentials did not match.
    #[error("invalid username or password")]
    AuthFailed,

    /// Operation against a value of an incompatible type.
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,

    /// Checksum or framing failure on a snapshot or log file.
    #[error("corrupt persistence: {0}")]
    CorruptPersistence(String),

    /// Disk write or flush error under an unconditional durability contract.
    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),
}

impl From<crate::oplog::LogError> for StoreError {
    fn from(e: crate::oplog::LogError) -> Self {
        match e {
            crate::oplog::LogError::Io(io) => StoreError::IoFailure(io),
            other => StoreError::CorruptPersistence(other.to_string()),
        }
    }
}

impl From<crate::snapshot::SnapshotError> for StoreError {
    fn from(e: crate::snapshot::SnapshotError) -> Self {
        match e {
            crate::snapshot::SnapshotError::Io(io) => StoreError::IoFailure(io),
            other => StoreError::CorruptPersistence(other.to_string()),
        }
    }
}

impl StoreError {
    /// Stable error-class token used in wire replies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::CapacityExceeded { .. } => "CAPACITY",
            StoreError::CommandRejected(_) => "REJECTED",
            StoreError::AuthRequired => "NOAUTH",
            StoreError::AuthFailed => "WRONGPASS",
            StoreError::WrongType => "WRONGTYPE",
            StoreError::CorruptPersistence(_) => "CORRUPT",
            StoreError::IoFailure(_) => "IOERR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            StoreError::CapacityExceeded { required: 1, ceiling: 0 },
            StoreError::CommandRejected("x".into()),
            StoreError::AuthRequired,
            StoreError::AuthFailed,
            StoreError::WrongType,
            StoreError::CorruptPersistence("x".into()),
            StoreError::IoFailure(std::io::Error::new(std::io::ErrorKind::Other, "x")),
        ];

        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
