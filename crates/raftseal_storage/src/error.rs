//! Error types for the raw WAL and snapshot engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the raw WAL and snapshot engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No WAL segments exist in the directory.
    #[error("no WAL found in {}", dir.display())]
    NoWal {
        /// The directory that was searched.
        dir: PathBuf,
    },

    /// A WAL already exists where a new one was to be created.
    #[error("WAL already exists in {}", dir.display())]
    WalExists {
        /// The directory that already holds segments.
        dir: PathBuf,
    },

    /// A record was cut short at the end of a segment.
    ///
    /// This is what a crash in the middle of an append leaves behind, and
    /// the only condition [`crate::repair_wal`] fixes.
    #[error("unexpected end of WAL in {} at offset {offset}", path.display())]
    UnexpectedEof {
        /// The segment file holding the partial record.
        path: PathBuf,
        /// Offset of the first byte of the partial record.
        offset: u64,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch in {} at offset {offset}: expected {expected:08x}, got {actual:08x}", path.display())]
    ChecksumMismatch {
        /// The segment file.
        path: PathBuf,
        /// Offset of the damaged record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Two segments disagree on the WAL metadata.
    #[error("conflicting metadata found in WAL {}", dir.display())]
    MetadataConflict {
        /// The WAL directory.
        dir: PathBuf,
    },

    /// The WAL has no record for the snapshot it was opened at.
    #[error("snapshot (index {index}, term {term}) not found in WAL")]
    SnapshotNotFound {
        /// Requested snapshot index.
        index: u64,
        /// Requested snapshot term.
        term: u64,
    },

    /// The WAL holds a snapshot record at the requested index with another term.
    #[error("snapshot term mismatch at index {index}: expected {expected}, found {found}")]
    SnapshotMismatch {
        /// Snapshot index.
        index: u64,
        /// Term the caller asked for.
        expected: u64,
        /// Term recorded in the WAL.
        found: u64,
    },

    /// A snapshot file is damaged.
    #[error("snapshot corruption in {}: {message}", path.display())]
    SnapshotCorruption {
        /// The snapshot file.
        path: PathBuf,
        /// Description of the damage.
        message: String,
    },

    /// Another handle holds the WAL tail lock.
    #[error("WAL segment is locked: {}", path.display())]
    Locked {
        /// The locked segment file.
        path: PathBuf,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The WAL handle is closed.
    #[error("WAL is closed")]
    Closed,
}

impl StorageError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates a snapshot corruption error.
    pub fn snapshot_corruption(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SnapshotCorruption {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns `true` if this is the truncated-tail condition a repair can fix.
    #[must_use]
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEof { .. })
    }

    /// Returns `true` if the error means the path does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
