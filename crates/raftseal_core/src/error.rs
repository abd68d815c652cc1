//! Error types for raftseal core.

use crate::crypto::Algorithm;
use raftseal_storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in raftseal core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from the raw WAL or snapshot engine.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No registered decrypter accepted the record.
    ///
    /// Raised when no decrypter matches the record's algorithm, when the
    /// matching one rejects the ciphertext (wrong key, tampering), or when
    /// the record envelope itself cannot be parsed (`algorithm` is `None`).
    #[error("cannot decrypt record ({}): {reason}", describe_algorithm(algorithm))]
    CannotDecrypt {
        /// Algorithm named by the record, if it could be read.
        algorithm: Option<Algorithm>,
        /// Why decryption failed.
        reason: String,
    },

    /// Encryption failed.
    #[error("encryption failed ({algorithm}): {message}")]
    EncryptionFailed {
        /// Algorithm of the encrypter that failed.
        algorithm: Algorithm,
        /// Description of the failure.
        message: String,
    },

    /// A record envelope could not be serialized.
    #[error("record encoding failed: {message}")]
    RecordEncode {
        /// Description of the failure.
        message: String,
    },

    /// Key material is unusable.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// No WAL exists in any supported layout version.
    #[error("no WAL found under {}", dir.display())]
    NoWal {
        /// The state directory that was searched.
        dir: PathBuf,
    },

    /// A WAL already exists where a new one was to be bootstrapped.
    #[error("WAL already exists in {}", dir.display())]
    WalExists {
        /// The WAL directory.
        dir: PathBuf,
    },

    /// Reading a WAL failed.
    #[error("failed to read WAL in {}: {source}", dir.display())]
    WalRead {
        /// The WAL directory.
        dir: PathBuf,
        /// Underlying error.
        #[source]
        source: Box<CoreError>,
    },

    /// Loading a snapshot failed.
    #[error("failed to load snapshot from {}: {source}", dir.display())]
    SnapshotLoad {
        /// The snapshot directory.
        dir: PathBuf,
        /// Underlying error.
        #[source]
        source: Box<CoreError>,
    },

    /// Migrating a directory from an older layout failed.
    #[error("migration from {} to {} failed: {source}", src.display(), dst.display())]
    Migration {
        /// Source directory.
        src: PathBuf,
        /// Destination directory.
        dst: PathBuf,
        /// Underlying error.
        #[source]
        source: Box<CoreError>,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The logger has no open WAL (not bootstrapped, or closed).
    #[error("raft logger is not open")]
    NotOpen,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

fn describe_algorithm(algorithm: &Option<Algorithm>) -> String {
    match algorithm {
        Some(a) => a.to_string(),
        None => "unparseable envelope".to_string(),
    }
}

impl CoreError {
    /// Creates a cannot-decrypt error for a known algorithm.
    pub fn cannot_decrypt(algorithm: Algorithm, reason: impl Into<String>) -> Self {
        Self::CannotDecrypt {
            algorithm: Some(algorithm),
            reason: reason.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(algorithm: Algorithm, message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            algorithm,
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps an error with WAL directory context.
    pub fn wal_read(dir: impl Into<PathBuf>, source: CoreError) -> Self {
        Self::WalRead {
            dir: dir.into(),
            source: Box::new(source),
        }
    }

    /// Wraps an error with snapshot directory context.
    pub fn snapshot_load(dir: impl Into<PathBuf>, source: CoreError) -> Self {
        Self::SnapshotLoad {
            dir: dir.into(),
            source: Box::new(source),
        }
    }

    /// Wraps an error with migration context.
    pub fn migration(src: impl Into<PathBuf>, dst: impl Into<PathBuf>, source: CoreError) -> Self {
        Self::Migration {
            src: src.into(),
            dst: dst.into(),
            source: Box::new(source),
        }
    }

    /// Returns the innermost error, looking through context wrappers.
    #[must_use]
    pub fn root(&self) -> &CoreError {
        match self {
            Self::WalRead { source, .. }
            | Self::SnapshotLoad { source, .. }
            | Self::Migration { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` if a record could not be decrypted.
    #[must_use]
    pub fn is_cannot_decrypt(&self) -> bool {
        matches!(self.root(), Self::CannotDecrypt { .. })
    }

    /// Returns `true` for a WAL whose last segment ends in a partial record.
    #[must_use]
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self.root(), Self::Storage(e) if e.is_unexpected_eof())
    }

    /// Returns `true` if the error means a path does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Self::Storage(e) => e.is_not_found(),
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
