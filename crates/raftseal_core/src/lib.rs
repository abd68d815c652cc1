//! # raftseal core
//!
//! Encrypted storage for a raft node's write-ahead log and snapshots.
//!
//! This crate provides:
//! - A payload codec (`Encrypter`/`Decrypter`, AES-256-GCM, no-op and
//!   multi-key decrypters)
//! - The `MaybeEncryptedRecord` envelope stored in place of each payload
//! - WAL and snapshotter wrappers that encrypt on write and decrypt on read
//! - Migration of older unencrypted layouts, and repair of torn WAL tails
//! - [`EncryptedRaftLogger`], which ties it together for the consensus core
//!
//! ## Example
//!
//! ```rust
//! use raftseal_core::{CancelToken, DataEncryptionKey, EncryptedRaftLogger, LoggerConfig};
//! use raftseal_storage::{Entry, HardState};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let key = DataEncryptionKey::generate();
//!
//! let logger = EncryptedRaftLogger::new(LoggerConfig::new(dir.path()), &key).unwrap();
//! logger.bootstrap_new(b"node-1").unwrap();
//! let hs = HardState { term: 1, vote: 1, commit: 1 };
//! logger.save_entries(&hs, &[Entry::new(1, 1, b"put x=1".to_vec())]).unwrap();
//! logger.close().unwrap();
//!
//! let logger = EncryptedRaftLogger::new(LoggerConfig::new(dir.path()), &key).unwrap();
//! let (snapshot, data) = logger.bootstrap_from_disk(&CancelToken::new(), &[]).unwrap();
//! assert!(snapshot.is_none());
//! assert_eq!(data.metadata, b"node-1");
//! assert_eq!(data.entries[0].data, b"put x=1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod crypto;
mod engine;
mod error;
mod layout;
mod logger;
mod migration;
pub mod record;
mod snap;
mod wal;

pub use config::LoggerConfig;
pub use crypto::{
    AesGcmCrypter, AesGcmSuite, Algorithm, CipherSuite, CrypterSet, DataEncryptionKey, Decrypter,
    Encrypter, MultiDecrypter, NoopCrypter,
};
pub use engine::{RawSnapFactory, RawWalFactory, SnapFactory, Snapshotter, Wal, WalFactory};
pub use error::{CoreError, CoreResult};
pub use layout::{Layout, LayoutVersion, VersionDirs, CHAIN};
pub use logger::EncryptedRaftLogger;
pub use migration::{migrate_snapshot, migrate_wals, read_repair_wal, CancelToken};
pub use record::MaybeEncryptedRecord;
pub use snap::{EncryptedSnapFactory, EncryptedSnapshotter};
pub use wal::{EncryptedWal, EncryptedWalFactory};
