//! # raftseal storage
//!
//! Raw write-ahead log and snapshot engine used underneath the encrypted
//! raft logger.
//!
//! This crate knows how to frame, append, replay and repair raft log
//! records, and how to save and load snapshot files. It never interprets
//! entry payloads and knows nothing about encryption: the layer above
//! hands it already-sealed bytes.
//!
//! ## Example
//!
//! ```rust
//! use raftseal_storage::{Entry, FileWal, HardState, WalOptions, WalSnapshot};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let wal_dir = dir.path().join("wal");
//!
//! let wal = FileWal::create(&wal_dir, b"metadata", WalOptions::default()).unwrap();
//! let hs = HardState { term: 1, vote: 1, commit: 1 };
//! wal.save(&hs, &[Entry::new(1, 1, b"hello".to_vec())]).unwrap();
//! wal.close().unwrap();
//!
//! let wal = FileWal::open(&wal_dir, WalSnapshot::default(), WalOptions::default()).unwrap();
//! let data = wal.read_all().unwrap();
//! assert_eq!(data.entries.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod snap;
mod types;
pub mod wal;

pub use error::{StorageError, StorageResult};
pub use snap::{
    decode_snapshot, encode_snapshot, list_snapshots, parse_snapshot_name, snapshot_name,
    FileSnapshotter, SNAP_EXT,
};
pub use types::{
    ConfState, Entry, EntryType, HardState, Snapshot, SnapshotMetadata, WalData, WalSnapshot,
};
pub use wal::{
    install_dir, list_wal_segments, parse_segment_name, repair_wal, segment_name, temp_dir_for,
    wal_exists, FileWal, WalOptions,
};
