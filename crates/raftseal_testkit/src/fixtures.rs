//! Test fixtures and state directory helpers.
//!
//! Provides temporary state directories, entry builders, and writers for
//! the older unencrypted layouts so migration paths can be exercised.

use raftseal_core::{DataEncryptionKey, EncryptedRaftLogger, LayoutVersion, LoggerConfig};
use raftseal_storage::{
    Entry, FileSnapshotter, FileWal, HardState, Snapshot, SnapshotMetadata, WalOptions,
};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary raft state directory, removed on drop.
pub struct TempState {
    dir: TempDir,
}

impl TempState {
    /// Creates an empty state directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the state directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns a path under the state directory.
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Logger configuration for this directory, with small segments.
    pub fn config(&self) -> LoggerConfig {
        LoggerConfig::new(self.path()).wal_segment_size(16 * 1024)
    }

    /// Creates a logger for this directory.
    pub fn logger(&self, key: &DataEncryptionKey) -> EncryptedRaftLogger {
        EncryptedRaftLogger::new(self.config(), key).expect("Failed to create logger")
    }

    /// Returns the WAL and snapshot directories of `version`.
    pub fn version_dirs(&self, version: LayoutVersion) -> (PathBuf, PathBuf) {
        let dirs = version.dirs().expect("version has no directories");
        (self.join(dirs.wal), self.join(dirs.snap))
    }
}

impl Default for TempState {
    fn default() -> Self {
        Self::new()
    }
}

/// Contents to write into an unencrypted layout.
#[derive(Debug, Clone, Default)]
pub struct PlainLayout {
    /// WAL metadata.
    pub metadata: Vec<u8>,
    /// Entries, written in one batch.
    pub entries: Vec<Entry>,
    /// Hard state written with the entries.
    pub hard_state: HardState,
    /// Snapshot to save, with a matching WAL marker.
    pub snapshot: Option<Snapshot>,
}

impl PlainLayout {
    /// A layout holding `metadata` and entries `range` in term 1.
    pub fn new(metadata: &[u8], range: RangeInclusive<u64>) -> Self {
        let entries = entries(range);
        let commit = entries.last().map_or(0, |e| e.index);
        Self {
            metadata: metadata.to_vec(),
            entries,
            hard_state: hard_state(1, commit),
            snapshot: None,
        }
    }

    /// Adds a snapshot at `index` (term 1) holding `data`.
    #[must_use]
    pub fn with_snapshot(mut self, index: u64, data: &[u8]) -> Self {
        self.snapshot = Some(snapshot(1, index, data));
        self
    }

    /// Writes this layout under `state` in `version`, which must be an
    /// unencrypted one.
    pub fn write(&self, state: &TempState, version: LayoutVersion) {
        let (wal_dir, snap_dir) = state.version_dirs(version);
        let wal = FileWal::create(&wal_dir, &self.metadata, WalOptions::default())
            .expect("Failed to create WAL");
        wal.save(&self.hard_state, &self.entries)
            .expect("Failed to save entries");
        std::fs::create_dir_all(&snap_dir).expect("Failed to create snapshot dir");
        if let Some(snapshot) = &self.snapshot {
            wal.save_snapshot(&snapshot.wal_marker())
                .expect("Failed to save WAL snapshot marker");
            FileSnapshotter::new(&snap_dir)
                .save_snap(snapshot)
                .expect("Failed to save snapshot");
        }
        wal.close().expect("Failed to close WAL");
    }
}

/// Entries for `range`, term 1, with payload `"entry {index}"`.
pub fn entries(range: RangeInclusive<u64>) -> Vec<Entry> {
    range
        .map(|i| Entry::new(1, i, format!("entry {i}").into_bytes()))
        .collect()
}

/// A hard state with `vote` 1.
pub fn hard_state(term: u64, commit: u64) -> HardState {
    HardState {
        term,
        vote: 1,
        commit,
    }
}

/// A snapshot at `(term, index)` with three voters.
pub fn snapshot(term: u64, index: u64, data: &[u8]) -> Snapshot {
    Snapshot {
        metadata: SnapshotMetadata {
            index,
            term,
            conf_state: raftseal_storage::ConfState {
                voters: vec![1, 2, 3],
                learners: Vec::new(),
            },
        },
        data: data.to_vec(),
    }
}

/// A fresh random key.
pub fn key() -> DataEncryptionKey {
    DataEncryptionKey::generate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_plain_layout() {
        let state = TempState::new();
        PlainLayout::new(b"meta", 1..=3)
            .with_snapshot(2, b"snap")
            .write(&state, LayoutVersion::PlainV3);

        assert_eq!(LayoutVersion::detect(state.path()), LayoutVersion::PlainV3);
        let (_, snap_dir) = state.version_dirs(LayoutVersion::PlainV3);
        let loaded = FileSnapshotter::new(snap_dir).load().unwrap().unwrap();
        assert_eq!(loaded.data, b"snap");
    }
}
