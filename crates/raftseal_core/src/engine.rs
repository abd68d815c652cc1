//! Interfaces to the underlying WAL and snapshot engine.
//!
//! The encrypted wrappers and the migration code only talk to these traits,
//! so a WAL can be read through one implementation and written through
//! another. [`RawWalFactory`] and [`RawSnapFactory`] expose the unencrypted
//! engine from `raftseal_storage` through them.

use crate::error::CoreResult;
use raftseal_storage::{
    Entry, FileSnapshotter, FileWal, HardState, Snapshot, WalData, WalOptions, WalSnapshot,
};
use std::path::Path;

/// An open write-ahead log.
///
/// Methods take `&self`; implementations serialize them internally.
pub trait Wal: Send + Sync {
    /// Replays the log from the snapshot it was opened at.
    ///
    /// Must succeed before the handle accepts writes.
    fn read_all(&self) -> CoreResult<WalData>;

    /// Appends `entries` and `hard_state` durably.
    fn save(&self, hard_state: &HardState, entries: &[Entry]) -> CoreResult<()>;

    /// Records that a snapshot exists at `snapshot`.
    fn save_snapshot(&self, snapshot: &WalSnapshot) -> CoreResult<()>;

    /// Releases file handles and locks.
    fn close(&self) -> CoreResult<()>;
}

/// Creates and opens WALs.
pub trait WalFactory: Send + Sync {
    /// Creates a new WAL in `dir` holding `metadata`.
    fn create(&self, dir: &Path, metadata: &[u8]) -> CoreResult<Box<dyn Wal>>;

    /// Opens the WAL in `dir` for replay from `snapshot`.
    fn open(&self, dir: &Path, snapshot: WalSnapshot) -> CoreResult<Box<dyn Wal>>;
}

/// Saves and loads snapshots in one directory.
pub trait Snapshotter: Send + Sync {
    /// Durably writes `snapshot`.
    fn save_snap(&self, snapshot: &Snapshot) -> CoreResult<()>;

    /// Loads the newest snapshot, or `None` when there is none.
    fn load(&self) -> CoreResult<Option<Snapshot>>;
}

/// Creates snapshotters.
pub trait SnapFactory: Send + Sync {
    /// Returns a snapshotter for `dir`. Performs no I/O.
    fn new_snapshotter(&self, dir: &Path) -> Box<dyn Snapshotter>;
}

impl<W: Wal + ?Sized> Wal for Box<W> {
    fn read_all(&self) -> CoreResult<WalData> {
        (**self).read_all()
    }

    fn save(&self, hard_state: &HardState, entries: &[Entry]) -> CoreResult<()> {
        (**self).save(hard_state, entries)
    }

    fn save_snapshot(&self, snapshot: &WalSnapshot) -> CoreResult<()> {
        (**self).save_snapshot(snapshot)
    }

    fn close(&self) -> CoreResult<()> {
        (**self).close()
    }
}

impl Wal for FileWal {
    fn read_all(&self) -> CoreResult<WalData> {
        Ok(FileWal::read_all(self)?)
    }

    fn save(&self, hard_state: &HardState, entries: &[Entry]) -> CoreResult<()> {
        Ok(FileWal::save(self, hard_state, entries)?)
    }

    fn save_snapshot(&self, snapshot: &WalSnapshot) -> CoreResult<()> {
        Ok(FileWal::save_snapshot(self, snapshot)?)
    }

    fn close(&self) -> CoreResult<()> {
        Ok(FileWal::close(self)?)
    }
}

impl Snapshotter for FileSnapshotter {
    fn save_snap(&self, snapshot: &Snapshot) -> CoreResult<()> {
        Ok(FileSnapshotter::save_snap(self, snapshot)?)
    }

    fn load(&self) -> CoreResult<Option<Snapshot>> {
        Ok(FileSnapshotter::load(self)?)
    }
}

/// Opens WALs with the raw, unencrypted engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawWalFactory {
    options: WalOptions,
}

impl RawWalFactory {
    /// Creates a factory whose WALs use `options`.
    #[must_use]
    pub const fn new(options: WalOptions) -> Self {
        Self { options }
    }
}

impl WalFactory for RawWalFactory {
    fn create(&self, dir: &Path, metadata: &[u8]) -> CoreResult<Box<dyn Wal>> {
        Ok(Box::new(FileWal::create(dir, metadata, self.options)?))
    }

    fn open(&self, dir: &Path, snapshot: WalSnapshot) -> CoreResult<Box<dyn Wal>> {
        Ok(Box::new(FileWal::open(dir, snapshot, self.options)?))
    }
}

/// Creates raw, unencrypted snapshotters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSnapFactory;

impl SnapFactory for RawSnapFactory {
    fn new_snapshotter(&self, dir: &Path) -> Box<dyn Snapshotter> {
        Box::new(FileSnapshotter::new(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn raw_factory_round_trip() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        let factory = RawWalFactory::default();

        let wal = factory.create(&dir, b"meta").unwrap();
        wal.save(
            &HardState {
                term: 1,
                vote: 0,
                commit: 1,
            },
            &[Entry::new(1, 1, b"x".to_vec())],
        )
        .unwrap();
        wal.close().unwrap();

        let wal = factory.open(&dir, WalSnapshot::default()).unwrap();
        let data = wal.read_all().unwrap();
        assert_eq!(data.metadata, b"meta");
        assert_eq!(data.entries.len(), 1);
    }

    #[test]
    fn raw_errors_convert() {
        let root = tempdir().unwrap();
        let err = RawWalFactory::default()
            .open(&root.path().join("none"), WalSnapshot::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            crate::CoreError::Storage(raftseal_storage::StorageError::NoWal { .. })
        ));
    }

    #[test]
    fn raw_snapshotter_loads_none() {
        let root = tempdir().unwrap();
        let snapper = RawSnapFactory.new_snapshotter(root.path());
        assert!(snapper.load().unwrap().is_none());
    }
}
