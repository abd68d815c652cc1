//! On-disk layout versions under a state directory.
//!
//! Three generations of WAL/snapshot directory pairs exist, newest first:
//!
//! | Version       | WAL dir            | Snapshot dir        |
//! |---------------|--------------------|---------------------|
//! | `EncryptedV3` | `wal-v3-encrypted` | `snap-v3-encrypted` |
//! | `PlainV3`     | `wal-v3`           | `snap-v3`           |
//! | `PlainV2`     | `wal`              | `snap`              |
//!
//! The newest pair is the only one ever written. Older pairs hold plain
//! records; they are read once, to build the newest pair, and are left in
//! place afterwards.

use crate::engine::{SnapFactory, WalFactory};
use crate::error::CoreResult;
use crate::migration::{migrate_snapshot, migrate_wals, CancelToken};
use raftseal_storage::{wal_exists, WalSnapshot};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// A generation of the on-disk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayoutVersion {
    /// No WAL in any known layout.
    Missing,
    /// Unencrypted `wal` / `snap`.
    PlainV2,
    /// Unencrypted `wal-v3` / `snap-v3`.
    PlainV3,
    /// Encrypted `wal-v3-encrypted` / `snap-v3-encrypted`.
    EncryptedV3,
}

impl LayoutVersion {
    /// The version new state is written in.
    pub const CURRENT: Self = Self::EncryptedV3;

    /// Returns the newest version whose WAL exists under `state_dir`.
    #[must_use]
    pub fn detect(state_dir: &Path) -> Self {
        CHAIN
            .iter()
            .find(|dirs| wal_exists(&state_dir.join(dirs.wal)))
            .map_or(Self::Missing, |dirs| dirs.version)
    }

    /// Returns the directory names for this version.
    #[must_use]
    pub fn dirs(self) -> Option<&'static VersionDirs> {
        CHAIN.iter().find(|dirs| dirs.version == self)
    }
}

impl fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Missing => "missing",
            Self::PlainV2 => "plain-v2",
            Self::PlainV3 => "plain-v3",
            Self::EncryptedV3 => "encrypted-v3",
        };
        f.write_str(name)
    }
}

/// Directory names of one layout version.
#[derive(Debug)]
pub struct VersionDirs {
    /// The version.
    pub version: LayoutVersion,
    /// WAL directory name.
    pub wal: &'static str,
    /// Snapshot directory name.
    pub snap: &'static str,
    /// Whether payloads in this version are encrypted records.
    pub encrypted: bool,
}

/// Every known layout, newest first.
pub static CHAIN: [VersionDirs; 3] = [
    VersionDirs {
        version: LayoutVersion::EncryptedV3,
        wal: "wal-v3-encrypted",
        snap: "snap-v3-encrypted",
        encrypted: true,
    },
    VersionDirs {
        version: LayoutVersion::PlainV3,
        wal: "wal-v3",
        snap: "snap-v3",
        encrypted: false,
    },
    VersionDirs {
        version: LayoutVersion::PlainV2,
        wal: "wal",
        snap: "snap",
        encrypted: false,
    },
];

/// Paths of the layout versions under one state directory.
#[derive(Debug, Clone)]
pub struct Layout {
    state_dir: PathBuf,
}

impl Layout {
    /// Creates the layout for `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Returns the state directory.
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// WAL directory of the current version.
    #[must_use]
    pub fn wal_dir(&self) -> PathBuf {
        self.state_dir.join(CHAIN[0].wal)
    }

    /// Snapshot directory of the current version.
    #[must_use]
    pub fn snap_dir(&self) -> PathBuf {
        self.state_dir.join(CHAIN[0].snap)
    }

    /// Returns the newest version present.
    #[must_use]
    pub fn detect(&self) -> LayoutVersion {
        LayoutVersion::detect(&self.state_dir)
    }

    /// Builds the current snapshot directory from the newest older one, if
    /// the current one is missing. Older layouts are read through
    /// `src_factory`.
    ///
    /// Returns the version migrated from, if any.
    pub(crate) fn ensure_snapshot_dir(
        &self,
        cancel: &CancelToken,
        src_factory: &dyn SnapFactory,
        dst_factory: &dyn SnapFactory,
    ) -> CoreResult<Option<LayoutVersion>> {
        let dst = self.snap_dir();
        if dst.exists() {
            return Ok(None);
        }
        for dirs in &CHAIN[1..] {
            let src = self.state_dir.join(dirs.snap);
            if !src.exists() {
                continue;
            }
            migrate_snapshot(cancel, &src, &dst, src_factory, dst_factory)?;
            info!(from = %dirs.version, to = %LayoutVersion::CURRENT, "migrated snapshot directory");
            return Ok(Some(dirs.version));
        }
        Ok(None)
    }

    /// Builds the current WAL from the newest older one, if the current
    /// WAL is missing. Older layouts are read through `src_factory`.
    ///
    /// Returns `Ok(false)` when no WAL exists in any version.
    pub(crate) fn ensure_wal(
        &self,
        cancel: &CancelToken,
        src_factory: &dyn WalFactory,
        dst_factory: &dyn WalFactory,
        snapshot: WalSnapshot,
    ) -> CoreResult<bool> {
        let dst = self.wal_dir();
        if wal_exists(&dst) {
            return Ok(true);
        }
        for dirs in &CHAIN[1..] {
            let src = self.state_dir.join(dirs.wal);
            if !wal_exists(&src) {
                continue;
            }
            migrate_wals(cancel, &src, &dst, src_factory, dst_factory, snapshot)?;
            info!(from = %dirs.version, to = %LayoutVersion::CURRENT, "migrated WAL directory");
            return Ok(true);
        }
        Ok(false)
    }
}
