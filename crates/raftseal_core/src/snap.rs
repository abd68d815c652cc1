//! Snapshotter wrapper that encrypts snapshot data.
//!
//! Only `Snapshot::data` is encrypted. The metadata (index, term,
//! membership) stays readable so bootstrap can compare snapshots across
//! layout versions without a key.

use crate::crypto::CrypterSet;
use crate::engine::{SnapFactory, Snapshotter};
use crate::error::CoreResult;
use crate::record::{open, seal};
use raftseal_storage::Snapshot;
use std::path::Path;
use std::sync::Arc;

/// A snapshotter storing `data` as an encrypted record.
pub struct EncryptedSnapshotter {
    inner: Box<dyn Snapshotter>,
    crypters: CrypterSet,
}

impl EncryptedSnapshotter {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn Snapshotter>, crypters: CrypterSet) -> Self {
        Self { inner, crypters }
    }
}

impl Snapshotter for EncryptedSnapshotter {
    fn save_snap(&self, snapshot: &Snapshot) -> CoreResult<()> {
        let sealed = Snapshot {
            metadata: snapshot.metadata.clone(),
            data: seal(self.crypters.encrypter.as_ref(), &snapshot.data)?,
        };
        self.inner.save_snap(&sealed)
    }

    /// Loads and decrypts the newest snapshot.
    ///
    /// `Ok(None)` means there is no snapshot. A snapshot that exists but
    /// cannot be decrypted is an error.
    fn load(&self) -> CoreResult<Option<Snapshot>> {
        let Some(snapshot) = self.inner.load()? else {
            return Ok(None);
        };
        let data = open(self.crypters.decrypter.as_ref(), &snapshot.data)?;
        Ok(Some(Snapshot {
            metadata: snapshot.metadata,
            data,
        }))
    }
}

impl std::fmt::Debug for EncryptedSnapshotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedSnapshotter")
            .field("crypters", &self.crypters)
            .finish_non_exhaustive()
    }
}

/// Creates [`EncryptedSnapshotter`]s on top of another factory.
#[derive(Clone)]
pub struct EncryptedSnapFactory {
    inner: Arc<dyn SnapFactory>,
    crypters: CrypterSet,
}

impl EncryptedSnapFactory {
    /// Wraps `inner`, encrypting with `crypters`.
    pub fn new(inner: Arc<dyn SnapFactory>, crypters: CrypterSet) -> Self {
        Self { inner, crypters }
    }

    /// Returns a concrete snapshotter for `dir`.
    #[must_use]
    pub fn snapshotter(&self, dir: &Path) -> EncryptedSnapshotter {
        EncryptedSnapshotter::new(self.inner.new_snapshotter(dir), self.crypters.clone())
    }
}

impl SnapFactory for EncryptedSnapFactory {
    fn new_snapshotter(&self, dir: &Path) -> Box<dyn Snapshotter> {
        Box::new(self.snapshotter(dir))
    }
}

impl std::fmt::Debug for EncryptedSnapFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedSnapFactory")
            .field("crypters", &self.crypters)
            .finish_non_exhaustive()
    }
}
