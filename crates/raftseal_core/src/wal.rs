//! WAL wrapper that encrypts entry payloads and metadata.

use crate::crypto::CrypterSet;
use crate::engine::{Wal, WalFactory};
use crate::error::CoreResult;
use crate::record::{open, seal};
use parking_lot::Mutex;
use raftseal_storage::{Entry, HardState, WalData, WalSnapshot};
use std::path::Path;
use std::sync::Arc;

/// Mutable state behind the WAL lock.
struct Inner {
    wal: Box<dyn Wal>,
    crypters: CrypterSet,
}

/// A WAL whose entry data and metadata are stored as encrypted records.
///
/// Entry terms, indexes and types, hard state and snapshot markers stay in
/// the clear. One mutex guards both the active crypters and the underlying
/// writer, so a [`EncryptedWal::rotate_crypters`] call can never land in
/// the middle of a [`Wal::save`] batch.
pub struct EncryptedWal {
    inner: Mutex<Inner>,
}

impl EncryptedWal {
    /// Wraps an already created or opened WAL.
    pub fn new(wal: Box<dyn Wal>, crypters: CrypterSet) -> Self {
        Self {
            inner: Mutex::new(Inner { wal, crypters }),
        }
    }

    /// Replaces the crypters used for subsequent reads and writes.
    pub fn rotate_crypters(&self, crypters: CrypterSet) {
        self.inner.lock().crypters = crypters;
    }

    /// Returns the crypters currently in use.
    pub fn crypters(&self) -> CrypterSet {
        self.inner.lock().crypters.clone()
    }
}

impl Wal for EncryptedWal {
    /// Replays the log and decrypts everything in it.
    ///
    /// A single record that fails to decrypt fails the whole read.
    fn read_all(&self) -> CoreResult<WalData> {
        let inner = self.inner.lock();
        let data = inner.wal.read_all()?;
        let decrypter = inner.crypters.decrypter.as_ref();

        let metadata = open(decrypter, &data.metadata)?;
        let entries = data
            .entries
            .into_iter()
            .map(|entry| -> CoreResult<Entry> {
                let payload = open(decrypter, &entry.data)?;
                Ok(Entry {
                    data: payload,
                    ..entry
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(WalData {
            metadata,
            hard_state: data.hard_state,
            entries,
        })
    }

    /// Encrypts every entry, then writes the batch.
    ///
    /// If any entry fails to encrypt nothing is written.
    fn save(&self, hard_state: &HardState, entries: &[Entry]) -> CoreResult<()> {
        let inner = self.inner.lock();
        let encrypter = inner.crypters.encrypter.as_ref();

        let sealed = entries
            .iter()
            .map(|entry| -> CoreResult<Entry> {
                Ok(Entry {
                    term: entry.term,
                    index: entry.index,
                    entry_type: entry.entry_type,
                    data: seal(encrypter, &entry.data)?,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        inner.wal.save(hard_state, &sealed)
    }

    fn save_snapshot(&self, snapshot: &WalSnapshot) -> CoreResult<()> {
        self.inner.lock().wal.save_snapshot(snapshot)
    }

    fn close(&self) -> CoreResult<()> {
        self.inner.lock().wal.close()
    }
}

impl std::fmt::Debug for EncryptedWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedWal")
            .field("crypters", &self.inner.lock().crypters)
            .finish_non_exhaustive()
    }
}

/// Creates and opens [`EncryptedWal`]s on top of another factory.
#[derive(Clone)]
pub struct EncryptedWalFactory {
    inner: Arc<dyn WalFactory>,
    crypters: CrypterSet,
}

impl EncryptedWalFactory {
    /// Wraps `inner`, encrypting with `crypters`.
    pub fn new(inner: Arc<dyn WalFactory>, crypters: CrypterSet) -> Self {
        Self { inner, crypters }
    }

    /// Creates a WAL, encrypting `metadata` before it is written.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails (nothing is created) or the
    /// underlying create fails.
    pub fn create_wal(&self, dir: &Path, metadata: &[u8]) -> CoreResult<EncryptedWal> {
        let sealed = seal(self.crypters.encrypter.as_ref(), metadata)?;
        let wal = self.inner.create(dir, &sealed)?;
        Ok(EncryptedWal::new(wal, self.crypters.clone()))
    }

    /// Opens a WAL for replay from `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying open fails.
    pub fn open_wal(&self, dir: &Path, snapshot: WalSnapshot) -> CoreResult<EncryptedWal> {
        let wal = self.inner.open(dir, snapshot)?;
        Ok(EncryptedWal::new(wal, self.crypters.clone()))
    }
}

impl WalFactory for EncryptedWalFactory {
    fn create(&self, dir: &Path, metadata: &[u8]) -> CoreResult<Box<dyn Wal>> {
        Ok(Box::new(self.create_wal(dir, metadata)?))
    }

    fn open(&self, dir: &Path, snapshot: WalSnapshot) -> CoreResult<Box<dyn Wal>> {
        Ok(Box::new(self.open_wal(dir, snapshot)?))
    }
}

impl std::fmt::Debug for EncryptedWalFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedWalFactory")
            .field("crypters", &self.crypters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AesGcmSuite, DataEncryptionKey};
    use crate::engine::RawWalFactory;
    use crate::record::MaybeEncryptedRecord;
    use tempfile::tempdir;

    fn aes_set() -> CrypterSet {
        CrypterSet::from_keys(&AesGcmSuite, &DataEncryptionKey::generate(), &[]).unwrap()
    }

    fn hs(commit: u64) -> HardState {
        HardState {
            term: 1,
            vote: 1,
            commit,
        }
    }

    fn entries(n: u64) -> Vec<Entry> {
        (1..=n)
            .map(|i| Entry::new(1, i, format!("entry {i}").into_bytes()))
            .collect()
    }

    #[test]
    fn stores_ciphertext_and_reads_plaintext() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        let raw: Arc<dyn WalFactory> = Arc::new(RawWalFactory::default());
        let factory = EncryptedWalFactory::new(raw.clone(), aes_set());

        let wal = factory.create_wal(&dir, b"metadata").unwrap();
        wal.save(&hs(3), &entries(3)).unwrap();
        wal.close().unwrap();

        // The raw engine sees only envelopes.
        let stored = raw.open(&dir, WalSnapshot::default()).unwrap();
        let raw_data = stored.read_all().unwrap();
        stored.close().unwrap();
        assert_ne!(raw_data.metadata, b"metadata");
        for (raw_entry, plain) in raw_data.entries.iter().zip(entries(3)) {
            assert_eq!(raw_entry.index, plain.index);
            let record = MaybeEncryptedRecord::decode(&raw_entry.data).unwrap();
            assert_ne!(record.data, plain.data);
        }

        let wal = factory.open_wal(&dir, WalSnapshot::default()).unwrap();
        let data = wal.read_all().unwrap();
        assert_eq!(data.metadata, b"metadata");
        assert_eq!(data.hard_state, hs(3));
        assert_eq!(data.entries, entries(3));
    }

    #[test]
    fn wrong_key_fails_whole_read() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        let raw: Arc<dyn WalFactory> = Arc::new(RawWalFactory::default());

        let wal = EncryptedWalFactory::new(raw.clone(), aes_set())
            .create_wal(&dir, b"m")
            .unwrap();
        wal.save(&hs(2), &entries(2)).unwrap();
        wal.close().unwrap();

        let wal = EncryptedWalFactory::new(raw, aes_set())
            .open_wal(&dir, WalSnapshot::default())
            .unwrap();
        assert!(wal.read_all().unwrap_err().is_cannot_decrypt());
    }

    #[test]
    fn rotation_switches_encrypter() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        let raw: Arc<dyn WalFactory> = Arc::new(RawWalFactory::default());
        let old = aes_set();
        let new = aes_set();

        let wal = EncryptedWalFactory::new(raw.clone(), old.clone())
            .create_wal(&dir, b"m")
            .unwrap();
        wal.save(&hs(1), &entries(1)).unwrap();
        wal.rotate_crypters(
            CrypterSet::new(new.encrypter.clone(), new.decrypter.clone())
                .with_fallbacks(vec![old.decrypter.clone()]),
        );
        wal.save(&hs(2), &[Entry::new(1, 2, b"entry 2".to_vec())])
            .unwrap();
        wal.close().unwrap();

        let both = CrypterSet::new(new.encrypter.clone(), new.decrypter.clone())
            .with_fallbacks(vec![old.decrypter.clone()]);
        let data = EncryptedWalFactory::new(raw.clone(), both)
            .open_wal(&dir, WalSnapshot::default())
            .unwrap()
            .read_all()
            .unwrap();
        assert_eq!(data.entries, entries(2));

        let only_old = EncryptedWalFactory::new(raw, old)
            .open_wal(&dir, WalSnapshot::default())
            .unwrap();
        assert!(only_old.read_all().unwrap_err().is_cannot_decrypt());
    }
}
