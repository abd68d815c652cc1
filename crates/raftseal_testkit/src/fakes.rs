//! Fake crypters.
//!
//! [`FakeCrypter`] stands in for a real cipher under any algorithm id, so
//! tests can build records that only a specific decrypter accepts.
//! [`FailingEncrypter`] makes a chosen call fail, for atomicity tests.
//! [`CancellingWalFactory`] fires a [`CancelToken`] once a WAL is created,
//! so a migration is cancelled while it is copying.

use raftseal_core::{
    Algorithm, CancelToken, CipherSuite, CoreError, CoreResult, DataEncryptionKey, Decrypter,
    Encrypter, MaybeEncryptedRecord, Wal, WalFactory,
};
use raftseal_storage::WalSnapshot;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const FAKE_PREFIX: &[u8] = b"FAKE";

/// A reversible, keyed transform tagged with an arbitrary algorithm.
///
/// Output is `"FAKE" || key || plaintext XOR key`. Decrypting checks the
/// algorithm, the prefix and the key byte.
#[derive(Debug, Clone, Copy)]
pub struct FakeCrypter {
    algorithm: Algorithm,
    key: u8,
}

impl FakeCrypter {
    /// Creates a crypter for wire id `algorithm` with key byte `0x5a`.
    #[must_use]
    pub fn new(algorithm: u32) -> Self {
        Self::with_key(algorithm, 0x5a)
    }

    /// Creates a crypter for wire id `algorithm` with the given key byte.
    #[must_use]
    pub fn with_key(algorithm: u32, key: u8) -> Self {
        Self {
            algorithm: Algorithm::from_wire(Some(algorithm)),
            key,
        }
    }
}

impl Encrypter for FakeCrypter {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn encrypt(&self, plaintext: &[u8]) -> CoreResult<MaybeEncryptedRecord> {
        let mut data = Vec::with_capacity(FAKE_PREFIX.len() + 1 + plaintext.len());
        data.extend_from_slice(FAKE_PREFIX);
        data.push(self.key);
        data.extend(plaintext.iter().map(|b| b ^ self.key));
        Ok(MaybeEncryptedRecord::new(self.algorithm, data))
    }
}

impl Decrypter for FakeCrypter {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn decrypt(&self, record: &MaybeEncryptedRecord) -> CoreResult<Vec<u8>> {
        if record.algorithm != self.algorithm {
            return Err(CoreError::cannot_decrypt(
                record.algorithm,
                format!("fake crypter only accepts {}", self.algorithm),
            ));
        }
        let body = record
            .data
            .strip_prefix(FAKE_PREFIX)
            .ok_or_else(|| CoreError::cannot_decrypt(record.algorithm, "missing fake prefix"))?;
        match body.split_first() {
            Some((&key, rest)) if key == self.key => Ok(rest.iter().map(|b| b ^ key).collect()),
            _ => Err(CoreError::cannot_decrypt(record.algorithm, "wrong fake key")),
        }
    }
}

/// Cipher suite producing [`FakeCrypter`]s keyed by the first DEK byte.
#[derive(Debug, Clone, Copy)]
pub struct FakeSuite {
    algorithm: u32,
}

impl FakeSuite {
    /// Creates a suite for wire id `algorithm`.
    #[must_use]
    pub fn new(algorithm: u32) -> Self {
        Self { algorithm }
    }
}

impl CipherSuite for FakeSuite {
    fn crypters(
        &self,
        key: &DataEncryptionKey,
    ) -> CoreResult<(Arc<dyn Encrypter>, Arc<dyn Decrypter>)> {
        let byte = key
            .as_bytes()
            .first()
            .copied()
            .ok_or_else(|| CoreError::invalid_key("fake suite needs a key byte"))?;
        let crypter = FakeCrypter::with_key(self.algorithm, byte);
        let encrypter: Arc<dyn Encrypter> = Arc::new(crypter);
        let decrypter: Arc<dyn Decrypter> = Arc::new(crypter);
        Ok((encrypter, decrypter))
    }
}

/// Wraps an encrypter and fails its `n`th call (1-based).
///
/// Calls before and after the failing one are passed through.
pub struct FailingEncrypter {
    inner: Arc<dyn Encrypter>,
    fail_on: usize,
    calls: AtomicUsize,
}

impl FailingEncrypter {
    /// Fails call number `fail_on`.
    #[must_use]
    pub fn new(inner: Arc<dyn Encrypter>, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `encrypt` calls so far, including the failed one.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Encrypter for FailingEncrypter {
    fn algorithm(&self) -> Algorithm {
        self.inner.algorithm()
    }

    fn encrypt(&self, plaintext: &[u8]) -> CoreResult<MaybeEncryptedRecord> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(CoreError::encryption_failed(
                self.inner.algorithm(),
                format!("injected failure on call {call}"),
            ));
        }
        self.inner.encrypt(plaintext)
    }
}

/// Wraps a WAL factory and cancels `cancel` after every successful `create`.
///
/// The created WAL is returned as is, so the caller goes on writing and
/// only notices the cancellation at its next check.
pub struct CancellingWalFactory {
    inner: Arc<dyn WalFactory>,
    cancel: CancelToken,
    created: AtomicUsize,
}

impl CancellingWalFactory {
    /// Cancels `cancel` once `inner` has created a WAL.
    #[must_use]
    pub fn new(inner: Arc<dyn WalFactory>, cancel: CancelToken) -> Self {
        Self {
            inner,
            cancel,
            created: AtomicUsize::new(0),
        }
    }

    /// Number of WALs created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl WalFactory for CancellingWalFactory {
    fn create(&self, dir: &Path, metadata: &[u8]) -> CoreResult<Box<dyn Wal>> {
        let wal = self.inner.create(dir, metadata)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(wal)
    }

    fn open(&self, dir: &Path, snapshot: WalSnapshot) -> CoreResult<Box<dyn Wal>> {
        self.inner.open(dir, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_round_trip() {
        let crypter = FakeCrypter::new(7);
        let record = crypter.encrypt(b"snapshotdata").unwrap();
        assert_eq!(record.algorithm, Algorithm::Custom(7));
        assert_ne!(record.data, b"snapshotdata");
        assert_eq!(crypter.decrypt(&record).unwrap(), b"snapshotdata");
    }

    #[test]
    fn fake_rejects_other_algorithm_and_key() {
        let record = FakeCrypter::new(7).encrypt(b"x").unwrap();
        assert!(FakeCrypter::new(3).decrypt(&record).is_err());
        assert!(FakeCrypter::with_key(7, 1).decrypt(&record).is_err());
    }

    #[test]
    fn failing_encrypter_fails_once() {
        let enc = FailingEncrypter::new(Arc::new(FakeCrypter::new(5)), 2);
        assert!(enc.encrypt(b"a").is_ok());
        assert!(enc.encrypt(b"b").is_err());
        assert!(enc.encrypt(b"c").is_ok());
        assert_eq!(enc.calls(), 3);
    }

    #[test]
    fn cancelling_factory_cancels_after_create() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let inner = Arc::new(raftseal_core::RawWalFactory::default());
        let factory = CancellingWalFactory::new(inner, cancel.clone());
        assert!(cancel.check().is_ok());

        let wal = factory.create(&dir.path().join("wal"), b"meta").unwrap();
        assert!(matches!(cancel.check(), Err(CoreError::Cancelled)));
        assert_eq!(factory.created(), 1);
        wal.close().unwrap();
    }
}
