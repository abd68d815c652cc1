//! Integration tests for the encrypted WAL wrapper.

use proptest::prelude::*;
use raftseal_core::{
    AesGcmSuite, Algorithm, CipherSuite, CrypterSet, DataEncryptionKey, EncryptedRaftLogger,
    EncryptedWalFactory, MaybeEncryptedRecord, NoopCrypter, RawWalFactory, Wal, WalFactory,
};
use raftseal_storage::{Entry, FileWal, HardState, WalOptions, WalSnapshot};
use raftseal_testkit::prelude::*;
use std::sync::Arc;
use std::thread;

fn aes(key: &DataEncryptionKey) -> CrypterSet {
    CrypterSet::from_keys(&AesGcmSuite, key, &[]).unwrap()
}

fn raw() -> Arc<dyn WalFactory> {
    Arc::new(RawWalFactory::default())
}

fn read_raw(dir: &std::path::Path) -> Vec<Entry> {
    let wal = FileWal::open(dir, WalSnapshot::default(), WalOptions::default()).unwrap();
    let data = wal.read_all().unwrap();
    wal.close().unwrap();
    data.entries
}

#[test]
fn failed_encryption_persists_nothing_from_the_batch() {
    let state = TempState::new();
    let dir = state.join("wal");
    let aes = aes(&key());

    // Call 1 seals the metadata; the batch's third entry is call 4.
    let failing = Arc::new(FailingEncrypter::new(aes.encrypter.clone(), 4));
    let crypters = CrypterSet::new(failing.clone(), aes.decrypter.clone());
    let wal = EncryptedWalFactory::new(raw(), crypters)
        .create_wal(&dir, b"meta")
        .unwrap();

    let err = wal.save(&hard_state(1, 5), &entries(1..=5)).unwrap_err();
    assert!(matches!(err, raftseal_core::CoreError::EncryptionFailed { .. }));
    assert_eq!(failing.calls(), 4);
    wal.close().unwrap();

    assert!(read_raw(&dir).is_empty());
}

#[test]
fn failed_metadata_encryption_creates_no_wal() {
    let state = TempState::new();
    let dir = state.join("wal");
    let aes = aes(&key());
    let failing = Arc::new(FailingEncrypter::new(aes.encrypter.clone(), 1));

    let result = EncryptedWalFactory::new(raw(), CrypterSet::new(failing, aes.decrypter))
        .create_wal(&dir, b"meta");
    assert!(result.is_err());
    assert!(!raftseal_storage::wal_exists(&dir));
}

#[test]
fn rotation_needs_both_keys_to_read_everything() {
    let state = TempState::new();
    let dir = state.join("wal");
    let old = key();
    let new = key();

    let wal = EncryptedWalFactory::new(raw(), aes(&old))
        .create_wal(&dir, b"meta")
        .unwrap();
    wal.save(&hard_state(1, 3), &entries(1..=3)).unwrap();
    wal.rotate_crypters(CrypterSet::from_keys(&AesGcmSuite, &new, &[old.clone()]).unwrap());
    wal.save(&hard_state(1, 6), &entries(4..=6)).unwrap();
    wal.close().unwrap();

    let both = CrypterSet::from_keys(&AesGcmSuite, &new, &[old.clone()]).unwrap();
    let wal = EncryptedWalFactory::new(raw(), both)
        .open_wal(&dir, WalSnapshot::default())
        .unwrap();
    let data = wal.read_all().unwrap();
    assert_eq!(data.metadata, b"meta");
    assert_eq!(data.entries, entries(1..=6));
    wal.close().unwrap();

    for only in [old, new] {
        let wal = EncryptedWalFactory::new(raw(), aes(&only))
            .open_wal(&dir, WalSnapshot::default())
            .unwrap();
        assert!(wal.read_all().unwrap_err().is_cannot_decrypt());
        wal.close().unwrap();
    }
}

#[test]
fn entries_are_stored_as_envelopes() {
    let state = TempState::new();
    let dir = state.join("wal");
    let wal = EncryptedWalFactory::new(raw(), aes(&key()))
        .create_wal(&dir, b"meta")
        .unwrap();
    wal.save(&hard_state(1, 2), &entries(1..=2)).unwrap();
    wal.close().unwrap();

    for (stored, plain) in read_raw(&dir).iter().zip(entries(1..=2)) {
        assert_eq!(stored.index, plain.index);
        assert_eq!(stored.term, plain.term);
        let record = MaybeEncryptedRecord::decode(&stored.data).unwrap();
        assert_eq!(record.algorithm, Algorithm::Aes256Gcm);
        assert!(!record.data.windows(plain.data.len()).any(|w| w == plain.data.as_slice()));
    }
}

#[test]
fn clear_envelopes_read_with_noop_and_with_real_keys() {
    let state = TempState::new();
    let dir = state.join("wal");
    let wal = EncryptedWalFactory::new(raw(), CrypterSet::noop())
        .create_wal(&dir, b"meta")
        .unwrap();
    wal.save(&hard_state(1, 3), &entries(1..=3)).unwrap();
    wal.close().unwrap();

    let noop = CrypterSet::new(Arc::new(NoopCrypter), Arc::new(NoopCrypter));
    for crypters in [noop, aes(&key())] {
        let wal = EncryptedWalFactory::new(raw(), crypters)
            .open_wal(&dir, WalSnapshot::default())
            .unwrap();
        let data = wal.read_all().unwrap();
        assert_eq!(data.metadata, b"meta");
        assert_eq!(data.entries, entries(1..=3));
        wal.close().unwrap();
    }
}

#[test]
fn concurrent_rotation_never_splits_a_batch() {
    init_tracing();
    const BATCH: u64 = 8;
    const BATCHES: u64 = 40;
    const ROTATIONS: u8 = 25;

    let state = TempState::new();
    let suite = Arc::new(FakeSuite::new(11));
    let first = DataEncryptionKey::from_bytes(&[1]).unwrap();
    let logger =
        EncryptedRaftLogger::with_cipher_suite(state.config(), &first, suite.clone()).unwrap();
    logger.bootstrap_new(b"meta").unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for b in 0..BATCHES {
                let start = b * BATCH + 1;
                let end = start + BATCH - 1;
                logger.save_entries(&hard_state(1, end), &entries(start..=end)).unwrap();
            }
        });
        s.spawn(|| {
            for k in 2..=ROTATIONS {
                logger
                    .rotate_encryption_key(&DataEncryptionKey::from_bytes(&[k]).unwrap())
                    .unwrap();
                thread::yield_now();
            }
        });
    });
    logger.close().unwrap();

    let stored = read_raw(&logger.wal_dir());
    assert_eq!(stored.len() as u64, BATCH * BATCHES);
    for batch in stored.chunks(BATCH as usize) {
        let keys: Vec<u8> = batch
            .iter()
            .map(|e| MaybeEncryptedRecord::decode(&e.data).unwrap().data[4])
            .collect();
        assert!(keys.iter().all(|k| *k == keys[0]), "batch split across keys: {keys:?}");
    }

    // Every key ever used, newest first.
    let current = DataEncryptionKey::from_bytes(&[ROTATIONS]).unwrap();
    let older: Vec<DataEncryptionKey> = (1..ROTATIONS)
        .rev()
        .map(|k| DataEncryptionKey::from_bytes(&[k]).unwrap())
        .collect();
    let reader = EncryptedRaftLogger::with_cipher_suite(state.config(), &current, suite).unwrap();
    let (_, data) = reader
        .bootstrap_from_disk(&raftseal_core::CancelToken::new(), &older)
        .unwrap();
    assert_eq!(data.entries, entries(1..=BATCH * BATCHES));
}

#[test]
fn fake_suite_keys_are_distinct() {
    let suite = FakeSuite::new(11);
    let (enc, _) = suite
        .crypters(&DataEncryptionKey::from_bytes(&[1]).unwrap())
        .unwrap();
    let (_, dec) = suite
        .crypters(&DataEncryptionKey::from_bytes(&[2]).unwrap())
        .unwrap();
    let record = enc.encrypt(b"x").unwrap();
    assert!(dec.decrypt(&record).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn wrapped_batches_read_back(batch in entry_batch_strategy(24)) {
        let state = TempState::new();
        let dir = state.join("wal");
        let crypters = aes(&DataEncryptionKey::from_bytes(&[3; 32]).unwrap());
        let factory = EncryptedWalFactory::new(raw(), crypters);

        let wal = factory.create_wal(&dir, b"meta").unwrap();
        let hs = HardState { term: 1, vote: 1, commit: batch.len() as u64 };
        wal.save(&hs, &batch).unwrap();
        wal.close().unwrap();

        let wal = factory.open_wal(&dir, WalSnapshot::default()).unwrap();
        let data = wal.read_all().unwrap();
        wal.close().unwrap();
        prop_assert_eq!(data.entries, batch);
        prop_assert_eq!(data.hard_state, hs);
    }
}
