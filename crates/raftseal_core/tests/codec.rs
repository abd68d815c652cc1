//! Integration tests for the crypter codec and record envelope.

use proptest::prelude::*;
use raftseal_core::record::{open, seal};
use raftseal_core::{
    AesGcmCrypter, Algorithm, CrypterSet, DataEncryptionKey, Decrypter, EncryptedSnapFactory,
    Encrypter, MaybeEncryptedRecord, MultiDecrypter, NoopCrypter, RawSnapFactory, SnapFactory,
};
use raftseal_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn algorithm_seven_needs_a_matching_decrypter() {
    let encrypter = FakeCrypter::new(7);
    let record = encrypter.encrypt(b"snapshotdata").unwrap();

    let only_three = FakeCrypter::new(3);
    let err = only_three.decrypt(&record).unwrap_err();
    assert!(err.is_cannot_decrypt());

    let three: Arc<dyn Decrypter> = Arc::new(FakeCrypter::new(3));
    let seven: Arc<dyn Decrypter> = Arc::new(FakeCrypter::new(7));
    let multi = MultiDecrypter::new(vec![three, seven]);
    assert_eq!(multi.decrypt(&record).unwrap(), b"snapshotdata");
}

#[test]
fn snapshot_written_under_seven_loads_through_multi_decrypter() {
    let state = TempState::new();
    let dir = state.join("snap");
    std::fs::create_dir_all(&dir).unwrap();
    let snapshot = snapshot(2, 9, b"snapshotdata");

    let seven = Arc::new(FakeCrypter::new(7));
    EncryptedSnapFactory::new(Arc::new(RawSnapFactory), CrypterSet::new(seven.clone(), seven))
        .new_snapshotter(&dir)
        .save_snap(&snapshot)
        .unwrap();

    let three = Arc::new(FakeCrypter::new(3));
    let err = EncryptedSnapFactory::new(
        Arc::new(RawSnapFactory),
        CrypterSet::new(three.clone(), three.clone()),
    )
    .new_snapshotter(&dir)
    .load()
    .unwrap_err();
    assert!(err.is_cannot_decrypt());

    let fallback: Arc<dyn Decrypter> = Arc::new(FakeCrypter::new(7));
    let both = CrypterSet::new(three.clone(), three).with_fallbacks(vec![fallback]);
    let loaded = EncryptedSnapFactory::new(Arc::new(RawSnapFactory), both)
        .new_snapshotter(&dir)
        .load()
        .unwrap();
    assert_eq!(loaded, Some(snapshot));
}

#[test]
fn wrong_aes_key_is_cannot_decrypt() {
    let a = AesGcmCrypter::new(&key()).unwrap();
    let b = AesGcmCrypter::new(&key()).unwrap();
    let record = a.encrypt(b"payload").unwrap();
    let err = b.decrypt(&record).unwrap_err();
    assert!(err.is_cannot_decrypt());
}

#[test]
fn clear_envelope_is_read_by_any_configured_set() {
    let bytes = seal(&NoopCrypter, b"never encrypted").unwrap();
    let record = MaybeEncryptedRecord::decode(&bytes).unwrap();
    assert_eq!(record.algorithm, Algorithm::NotEncrypted);

    let aes = CrypterSet::from_keys(&raftseal_core::AesGcmSuite, &key(), &[]).unwrap();
    assert_eq!(open(aes.decrypter.as_ref(), &bytes).unwrap(), b"never encrypted");
    assert_eq!(open(&NoopCrypter, &bytes).unwrap(), b"never encrypted");
}

#[test]
fn noop_decrypter_rejects_encrypted_record() {
    let bytes = seal(&FakeCrypter::new(4), b"secret").unwrap();
    assert!(open(&NoopCrypter, &bytes).unwrap_err().is_cannot_decrypt());
}

#[test]
fn empty_key_is_rejected() {
    assert!(DataEncryptionKey::from_bytes(&[]).is_err());
}

proptest! {
    #[test]
    fn aes_round_trip(payload in payload_strategy()) {
        let crypter = AesGcmCrypter::new(&DataEncryptionKey::from_bytes(&[7; 32]).unwrap()).unwrap();
        let bytes = seal(&crypter, &payload).unwrap();
        prop_assert_eq!(open(&crypter, &bytes).unwrap(), payload);
    }

    #[test]
    fn fake_round_trip_any_algorithm(id in custom_algorithm_strategy(), payload in payload_strategy()) {
        let crypter = FakeCrypter::new(id);
        let bytes = seal(&crypter, &payload).unwrap();
        let record = MaybeEncryptedRecord::decode(&bytes).unwrap();
        prop_assert_eq!(record.algorithm, Algorithm::Custom(id));
        prop_assert_eq!(open(&crypter, &bytes).unwrap(), payload);
    }

    #[test]
    fn multi_decrypter_finds_key_in_any_position(
        payload in payload_strategy(),
        position in 0usize..4,
    ) {
        let keys: Vec<u8> = vec![10, 20, 30, 40];
        let writer = FakeCrypter::with_key(9, keys[position]);
        let decrypters: Vec<Arc<dyn Decrypter>> = keys
            .iter()
            .map(|&k| Arc::new(FakeCrypter::with_key(9, k)) as Arc<dyn Decrypter>)
            .collect();
        let multi = MultiDecrypter::new(decrypters);
        let record = writer.encrypt(&payload).unwrap();
        prop_assert_eq!(multi.decrypt(&record).unwrap(), payload);
    }
}
