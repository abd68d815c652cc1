//! Identity crypter.

use super::{Algorithm, Decrypter, Encrypter};
use crate::error::{CoreError, CoreResult};
use crate::record::MaybeEncryptedRecord;

/// Stores data in the clear.
///
/// Encrypting yields a [`Algorithm::NotEncrypted`] record; decrypting
/// accepts only such records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCrypter;

impl Encrypter for NoopCrypter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::NotEncrypted
    }

    fn encrypt(&self, plaintext: &[u8]) -> CoreResult<MaybeEncryptedRecord> {
        Ok(MaybeEncryptedRecord::new(
            Algorithm::NotEncrypted,
            plaintext.to_vec(),
        ))
    }
}

impl Decrypter for NoopCrypter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::NotEncrypted
    }

    fn decrypt(&self, record: &MaybeEncryptedRecord) -> CoreResult<Vec<u8>> {
        if record.algorithm != Algorithm::NotEncrypted {
            return Err(CoreError::cannot_decrypt(
                record.algorithm,
                "no decrypter configured for encrypted record",
            ));
        }
        Ok(record.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity() {
        let record = NoopCrypter.encrypt(b"plain").unwrap();
        assert_eq!(record.algorithm, Algorithm::NotEncrypted);
        assert_eq!(record.data, b"plain");
        assert_eq!(NoopCrypter.decrypt(&record).unwrap(), b"plain");
    }

    #[test]
    fn rejects_encrypted_records() {
        let record = MaybeEncryptedRecord::new(Algorithm::Aes256Gcm, vec![1, 2, 3]);
        assert!(NoopCrypter.decrypt(&record).unwrap_err().is_cannot_decrypt());
    }
}
