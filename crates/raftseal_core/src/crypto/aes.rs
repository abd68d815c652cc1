//! AES-256-GCM crypter.

use super::{Algorithm, CipherSuite, Decrypter, Encrypter};
use crate::error::{CoreError, CoreResult};
use crate::record::MaybeEncryptedRecord;
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the derived AES-256 key in bytes.
const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const DEK_INFO: &[u8] = b"raftseal-dek-v1";

/// Raw data encryption key bytes, as handed over by the key manager.
///
/// The bytes are zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataEncryptionKey {
    bytes: Vec<u8>,
}

impl DataEncryptionKey {
    /// Generates a random 32-byte key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is empty.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.is_empty() {
            return Err(CoreError::invalid_key("key must not be empty"));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    /// Returns the raw key bytes.
    ///
    /// # Security
    ///
    /// Don't log or persist the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for DataEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts records with AES-256-GCM.
///
/// Record data layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub struct AesGcmCrypter {
    cipher: Aes256Gcm,
}

impl AesGcmCrypter {
    /// Creates a crypter whose cipher key is derived from `key` with HKDF-SHA256.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails.
    pub fn new(key: &DataEncryptionKey) -> CoreResult<Self> {
        let hk = Hkdf::<Sha256>::new(None, key.as_bytes());
        let mut derived = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(DEK_INFO, &mut *derived)
            .map_err(|_| CoreError::invalid_key("HKDF expand failed"))?;

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&*derived));
        Ok(Self { cipher })
    }
}

impl Encrypter for AesGcmCrypter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Aes256Gcm
    }

    fn encrypt(&self, plaintext: &[u8]) -> CoreResult<MaybeEncryptedRecord> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CoreError::encryption_failed(Algorithm::Aes256Gcm, "AEAD seal failed"))?;

        let mut data = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        data.extend_from_slice(&nonce_bytes);
        data.extend(ciphertext);

        Ok(MaybeEncryptedRecord::new(Algorithm::Aes256Gcm, data))
    }
}

impl Decrypter for AesGcmCrypter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Aes256Gcm
    }

    fn decrypt(&self, record: &MaybeEncryptedRecord) -> CoreResult<Vec<u8>> {
        if record.algorithm != Algorithm::Aes256Gcm {
            return Err(CoreError::cannot_decrypt(
                record.algorithm,
                "record was not encrypted with AES-256-GCM",
            ));
        }
        if record.data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::cannot_decrypt(
                Algorithm::Aes256Gcm,
                "ciphertext too short",
            ));
        }

        let (nonce, ciphertext) = record.data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                CoreError::cannot_decrypt(
                    Algorithm::Aes256Gcm,
                    "authentication failed (wrong key or corrupted data)",
                )
            })
    }
}

impl std::fmt::Debug for AesGcmCrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCrypter")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

/// The production cipher suite: one [`AesGcmCrypter`] per key.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmSuite;

impl CipherSuite for AesGcmSuite {
    fn crypters(
        &self,
        key: &DataEncryptionKey,
    ) -> CoreResult<(Arc<dyn Encrypter>, Arc<dyn Decrypter>)> {
        let crypter = Arc::new(AesGcmCrypter::new(key)?);
        let encrypter: Arc<dyn Encrypter> = crypter.clone();
        let decrypter: Arc<dyn Decrypter> = crypter;
        Ok((encrypter, decrypter))
    }
}
