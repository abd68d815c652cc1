//! Payload encryption for WAL entries and snapshots.
//!
//! Every payload is wrapped in a [`MaybeEncryptedRecord`] naming the
//! algorithm that produced it. Readers pick a decrypter by that name, which
//! is what lets data written under several keys (or never encrypted at all)
//! coexist in one log.
//!
//! ## Security Model
//!
//! - AES-256-GCM with a fresh random nonce per record
//! - Cipher keys derived from the raw DEK with HKDF-SHA256
//! - DEKs are zeroized on drop and never printed
//! - A record that fails authentication is an error, never skipped
//!
//! ## Usage
//!
//! ```rust
//! use raftseal_core::crypto::{AesGcmCrypter, DataEncryptionKey, Decrypter, Encrypter};
//!
//! let key = DataEncryptionKey::generate();
//! let crypter = AesGcmCrypter::new(&key).unwrap();
//!
//! let record = crypter.encrypt(b"secret entry").unwrap();
//! assert_eq!(crypter.decrypt(&record).unwrap(), b"secret entry");
//! ```

mod aes;
mod multi;
mod noop;

pub use aes::{AesGcmCrypter, AesGcmSuite, DataEncryptionKey, NONCE_SIZE, TAG_SIZE};
pub use multi::MultiDecrypter;
pub use noop::NoopCrypter;

use crate::error::CoreResult;
use crate::record::MaybeEncryptedRecord;
use std::fmt;
use std::sync::Arc;

/// Identifies how a record's data was transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Stored in the clear. On the wire the algorithm field is absent.
    NotEncrypted,
    /// AES-256-GCM. Wire id `1`.
    Aes256Gcm,
    /// Any other algorithm, by wire id. Ids `0` and `1` are reserved.
    Custom(u32),
}

impl Algorithm {
    /// Wire id for [`Algorithm::Aes256Gcm`].
    pub const AES_256_GCM_ID: u32 = 1;

    /// Maps an optional wire id to an algorithm.
    ///
    /// A missing field and a legacy explicit `0` both mean not encrypted.
    #[must_use]
    pub const fn from_wire(id: Option<u32>) -> Self {
        match id {
            None | Some(0) => Self::NotEncrypted,
            Some(Self::AES_256_GCM_ID) => Self::Aes256Gcm,
            Some(n) => Self::Custom(n),
        }
    }

    /// Returns the wire id, or `None` when the field should be omitted.
    #[must_use]
    pub const fn to_wire(self) -> Option<u32> {
        match self {
            Self::NotEncrypted => None,
            Self::Aes256Gcm => Some(Self::AES_256_GCM_ID),
            Self::Custom(n) => Some(n),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEncrypted => f.write_str("not encrypted"),
            Self::Aes256Gcm => f.write_str("AES-256-GCM"),
            Self::Custom(n) => write!(f, "algorithm {n}"),
        }
    }
}

/// Wraps plaintext into a record.
pub trait Encrypter: Send + Sync {
    /// The algorithm this encrypter produces.
    fn algorithm(&self) -> Algorithm;

    /// Encrypts `plaintext` into a record tagged with [`Self::algorithm`].
    ///
    /// # Errors
    ///
    /// Returns `EncryptionFailed` if the cipher rejects the input.
    fn encrypt(&self, plaintext: &[u8]) -> CoreResult<MaybeEncryptedRecord>;
}

/// Unwraps a record back into plaintext.
pub trait Decrypter: Send + Sync {
    /// The algorithm this decrypter accepts.
    fn algorithm(&self) -> Algorithm;

    /// Recovers the plaintext of `record`.
    ///
    /// # Errors
    ///
    /// Returns `CannotDecrypt` if the record's algorithm is not accepted or
    /// the data fails to decrypt.
    fn decrypt(&self, record: &MaybeEncryptedRecord) -> CoreResult<Vec<u8>>;
}

/// Builds the encrypter/decrypter pair for a DEK.
///
/// Production code uses [`AesGcmSuite`]; tests substitute fakes here
/// without touching any call site that consumes a [`CrypterSet`].
pub trait CipherSuite: Send + Sync {
    /// Returns crypters keyed by `key`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the key is unusable by this suite.
    fn crypters(
        &self,
        key: &DataEncryptionKey,
    ) -> CoreResult<(Arc<dyn Encrypter>, Arc<dyn Decrypter>)>;
}

/// The crypters a WAL or snapshotter uses, passed explicitly at construction.
#[derive(Clone)]
pub struct CrypterSet {
    /// Encrypter for everything written.
    pub encrypter: Arc<dyn Encrypter>,
    /// Decrypter for everything read.
    pub decrypter: Arc<dyn Decrypter>,
}

impl CrypterSet {
    /// Creates a set from an encrypter and its primary decrypter.
    #[must_use]
    pub fn new(encrypter: Arc<dyn Encrypter>, decrypter: Arc<dyn Decrypter>) -> Self {
        Self {
            encrypter,
            decrypter,
        }
    }

    /// A set that stores everything in the clear.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopCrypter), Arc::new(NoopCrypter))
    }

    /// Builds the set for `key` plus decrypters for `old_keys`.
    ///
    /// # Errors
    ///
    /// Returns an error if any key is rejected by `suite`.
    pub fn from_keys(
        suite: &dyn CipherSuite,
        key: &DataEncryptionKey,
        old_keys: &[DataEncryptionKey],
    ) -> CoreResult<Self> {
        let (encrypter, decrypter) = suite.crypters(key)?;
        let mut fallbacks = Vec::with_capacity(old_keys.len());
        for old in old_keys {
            fallbacks.push(suite.crypters(old)?.1);
        }
        Ok(Self::new(encrypter, decrypter).with_fallbacks(fallbacks))
    }

    /// Keeps the current decrypter as primary and tries `fallbacks` after it.
    ///
    /// The result is a [`MultiDecrypter`], so records stored in the clear
    /// are accepted too.
    #[must_use]
    pub fn with_fallbacks(self, fallbacks: Vec<Arc<dyn Decrypter>>) -> Self {
        let mut all = Vec::with_capacity(fallbacks.len() + 1);
        all.push(self.decrypter);
        all.extend(fallbacks);
        Self {
            encrypter: self.encrypter,
            decrypter: Arc::new(MultiDecrypter::new(all)),
        }
    }
}

impl fmt::Debug for CrypterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrypterSet")
            .field("encrypter", &self.encrypter.algorithm())
            .field("decrypter", &self.decrypter.algorithm())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_ids() {
        assert_eq!(Algorithm::from_wire(None), Algorithm::NotEncrypted);
        assert_eq!(Algorithm::from_wire(Some(0)), Algorithm::NotEncrypted);
        assert_eq!(Algorithm::from_wire(Some(1)), Algorithm::Aes256Gcm);
        assert_eq!(Algorithm::from_wire(Some(7)), Algorithm::Custom(7));
        assert_eq!(Algorithm::NotEncrypted.to_wire(), None);
        assert_eq!(Algorithm::Custom(7).to_wire(), Some(7));
    }

    #[test]
    fn rotation_set_reads_both_keys() {
        let old = DataEncryptionKey::generate();
        let new = DataEncryptionKey::generate();
        let old_set = CrypterSet::from_keys(&AesGcmSuite, &old, &[]).unwrap();
        let new_set = CrypterSet::from_keys(&AesGcmSuite, &new, &[old.clone()]).unwrap();

        let written_before = old_set.encrypter.encrypt(b"before").unwrap();
        let written_after = new_set.encrypter.encrypt(b"after").unwrap();

        assert_eq!(new_set.decrypter.decrypt(&written_before).unwrap(), b"before");
        assert_eq!(new_set.decrypter.decrypt(&written_after).unwrap(), b"after");
        assert!(old_set.decrypter.decrypt(&written_after).is_err());
    }

    #[test]
    fn noop_set_passes_through() {
        let set = CrypterSet::noop();
        let record = set.encrypter.encrypt(b"clear").unwrap();
        assert_eq!(record.algorithm, Algorithm::NotEncrypted);
        assert_eq!(set.decrypter.decrypt(&record).unwrap(), b"clear");
    }
}
