//! Decrypter that tries several keys.

use super::{Algorithm, Decrypter, NoopCrypter};
use crate::error::{CoreError, CoreResult};
use crate::record::MaybeEncryptedRecord;
use std::sync::Arc;

/// Tries a list of decrypters in order and returns the first success.
///
/// Only decrypters whose algorithm matches the record are tried. Records
/// stored in the clear are always accepted, whatever else is registered,
/// so data written before encryption was enabled stays readable.
///
/// During key rotation the new key's decrypter goes first and the old
/// key's after it.
pub struct MultiDecrypter {
    decrypters: Vec<Arc<dyn Decrypter>>,
}

impl MultiDecrypter {
    /// Creates a decrypter over `decrypters`, tried in order.
    #[must_use]
    pub fn new(decrypters: Vec<Arc<dyn Decrypter>>) -> Self {
        Self { decrypters }
    }

    /// Number of registered decrypters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decrypters.len()
    }

    /// Returns `true` if no decrypter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decrypters.is_empty()
    }
}

impl Decrypter for MultiDecrypter {
    /// Algorithm of the primary decrypter.
    fn algorithm(&self) -> Algorithm {
        self.decrypters
            .first()
            .map_or(Algorithm::NotEncrypted, |d| d.algorithm())
    }

    fn decrypt(&self, record: &MaybeEncryptedRecord) -> CoreResult<Vec<u8>> {
        if record.algorithm == Algorithm::NotEncrypted {
            return NoopCrypter.decrypt(record);
        }

        let mut last_error = None;
        for decrypter in &self.decrypters {
            if decrypter.algorithm() != record.algorithm {
                continue;
            }
            match decrypter.decrypt(record) {
                Ok(plaintext) => return Ok(plaintext),
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(CoreError::CannotDecrypt { reason, .. }) => CoreError::cannot_decrypt(
                record.algorithm,
                format!("no registered key could decrypt the record: {reason}"),
            ),
            Some(other) => CoreError::cannot_decrypt(record.algorithm, other.to_string()),
            None => CoreError::cannot_decrypt(
                record.algorithm,
                "no decrypter registered for this algorithm",
            ),
        })
    }
}

impl std::fmt::Debug for MultiDecrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let algorithms: Vec<Algorithm> = self.decrypters.iter().map(|d| d.algorithm()).collect();
        f.debug_struct("MultiDecrypter")
            .field("algorithms", &algorithms)
            .finish()
    }
}
