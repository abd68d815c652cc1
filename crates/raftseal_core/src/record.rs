//! The `MaybeEncryptedRecord` envelope.
//!
//! Every wrapped WAL entry payload, WAL metadata and snapshot payload is an
//! encoded envelope:
//!
//! ```text
//! CBOR map {
//!     1: algorithm id (unsigned, omitted when not encrypted)
//!     2: data (byte string)
//! }
//! ```
//!
//! The envelope is independent of the WAL and snapshot framing around it.

use crate::crypto::{Algorithm, Decrypter, Encrypter};
use crate::error::{CoreError, CoreResult};
use ciborium::value::Value;

const KEY_ALGORITHM: u8 = 1;
const KEY_DATA: u8 = 2;

/// A payload tagged with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaybeEncryptedRecord {
    /// How `data` was transformed.
    pub algorithm: Algorithm,
    /// Ciphertext, or plaintext when not encrypted.
    pub data: Vec<u8>,
}

impl MaybeEncryptedRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(algorithm: Algorithm, data: Vec<u8>) -> Self {
        Self { algorithm, data }
    }

    /// Serializes the envelope.
    ///
    /// # Errors
    ///
    /// Returns `RecordEncode` if CBOR serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut fields = Vec::with_capacity(2);
        if let Some(id) = self.algorithm.to_wire() {
            fields.push((
                Value::Integer(KEY_ALGORITHM.into()),
                Value::Integer(id.into()),
            ));
        }
        fields.push((
            Value::Integer(KEY_DATA.into()),
            Value::Bytes(self.data.clone()),
        ));

        let mut out = Vec::with_capacity(self.data.len() + 16);
        ciborium::ser::into_writer(&Value::Map(fields), &mut out).map_err(|e| {
            CoreError::RecordEncode {
                message: e.to_string(),
            }
        })?;
        Ok(out)
    }

    /// Parses an envelope.
    ///
    /// Unknown keys are ignored and a missing data field decodes as empty.
    ///
    /// # Errors
    ///
    /// Returns `CannotDecrypt` (with no algorithm) if the bytes are not a
    /// well-formed envelope.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let value: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| malformed(format!("invalid CBOR: {e}")))?;
        let Value::Map(fields) = value else {
            return Err(malformed("envelope is not a map"));
        };

        let mut algorithm = None;
        let mut data = Vec::new();
        for (key, value) in fields {
            let Some(key) = key.as_integer().and_then(|k| u8::try_from(k).ok()) else {
                continue;
            };
            match key {
                KEY_ALGORITHM => {
                    let id = value
                        .as_integer()
                        .and_then(|i| u32::try_from(i).ok())
                        .ok_or_else(|| malformed("algorithm is not a u32"))?;
                    algorithm = Some(id);
                }
                KEY_DATA => {
                    data = value
                        .into_bytes()
                        .map_err(|_| malformed("data is not a byte string"))?;
                }
                _ => {}
            }
        }

        Ok(Self {
            algorithm: Algorithm::from_wire(algorithm),
            data,
        })
    }
}

fn malformed(reason: impl Into<String>) -> CoreError {
    CoreError::CannotDecrypt {
        algorithm: None,
        reason: reason.into(),
    }
}

/// Encrypts `payload` and returns the encoded envelope.
///
/// # Errors
///
/// Returns an error if encryption or encoding fails.
pub fn seal(encrypter: &dyn Encrypter, payload: &[u8]) -> CoreResult<Vec<u8>> {
    encrypter.encrypt(payload)?.encode()
}

/// Parses an encoded envelope and decrypts it.
///
/// # Errors
///
/// Returns `CannotDecrypt` if the envelope is malformed or no decrypter
/// accepts it.
pub fn open(decrypter: &dyn Decrypter, bytes: &[u8]) -> CoreResult<Vec<u8>> {
    decrypter.decrypt(&MaybeEncryptedRecord::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NoopCrypter;

    #[test]
    fn clear_record_omits_algorithm() {
        let record = MaybeEncryptedRecord::new(Algorithm::NotEncrypted, b"abc".to_vec());
        let bytes = record.encode().unwrap();

        let value: Value = ciborium::de::from_reader(&bytes[..]).unwrap();
        let Value::Map(fields) = value else {
            panic!("expected map")
        };
        assert_eq!(fields.len(), 1);
        assert_eq!(MaybeEncryptedRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn custom_algorithm_survives_encoding() {
        let record = MaybeEncryptedRecord::new(Algorithm::Custom(7), vec![1, 2, 3]);
        let decoded = MaybeEncryptedRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn legacy_zero_algorithm_is_clear() {
        let value = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(0.into())),
            (Value::Integer(2.into()), Value::Bytes(b"old".to_vec())),
        ]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&value, &mut bytes).unwrap();

        let decoded = MaybeEncryptedRecord::decode(&bytes).unwrap();
        assert_eq!(decoded.algorithm, Algorithm::NotEncrypted);
        assert_eq!(open(&NoopCrypter, &bytes).unwrap(), b"old");
    }

    #[test]
    fn unknown_keys_ignored_and_missing_data_is_empty() {
        let value = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(1.into())),
            (Value::Integer(9.into()), Value::Text("future".into())),
        ]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&value, &mut bytes).unwrap();

        let decoded = MaybeEncryptedRecord::decode(&bytes).unwrap();
        assert_eq!(decoded.algorithm, Algorithm::Aes256Gcm);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn garbage_is_cannot_decrypt() {
        let err = MaybeEncryptedRecord::decode(b"\xff\x00not cbor").unwrap_err();
        assert!(err.is_cannot_decrypt());

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&Value::Text("hi".into()), &mut bytes).unwrap();
        assert!(MaybeEncryptedRecord::decode(&bytes)
            .unwrap_err()
            .is_cannot_decrypt());
    }

    #[test]
    fn seal_then_open() {
        let sealed = seal(&NoopCrypter, b"payload").unwrap();
        assert_eq!(open(&NoopCrypter, &sealed).unwrap(), b"payload");
    }
}
