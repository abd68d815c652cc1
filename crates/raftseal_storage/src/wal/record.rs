//! WAL record types and serialization.

use crate::error::{StorageError, StorageResult};
use crate::types::{Entry, EntryType, HardState, WalSnapshot};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"RWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Header size for WAL records.
/// magic (4) + version (2) + type (1) + length (4) = 11 bytes
pub const HEADER_SIZE: usize = 11;

/// CRC size.
pub const CRC_SIZE: usize = 4;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Opaque metadata given at creation.
    Metadata = 1,
    /// A raft log entry.
    Entry = 2,
    /// A raft hard state.
    State = 3,
    /// A snapshot marker.
    Snapshot = 4,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Metadata),
            2 => Some(Self::Entry),
            3 => Some(Self::State),
            4 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Metadata written at the head of every segment.
    Metadata(Vec<u8>),
    /// A raft log entry.
    Entry(Entry),
    /// A raft hard state.
    State(HardState),
    /// A snapshot marker.
    Snapshot(WalSnapshot),
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Metadata(_) => WalRecordType::Metadata,
            Self::Entry(_) => WalRecordType::Entry,
            Self::State(_) => WalRecordType::State,
            Self::Snapshot(_) => WalRecordType::Snapshot,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if entry data does not fit the 4-byte length field.
    pub fn encode_payload(&self) -> StorageResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Metadata(data) => buf.extend_from_slice(data),

            Self::Entry(entry) => {
                let len = u32::try_from(entry.data.len()).map_err(|_| {
                    StorageError::invalid_operation(format!(
                        "entry payload too large: {} bytes",
                        entry.data.len()
                    ))
                })?;
                buf.reserve(21 + entry.data.len());
                buf.extend_from_slice(&entry.term.to_le_bytes());
                buf.extend_from_slice(&entry.index.to_le_bytes());
                buf.push(entry.entry_type.as_byte());
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(&entry.data);
            }

            Self::State(state) => {
                buf.extend_from_slice(&state.term.to_le_bytes());
                buf.extend_from_slice(&state.vote.to_le_bytes());
                buf.extend_from_slice(&state.commit.to_le_bytes());
            }

            Self::Snapshot(snap) => {
                buf.extend_from_slice(&snap.index.to_le_bytes());
                buf.extend_from_slice(&snap.term.to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> StorageResult<Self> {
        let mut cursor = 0;

        let read_u64 = |cursor: &mut usize| -> StorageResult<u64> {
            let bytes: [u8; 8] = payload
                .get(*cursor..*cursor + 8)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| StorageError::wal_corruption("unexpected end of payload"))?;
            *cursor += 8;
            Ok(u64::from_le_bytes(bytes))
        };

        let record = match record_type {
            WalRecordType::Metadata => return Ok(Self::Metadata(payload.to_vec())),

            WalRecordType::Entry => {
                let term = read_u64(&mut cursor)?;
                let index = read_u64(&mut cursor)?;
                let type_byte = *payload
                    .get(cursor)
                    .ok_or_else(|| StorageError::wal_corruption("unexpected end of payload"))?;
                cursor += 1;
                let entry_type = EntryType::from_byte(type_byte).ok_or_else(|| {
                    StorageError::wal_corruption(format!("unknown entry type {type_byte}"))
                })?;
                let len: [u8; 4] = payload
                    .get(cursor..cursor + 4)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| StorageError::wal_corruption("unexpected end of payload"))?;
                cursor += 4;
                let len = u32::from_le_bytes(len) as usize;
                let data = payload
                    .get(cursor..cursor + len)
                    .ok_or_else(|| StorageError::wal_corruption("unexpected end of entry data"))?
                    .to_vec();
                cursor += len;
                Self::Entry(Entry {
                    term,
                    index,
                    entry_type,
                    data,
                })
            }

            WalRecordType::State => Self::State(HardState {
                term: read_u64(&mut cursor)?,
                vote: read_u64(&mut cursor)?,
                commit: read_u64(&mut cursor)?,
            }),

            WalRecordType::Snapshot => Self::Snapshot(WalSnapshot {
                index: read_u64(&mut cursor)?,
                term: read_u64(&mut cursor)?,
            }),
        };

        if cursor != payload.len() {
            return Err(StorageError::wal_corruption(format!(
                "trailing bytes in {record_type:?} record: expected {cursor} bytes, got {}",
                payload.len()
            )));
        }

        Ok(record)
    }

    /// Appends the full framed record (header, payload, CRC) to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> StorageResult<()> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::invalid_operation("WAL record payload too large"))?;

        let start = out.len();
        out.reserve(HEADER_SIZE + payload.len() + CRC_SIZE);
        out.extend_from_slice(&WAL_MAGIC);
        out.extend_from_slice(&WAL_VERSION.to_le_bytes());
        out.push(self.record_type().as_byte());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&payload);

        // CRC32 (over everything before it)
        let crc = compute_crc32(&out[start..]);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }
}

/// Computes CRC32 checksum (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
