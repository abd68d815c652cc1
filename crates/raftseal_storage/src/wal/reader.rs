//! Segment record iterator.
//!
//! Reads one segment file and yields its records in order. Unlike a
//! tolerant replay, a record cut short at the end of the file is reported
//! as [`StorageError::UnexpectedEof`]; deciding whether to repair is left to
//! the caller.

use crate::error::{StorageError, StorageResult};
use crate::wal::record::{
    compute_crc32, WalRecord, WalRecordType, CRC_SIZE, HEADER_SIZE, WAL_MAGIC, WAL_VERSION,
};
use std::fs;
use std::path::{Path, PathBuf};

/// An iterator over the records of one segment file.
///
/// # Error Handling
///
/// - Truncated records (incomplete header or payload) return `UnexpectedEof`
/// - CRC mismatches return `ChecksumMismatch`
/// - Invalid magic, unsupported versions and unknown types return `WalCorruption`
///
/// The iterator stops after the first error.
pub struct SegmentReader {
    path: PathBuf,
    data: Vec<u8>,
    offset: usize,
    finished: bool,
}

impl SegmentReader {
    /// Reads the segment at `path` into memory.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let data = fs::read(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            data,
            offset: 0,
            finished: false,
        })
    }

    /// Offset just past the last record that decoded successfully.
    #[must_use]
    pub fn valid_len(&self) -> u64 {
        self.offset as u64
    }

    /// Path of the segment being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_next_record(&mut self) -> StorageResult<Option<(u64, WalRecord)>> {
        let start = self.offset;
        let remaining = self.data.len() - start;

        if remaining == 0 {
            return Ok(None);
        }

        if remaining < HEADER_SIZE {
            return Err(self.truncated(start));
        }

        let header = &self.data[start..start + HEADER_SIZE];

        if header[0..4] != WAL_MAGIC {
            return Err(StorageError::wal_corruption(format!(
                "invalid magic in {} at offset {start}",
                self.path.display()
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(StorageError::wal_corruption(format!(
                "unsupported version {version} in {} at offset {start}",
                self.path.display()
            )));
        }

        let type_byte = header[6];
        let record_type = WalRecordType::from_byte(type_byte).ok_or_else(|| {
            StorageError::wal_corruption(format!(
                "unknown record type {type_byte} in {} at offset {start}",
                self.path.display()
            ))
        })?;

        let payload_len =
            u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;

        if remaining < total_len {
            return Err(self.truncated(start));
        }

        let payload_end = start + HEADER_SIZE + payload_len;
        let crc_bytes: [u8; 4] = self.data[payload_end..payload_end + CRC_SIZE]
            .try_into()
            .map_err(|_| StorageError::wal_corruption("invalid crc"))?;
        let stored_crc = u32::from_le_bytes(crc_bytes);
        let computed_crc = compute_crc32(&self.data[start..payload_end]);

        if stored_crc != computed_crc {
            return Err(StorageError::ChecksumMismatch {
                path: self.path.clone(),
                offset: start as u64,
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record =
            WalRecord::decode_payload(record_type, &self.data[start + HEADER_SIZE..payload_end])?;
        self.offset += total_len;

        Ok(Some((start as u64, record)))
    }

    fn truncated(&self, offset: usize) -> StorageError {
        StorageError::UnexpectedEof {
            path: self.path.clone(),
            offset: offset as u64,
        }
    }
}

impl Iterator for SegmentReader {
    type Item = StorageResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entry, HardState};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn write_records(path: &Path, records: &[WalRecord]) -> Vec<u8> {
        let mut buf = Vec::new();
        for record in records {
            record.encode_into(&mut buf).unwrap();
        }
        fs::write(path, &buf).unwrap();
        buf
    }

    #[test]
    fn reads_all_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");
        let records = vec![
            WalRecord::Metadata(b"m".to_vec()),
            WalRecord::Entry(Entry::new(1, 1, b"a".to_vec())),
            WalRecord::State(HardState {
                term: 1,
                vote: 1,
                commit: 1,
            }),
        ];
        write_records(&path, &records);

        let read: Vec<_> = SegmentReader::open(&path)
            .unwrap()
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(read, records);
    }

    #[test]
    fn truncated_tail_is_unexpected_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");
        let buf = write_records(
            &path,
            &[
                WalRecord::Metadata(b"m".to_vec()),
                WalRecord::Entry(Entry::new(1, 1, vec![7; 64])),
            ],
        );
        let first_len = HEADER_SIZE + 1 + CRC_SIZE;
        fs::write(&path, &buf[..buf.len() - 10]).unwrap();

        let mut reader = SegmentReader::open(&path).unwrap();
        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(err.is_unexpected_eof());
        assert_eq!(reader.valid_len(), first_len as u64);
        assert!(reader.next().is_none());
    }

    #[test]
    fn partial_header_is_unexpected_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");
        let mut buf = write_records(&path, &[WalRecord::Metadata(b"m".to_vec())]);
        buf.extend_from_slice(&WAL_MAGIC);
        fs::write(&path, &buf).unwrap();

        let results: Vec<_> = SegmentReader::open(&path).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].as_ref().unwrap_err().is_unexpected_eof());
    }

    #[test]
    fn flipped_byte_is_checksum_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");
        let mut buf = write_records(&path, &[WalRecord::Metadata(b"meta".to_vec())]);
        buf[HEADER_SIZE] ^= 0xFF;
        fs::write(&path, &buf).unwrap();

        let err = SegmentReader::open(&path)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, StorageError::ChecksumMismatch { offset: 0, .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.wal");
        fs::write(&path, [0u8; 32]).unwrap();

        let err = SegmentReader::open(&path)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, StorageError::WalCorruption { .. }));
    }

    proptest! {
        #[test]
        fn cut_segment_reads_a_record_prefix(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..48),
                1..8,
            ),
            cut in any::<proptest::sample::Index>(),
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("seg.wal");
            let records: Vec<WalRecord> = payloads
                .into_iter()
                .enumerate()
                .map(|(i, data)| WalRecord::Entry(Entry::new(1, i as u64 + 1, data)))
                .collect();
            let buf = write_records(&path, &records);
            let len = cut.index(buf.len());
            fs::write(&path, &buf[..len]).unwrap();

            let mut reader = SegmentReader::open(&path).unwrap();
            let mut read = Vec::new();
            let mut torn = false;
            for result in reader.by_ref() {
                match result {
                    Ok((_, record)) => read.push(record),
                    Err(e) => {
                        prop_assert!(e.is_unexpected_eof());
                        torn = true;
                    }
                }
            }
            prop_assert_eq!(&read[..], &records[..read.len()]);
            prop_assert!(reader.valid_len() <= len as u64);
            prop_assert_eq!(torn, reader.valid_len() != len as u64);
        }
    }
}
