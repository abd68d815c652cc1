//! Crash simulation for WAL directories.
//!
//! A crash in the middle of an append leaves the last segment ending in a
//! partial record. These helpers produce that state, and a few nastier
//! ones, from a cleanly closed WAL.

use raftseal_storage::list_wal_segments;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Returns the path of the newest segment in `wal_dir`.
pub fn last_segment(wal_dir: &Path) -> PathBuf {
    let segments = list_wal_segments(wal_dir).expect("Failed to list WAL segments");
    let name = segments.last().expect("WAL has no segments");
    wal_dir.join(name)
}

/// Cuts `bytes` off the end of the newest segment, simulating a torn write.
///
/// Returns the segment path.
pub fn truncate_wal_tail(wal_dir: &Path, bytes: u64) -> PathBuf {
    let path = last_segment(wal_dir);
    let len = fs::metadata(&path).expect("Failed to stat segment").len();
    assert!(bytes < len, "cannot cut {bytes} bytes from a {len}-byte segment");
    OpenOptions::new()
        .write(true)
        .open(&path)
        .expect("Failed to open segment")
        .set_len(len - bytes)
        .expect("Failed to truncate segment");
    path
}

/// Flips one byte at `offset_from_end` bytes before the end of the newest
/// segment, simulating corruption that a checksum must catch.
pub fn corrupt_wal_tail(wal_dir: &Path, offset_from_end: u64) -> PathBuf {
    let path = last_segment(wal_dir);
    let mut bytes = fs::read(&path).expect("Failed to read segment");
    let len = bytes.len() as u64;
    assert!(offset_from_end > 0 && offset_from_end <= len);
    let at = (len - offset_from_end) as usize;
    bytes[at] ^= 0xff;
    fs::write(&path, bytes).expect("Failed to write segment");
    path
}

/// Appends `garbage` to the newest segment.
pub fn append_to_wal_tail(wal_dir: &Path, garbage: &[u8]) -> PathBuf {
    let path = last_segment(wal_dir);
    OpenOptions::new()
        .append(true)
        .open(&path)
        .expect("Failed to open segment")
        .write_all(garbage)
        .expect("Failed to append to segment");
    path
}
