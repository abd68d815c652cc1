//! Segmented write-ahead log for raft entries and hard state.
//!
//! A WAL is a directory of segment files named `{seq:016x}-{index:016x}.wal`,
//! where `index` is the first entry index the segment may hold. Each segment
//! starts with the metadata record (and the latest hard state, for every
//! segment after the first), followed by appended records.
//!
//! ## Record Format
//!
//! ```text
//! | magic "RWAL" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery Policy
//!
//! Replay is strict. Every damaged record aborts `read_all`:
//!
//! - **Torn tail** (partial header or payload at end of file) → `UnexpectedEof`
//! - **CRC mismatch** → `ChecksumMismatch`
//! - **Bad magic, version or type** → `WalCorruption`
//!
//! Only the torn tail is repairable, via [`repair_wal`]. Whether to repair is
//! a decision for the caller.
//!
//! ## Invariants
//!
//! - Each `save` is a single write of all its entry records plus the state record
//! - A later entry at an already-seen index truncates the replayed log there
//! - Entries at or below the snapshot index are skipped on replay

mod reader;
mod record;
mod segment;
mod writer;

pub use reader::SegmentReader;
pub use record::{compute_crc32, WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
pub use segment::{
    install_dir, list_wal_segments, parse_segment_name, repair_wal, segment_name, temp_dir_for,
    wal_exists, SEGMENT_EXT,
};
pub use writer::{FileWal, WalOptions};

pub(crate) use segment::sync_dir;
