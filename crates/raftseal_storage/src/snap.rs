//! Snapshot files.
//!
//! Each snapshot lives in its own file named `{term:016x}-{index:016x}.snap`:
//!
//! ```text
//! | magic "RSNP" (4) | version (2) | index (8) | term (8) |
//! | voters (4 + 8n) | learners (4 + 8n) | data_len (8) | data | crc32 (4) |
//! ```
//!
//! Files are written under a `.tmp` name, fsynced and renamed, so a reader
//! never sees a partial snapshot under its final name.

use crate::error::{StorageError, StorageResult};
use crate::types::{ConfState, Snapshot, SnapshotMetadata};
use crate::wal::{compute_crc32, sync_dir};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extension of snapshot files.
pub const SNAP_EXT: &str = "snap";

const SNAP_MAGIC: [u8; 4] = *b"RSNP";
const SNAP_VERSION: u16 = 1;

/// Returns the file name for a snapshot at `(term, index)`.
#[must_use]
pub fn snapshot_name(term: u64, index: u64) -> String {
    format!("{term:016x}-{index:016x}.{SNAP_EXT}")
}

/// Parses a snapshot file name into `(term, index)`.
#[must_use]
pub fn parse_snapshot_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(".snap")?;
    let (term, index) = stem.split_once('-')?;
    if term.len() != 16 || index.len() != 16 {
        return None;
    }
    Some((
        u64::from_str_radix(term, 16).ok()?,
        u64::from_str_radix(index, 16).ok()?,
    ))
}

/// Lists snapshot file names in `dir`, newest first.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_snapshots(dir: &Path) -> StorageResult<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| parse_snapshot_name(name).is_some())
        .collect();
    names.sort_unstable_by(|a, b| b.cmp(a));
    Ok(names)
}

/// Serializes a snapshot into the file format.
#[must_use]
pub fn encode_snapshot(snapshot: &Snapshot) -> Vec<u8> {
    let conf = &snapshot.metadata.conf_state;
    let mut buf = Vec::with_capacity(
        46 + 8 * (conf.voters.len() + conf.learners.len()) + snapshot.data.len(),
    );
    buf.extend_from_slice(&SNAP_MAGIC);
    buf.extend_from_slice(&SNAP_VERSION.to_le_bytes());
    buf.extend_from_slice(&snapshot.metadata.index.to_le_bytes());
    buf.extend_from_slice(&snapshot.metadata.term.to_le_bytes());
    for ids in [&conf.voters, &conf.learners] {
        buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
        for id in ids {
            buf.extend_from_slice(&id.to_le_bytes());
        }
    }
    buf.extend_from_slice(&(snapshot.data.len() as u64).to_le_bytes());
    buf.extend_from_slice(&snapshot.data);
    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Parses a snapshot file read from `path`.
///
/// # Errors
///
/// Returns `SnapshotCorruption` for any framing or checksum problem.
pub fn decode_snapshot(path: &Path, bytes: &[u8]) -> StorageResult<Snapshot> {
    let corrupt = |msg: &str| StorageError::snapshot_corruption(path, msg);

    if bytes.len() < SNAP_MAGIC.len() + 2 + 4 {
        return Err(corrupt("file too short"));
    }
    let (body, crc) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    if stored != compute_crc32(body) {
        return Err(corrupt("checksum mismatch"));
    }

    let mut cursor = Cursor { buf: body, pos: 0 };
    if cursor.take(4).ok_or_else(|| corrupt("missing magic"))? != SNAP_MAGIC {
        return Err(corrupt("invalid magic"));
    }
    let version = cursor.u16().ok_or_else(|| corrupt("missing version"))?;
    if version > SNAP_VERSION {
        return Err(corrupt("unsupported version"));
    }

    let index = cursor.u64().ok_or_else(|| corrupt("missing index"))?;
    let term = cursor.u64().ok_or_else(|| corrupt("missing term"))?;
    let voters = cursor.ids().ok_or_else(|| corrupt("truncated voters"))?;
    let learners = cursor.ids().ok_or_else(|| corrupt("truncated learners"))?;
    let data_len = cursor.u64().ok_or_else(|| corrupt("missing data length"))?;
    let data = usize::try_from(data_len)
        .ok()
        .and_then(|len| cursor.take(len))
        .ok_or_else(|| corrupt("truncated data"))?
        .to_vec();
    if cursor.pos != body.len() {
        return Err(corrupt("trailing bytes"));
    }

    Ok(Snapshot {
        metadata: SnapshotMetadata {
            index,
            term,
            conf_state: ConfState { voters, learners },
        },
        data,
    })
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let out = self.buf.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(out)
    }

    fn u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.take(2)?.try_into().ok()?))
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn ids(&mut self) -> Option<Vec<u64>> {
        let n = self.u32()? as usize;
        (0..n).map(|_| self.u64()).collect()
    }
}

/// Saves and loads snapshots in a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotter {
    dir: PathBuf,
}

impl FileSnapshotter {
    /// Creates a snapshotter for `dir`. The directory is not touched.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the snapshot directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durably writes `snapshot`. An empty snapshot is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or renamed.
    pub fn save_snap(&self, snapshot: &Snapshot) -> StorageResult<()> {
        if snapshot.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;

        let name = snapshot_name(snapshot.metadata.term, snapshot.metadata.index);
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{name}.tmp"));

        let bytes = encode_snapshot(snapshot);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        sync_dir(&self.dir)?;

        debug!(
            index = snapshot.metadata.index,
            term = snapshot.metadata.term,
            bytes = bytes.len(),
            "saved snapshot"
        );
        Ok(())
    }

    /// Loads the newest readable snapshot, or `None` if there is none.
    ///
    /// A damaged snapshot file is renamed with a `.broken` suffix and the
    /// next older one is tried.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory is missing or unreadable.
    pub fn load(&self) -> StorageResult<Option<Snapshot>> {
        for name in list_snapshots(&self.dir)? {
            let path = self.dir.join(&name);
            let bytes = fs::read(&path)?;
            match decode_snapshot(&path, &bytes) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping damaged snapshot");
                    fs::rename(&path, self.dir.join(format!("{name}.broken")))?;
                }
            }
        }
        Ok(None)
    }
}
