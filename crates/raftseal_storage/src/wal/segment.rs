//! Segment file naming, discovery and repair.

use crate::error::{StorageError, StorageResult};
use crate::wal::reader::SegmentReader;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Extension of WAL segment files.
pub const SEGMENT_EXT: &str = "wal";

/// Suffix given to the copy of a segment taken before it is repaired.
const BROKEN_SUFFIX: &str = "broken";

/// Returns the file name of segment `seq` whose first entry is `index`.
#[must_use]
pub fn segment_name(seq: u64, index: u64) -> String {
    format!("{seq:016x}-{index:016x}.{SEGMENT_EXT}")
}

/// Parses a segment file name into `(seq, index)`.
#[must_use]
pub fn parse_segment_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(".wal")?;
    let (seq, index) = stem.split_once('-')?;
    if seq.len() != 16 || index.len() != 16 {
        return None;
    }
    Some((
        u64::from_str_radix(seq, 16).ok()?,
        u64::from_str_radix(index, 16).ok()?,
    ))
}

/// Lists segment file names in `dir`, oldest first.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_wal_segments(dir: &Path) -> StorageResult<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| parse_segment_name(name).is_some())
        .collect();
    names.sort();
    Ok(names)
}

/// Returns `true` if `dir` holds at least one WAL segment.
#[must_use]
pub fn wal_exists(dir: &Path) -> bool {
    list_wal_segments(dir).map(|n| !n.is_empty()).unwrap_or(false)
}

/// Picks the segments needed to replay from snapshot `index`: the last
/// segment starting at or before `index`, and everything after it.
pub(crate) fn select_segments(names: &[String], index: u64) -> StorageResult<&[String]> {
    let mut start = None;
    for (i, name) in names.iter().enumerate() {
        let (_, first) = parse_segment_name(name)
            .ok_or_else(|| StorageError::wal_corruption(format!("bad segment name {name}")))?;
        if first <= index {
            start = Some(i);
        }
    }
    let start = start.ok_or_else(|| {
        StorageError::wal_corruption(format!("no segment covers snapshot index {index}"))
    })?;
    Ok(&names[start..])
}

/// Truncates a torn record off the tail of the last segment in `dir`.
///
/// Returns `Ok(true)` when the last segment ended in a partial record and was
/// cut back to its last complete record. A copy of the original file is
/// kept next to it with a `.broken` suffix. Returns `Ok(false)` when there
/// is nothing this function can fix: a clean segment, a checksum mismatch,
/// or any other corruption.
///
/// # Errors
///
/// Returns an error if the directory or segment cannot be read or written.
pub fn repair_wal(dir: &Path) -> StorageResult<bool> {
    let names = list_wal_segments(dir)?;
    let Some(last) = names.last() else {
        return Ok(false);
    };
    let path = dir.join(last);

    let mut reader = SegmentReader::open(&path)?;
    let mut outcome = None;
    for result in reader.by_ref() {
        if let Err(e) = result {
            outcome = Some(e);
            break;
        }
    }

    match outcome {
        None => Ok(false),
        Some(StorageError::UnexpectedEof { offset, .. }) => {
            let broken = path.with_extension(format!("{SEGMENT_EXT}.{BROKEN_SUFFIX}"));
            fs::copy(&path, &broken)?;

            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(reader.valid_len())?;
            file.sync_all()?;
            sync_dir(dir)?;

            info!(
                segment = %path.display(),
                truncated_at = offset,
                "repaired torn WAL tail"
            );
            Ok(true)
        }
        Some(e) => {
            warn!(segment = %path.display(), error = %e, "WAL damage is not repairable");
            Ok(false)
        }
    }
}

/// Fsyncs a directory so entry creation, rename and removal are durable.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> StorageResult<()> {
    // NTFS journals directory metadata
    Ok(())
}

/// Returns the sibling temp directory used to build `dir` atomically.
#[must_use]
pub fn temp_dir_for(dir: &Path) -> PathBuf {
    let mut name = dir.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Moves a fully-built `tmp` directory onto `dir`.
///
/// An existing empty `dir` is replaced; a non-empty one is an error.
pub fn install_dir(tmp: &Path, dir: &Path) -> StorageResult<()> {
    if dir.exists() {
        if fs::read_dir(dir)?.next().is_some() {
            return Err(StorageError::invalid_operation(format!(
                "refusing to replace non-empty directory {}",
                dir.display()
            )));
        }
        fs::remove_dir(dir)?;
    }
    fs::rename(tmp, dir)?;
    if let Some(parent) = dir.parent() {
        if !parent.as_os_str().is_empty() {
            sync_dir(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Entry;
    use crate::wal::record::WalRecord;
    use tempfile::tempdir;

    #[test]
    fn segment_names_parse() {
        let name = segment_name(3, 0x1f);
        assert_eq!(name, "0000000000000003-000000000000001f.wal");
        assert_eq!(parse_segment_name(&name), Some((3, 0x1f)));
        assert_eq!(parse_segment_name("0-0.wal"), None);
        assert_eq!(parse_segment_name(&format!("{name}.broken")), None);
    }

    #[test]
    fn listing_ignores_other_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(segment_name(1, 10)), b"").unwrap();
        fs::write(dir.path().join(segment_name(0, 0)), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let names = list_wal_segments(dir.path()).unwrap();
        assert_eq!(names, vec![segment_name(0, 0), segment_name(1, 10)]);
        assert!(wal_exists(dir.path()));
    }

    #[test]
    fn missing_dir_has_no_wal() {
        let dir = tempdir().unwrap();
        assert!(!wal_exists(&dir.path().join("absent")));
        assert!(!wal_exists(dir.path()));
    }

    #[test]
    fn selects_segment_covering_index() {
        let names = vec![segment_name(0, 0), segment_name(1, 10), segment_name(2, 20)];
        assert_eq!(select_segments(&names, 0).unwrap(), &names[..]);
        assert_eq!(select_segments(&names, 15).unwrap(), &names[1..]);
        assert_eq!(select_segments(&names, 20).unwrap(), &names[2..]);
        assert!(select_segments(&[segment_name(1, 5)], 2).is_err());
    }

    #[test]
    fn repair_truncates_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(segment_name(0, 0));
        let mut buf = Vec::new();
        WalRecord::Metadata(b"m".to_vec()).encode_into(&mut buf).unwrap();
        let good = buf.len();
        WalRecord::Entry(Entry::new(1, 1, vec![1; 100]))
            .encode_into(&mut buf)
            .unwrap();
        fs::write(&path, &buf[..buf.len() - 5]).unwrap();

        assert!(repair_wal(dir.path()).unwrap());
        assert_eq!(fs::metadata(&path).unwrap().len(), good as u64);
        assert!(dir.path().join(format!("{}.broken", segment_name(0, 0))).exists());

        // Nothing left to repair.
        assert!(!repair_wal(dir.path()).unwrap());
    }

    #[test]
    fn repair_refuses_checksum_damage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(segment_name(0, 0));
        let mut buf = Vec::new();
        WalRecord::Metadata(b"meta".to_vec())
            .encode_into(&mut buf)
            .unwrap();
        buf[12] ^= 0xFF;
        fs::write(&path, &buf).unwrap();

        assert!(!repair_wal(dir.path()).unwrap());
        assert_eq!(fs::metadata(&path).unwrap().len(), buf.len() as u64);
    }

    #[test]
    fn install_replaces_empty_dir() {
        let root = tempdir().unwrap();
        let dir = root.path().join("wal");
        let tmp = temp_dir_for(&dir);
        fs::create_dir(&dir).unwrap();
        fs::create_dir(&tmp).unwrap();
        fs::write(tmp.join("x"), b"1").unwrap();

        install_dir(&tmp, &dir).unwrap();
        assert!(dir.join("x").exists());
        assert!(!tmp.exists());
    }
}
