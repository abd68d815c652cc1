//! File-backed WAL handle.

use crate::error::{StorageError, StorageResult};
use crate::types::{Entry, HardState, WalData, WalSnapshot};
use crate::wal::reader::SegmentReader;
use crate::wal::record::WalRecord;
use crate::wal::segment::{
    install_dir, list_wal_segments, segment_name, select_segments, sync_dir, temp_dir_for,
    wal_exists,
};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tuning for a WAL handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalOptions {
    /// Size after which the tail segment is sealed and a new one started.
    pub segment_size_bytes: u64,
    /// Whether every `save` is fsynced before returning.
    pub sync_writes: bool,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            segment_size_bytes: 64 * 1024 * 1024, // 64 MB
            sync_writes: true,
        }
    }
}

/// The open tail segment.
struct Tail {
    file: File,
    path: PathBuf,
    seq: u64,
    size: u64,
    last_index: u64,
    metadata: Vec<u8>,
    hard_state: HardState,
}

enum Mode {
    /// Opened at a snapshot; `read_all` has not succeeded yet.
    Reading {
        snapshot: WalSnapshot,
        segments: Vec<String>,
    },
    Appending(Tail),
    Closed,
}

/// A write-ahead log stored as a directory of segment files.
///
/// A handle returned by [`FileWal::create`] is ready for appends. A handle
/// returned by [`FileWal::open`] must first replay the log with
/// [`FileWal::read_all`]; only then does it accept writes.
///
/// # Thread Safety
///
/// All methods take `&self`; an internal mutex serializes them. While
/// appending, the tail segment holds an exclusive advisory lock so that
/// segment garbage collection cannot remove it.
pub struct FileWal {
    dir: PathBuf,
    options: WalOptions,
    state: Mutex<Mode>,
}

impl FileWal {
    /// Creates a new WAL in `dir` with the given metadata.
    ///
    /// The first segment is built in a sibling `.tmp` directory and renamed
    /// into place, so a crash never leaves a half-initialized WAL behind.
    ///
    /// # Errors
    ///
    /// Returns `WalExists` if `dir` already holds segments.
    pub fn create(dir: &Path, metadata: &[u8], options: WalOptions) -> StorageResult<Self> {
        if wal_exists(dir) {
            return Err(StorageError::WalExists {
                dir: dir.to_path_buf(),
            });
        }

        let tmp = temp_dir_for(dir);
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(&tmp)?;

        let name = segment_name(0, 0);
        let mut buf = Vec::new();
        WalRecord::Metadata(metadata.to_vec()).encode_into(&mut buf)?;
        WalRecord::Snapshot(WalSnapshot::default()).encode_into(&mut buf)?;
        {
            let mut file = File::create(tmp.join(&name))?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        sync_dir(&tmp)?;
        install_dir(&tmp, dir)?;

        let path = dir.join(&name);
        let file = open_locked(&path)?;
        debug!(dir = %dir.display(), "created WAL");

        Ok(Self {
            dir: dir.to_path_buf(),
            options,
            state: Mutex::new(Mode::Appending(Tail {
                file,
                path,
                seq: 0,
                size: buf.len() as u64,
                last_index: 0,
                metadata: metadata.to_vec(),
                hard_state: HardState::default(),
            })),
        })
    }

    /// Opens an existing WAL positioned at `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns `NoWal` if `dir` is missing or holds no segments.
    pub fn open(dir: &Path, snapshot: WalSnapshot, options: WalOptions) -> StorageResult<Self> {
        let segments = match list_wal_segments(dir) {
            Ok(names) if !names.is_empty() => names,
            Ok(_) => {
                return Err(StorageError::NoWal {
                    dir: dir.to_path_buf(),
                })
            }
            Err(e) if e.is_not_found() => {
                return Err(StorageError::NoWal {
                    dir: dir.to_path_buf(),
                })
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            options,
            state: Mutex::new(Mode::Reading { snapshot, segments }),
        })
    }

    /// Returns the WAL directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replays the log from the snapshot the handle was opened at.
    ///
    /// On success the handle switches to append mode. On failure it stays
    /// in read mode and the caller should drop it; a torn tail can be fixed
    /// with [`crate::repair_wal`] and the WAL reopened.
    ///
    /// # Errors
    ///
    /// - `UnexpectedEof` if a segment ends in a partial record
    /// - `ChecksumMismatch` / `WalCorruption` for damaged records
    /// - `MetadataConflict` if segments disagree on metadata
    /// - `SnapshotNotFound` / `SnapshotMismatch` if the marker is absent or differs
    pub fn read_all(&self) -> StorageResult<WalData> {
        let mut state = self.state.lock();
        let (snapshot, segments) = match &*state {
            Mode::Reading { snapshot, segments } => (*snapshot, segments.clone()),
            Mode::Appending(_) => {
                return Err(StorageError::invalid_operation("WAL has already been read"))
            }
            Mode::Closed => return Err(StorageError::Closed),
        };

        let selected = select_segments(&segments, snapshot.index)?;

        let mut metadata: Option<Vec<u8>> = None;
        let mut hard_state = HardState::default();
        let mut entries: Vec<Entry> = Vec::new();
        let mut last_index = snapshot.index;
        let mut matched = false;

        for name in selected {
            for result in SegmentReader::open(&self.dir.join(name))? {
                let (_, record) = result?;
                match record {
                    WalRecord::Metadata(data) => {
                        if metadata.as_ref().is_some_and(|m| *m != data) {
                            return Err(StorageError::MetadataConflict {
                                dir: self.dir.clone(),
                            });
                        }
                        metadata = Some(data);
                    }
                    WalRecord::Entry(entry) => {
                        if entry.index > snapshot.index {
                            let pos = usize::try_from(entry.index - snapshot.index - 1)
                                .map_err(|_| StorageError::wal_corruption("entry index overflow"))?;
                            if pos > entries.len() {
                                return Err(StorageError::wal_corruption(format!(
                                    "missing log entries before index {}",
                                    entry.index
                                )));
                            }
                            entries.truncate(pos);
                            last_index = entry.index;
                            entries.push(entry);
                        }
                    }
                    WalRecord::State(hs) => hard_state = hs,
                    WalRecord::Snapshot(marker) => {
                        if marker.index == snapshot.index {
                            if marker.term != snapshot.term {
                                return Err(StorageError::SnapshotMismatch {
                                    index: marker.index,
                                    expected: snapshot.term,
                                    found: marker.term,
                                });
                            }
                            matched = true;
                        }
                        last_index = last_index.max(marker.index);
                    }
                }
            }
        }

        if !matched && snapshot.index != 0 {
            return Err(StorageError::SnapshotNotFound {
                index: snapshot.index,
                term: snapshot.term,
            });
        }
        let metadata = metadata
            .ok_or_else(|| StorageError::wal_corruption("WAL holds no metadata record"))?;

        let tail_name = selected
            .last()
            .ok_or_else(|| StorageError::wal_corruption("no segments selected"))?;
        let (seq, _) = crate::wal::segment::parse_segment_name(tail_name)
            .ok_or_else(|| StorageError::wal_corruption(format!("bad segment name {tail_name}")))?;
        let path = self.dir.join(tail_name);
        let file = open_locked(&path)?;
        let size = file.metadata()?.len();

        debug!(
            dir = %self.dir.display(),
            entries = entries.len(),
            last_index,
            "replayed WAL"
        );

        *state = Mode::Appending(Tail {
            file,
            path,
            seq,
            size,
            last_index,
            metadata: metadata.clone(),
            hard_state,
        });

        Ok(WalData {
            metadata,
            hard_state,
            entries,
        })
    }

    /// Appends entries followed by the hard state, as one write.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is not in append mode or the write fails.
    pub fn save(&self, hard_state: &HardState, entries: &[Entry]) -> StorageResult<()> {
        if hard_state.is_empty() && entries.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let tail = Self::tail_mut(&mut state)?;

        let mut buf = Vec::new();
        for entry in entries {
            WalRecord::Entry(entry.clone()).encode_into(&mut buf)?;
        }
        if !hard_state.is_empty() {
            WalRecord::State(*hard_state).encode_into(&mut buf)?;
        }

        tail.file.write_all(&buf)?;
        tail.size += buf.len() as u64;
        if self.options.sync_writes {
            tail.file.sync_data()?;
        }

        if let Some(last) = entries.last() {
            tail.last_index = last.index;
        }
        if !hard_state.is_empty() {
            tail.hard_state = *hard_state;
        }

        if tail.size >= self.options.segment_size_bytes {
            self.cut(tail)?;
        }
        Ok(())
    }

    /// Appends a snapshot marker and syncs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is not in append mode or the write fails.
    pub fn save_snapshot(&self, snapshot: &WalSnapshot) -> StorageResult<()> {
        let mut state = self.state.lock();
        let tail = Self::tail_mut(&mut state)?;

        let mut buf = Vec::new();
        WalRecord::Snapshot(*snapshot).encode_into(&mut buf)?;
        tail.file.write_all(&buf)?;
        tail.file.sync_data()?;
        tail.size += buf.len() as u64;
        tail.last_index = tail.last_index.max(snapshot.index);
        Ok(())
    }

    /// Syncs and releases the tail segment. Closing twice is a no-op.
    pub fn close(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if let Mode::Appending(tail) = &mut *state {
            tail.file.flush()?;
            tail.file.sync_all()?;
            FileExt::unlock(&tail.file)?;
        }
        *state = Mode::Closed;
        Ok(())
    }

    fn tail_mut(state: &mut Mode) -> StorageResult<&mut Tail> {
        match state {
            Mode::Appending(tail) => Ok(tail),
            Mode::Reading { .. } => Err(StorageError::invalid_operation(
                "WAL must be read to the end before writing",
            )),
            Mode::Closed => Err(StorageError::Closed),
        }
    }

    /// Seals the tail and starts a new segment headed by metadata and state.
    fn cut(&self, tail: &mut Tail) -> StorageResult<()> {
        tail.file.sync_all()?;

        let seq = tail.seq + 1;
        let path = self.dir.join(segment_name(seq, tail.last_index + 1));

        let mut buf = Vec::new();
        WalRecord::Metadata(tail.metadata.clone()).encode_into(&mut buf)?;
        if !tail.hard_state.is_empty() {
            WalRecord::State(tail.hard_state).encode_into(&mut buf)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        sync_dir(&self.dir)?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::Locked { path: path.clone() })?;

        let old = std::mem::replace(&mut tail.file, file);
        FileExt::unlock(&old)?;
        debug!(
            sealed = %tail.path.display(),
            next = %path.display(),
            "cut WAL segment"
        );

        tail.path = path;
        tail.seq = seq;
        tail.size = buf.len() as u64;
        Ok(())
    }
}

impl std::fmt::Debug for FileWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWal")
            .field("dir", &self.dir)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn open_locked(path: &Path) -> StorageResult<File> {
    let file = OpenOptions::new().read(true).append(true).open(path)?;
    file.try_lock_exclusive().map_err(|_| StorageError::Locked {
        path: path.to_path_buf(),
    })?;
    Ok(file)
}
