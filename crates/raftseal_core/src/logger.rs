//! The encrypted raft logger.
//!
//! [`EncryptedRaftLogger`] is what the consensus core talks to. It owns the
//! current WAL and snapshotter, resolves and migrates older on-disk layouts
//! at bootstrap, and swaps keys at runtime.
//!
//! ## Lifecycle
//!
//! 1. [`EncryptedRaftLogger::bootstrap_new`] for a node with no state, or
//!    [`EncryptedRaftLogger::bootstrap_from_disk`] to recover existing state
//! 2. [`EncryptedRaftLogger::save_entries`] and
//!    [`EncryptedRaftLogger::save_snapshot`] in steady state, with
//!    [`EncryptedRaftLogger::rotate_encryption_key`] whenever a new DEK
//!    arrives
//! 3. [`EncryptedRaftLogger::close`]
//!
//! ## Concurrency
//!
//! Saves hold a shared lock on the logger state; rotation, bootstrap and
//! close hold it exclusively. Each save therefore sees one set of crypters
//! from start to finish.

use crate::config::LoggerConfig;
use crate::crypto::{
    AesGcmSuite, CipherSuite, CrypterSet, DataEncryptionKey, Decrypter, Encrypter,
};
use crate::engine::{RawSnapFactory, RawWalFactory, Snapshotter, Wal};
use crate::error::{CoreError, CoreResult};
use crate::layout::{Layout, LayoutVersion};
use crate::migration::{read_repair_wal, CancelToken};
use crate::snap::{EncryptedSnapFactory, EncryptedSnapshotter};
use crate::wal::{EncryptedWal, EncryptedWalFactory};
use fs2::FileExt;
use parking_lot::RwLock;
use raftseal_storage::{
    list_snapshots, list_wal_segments, parse_segment_name, parse_snapshot_name, snapshot_name,
    wal_exists, Entry, HardState, Snapshot, StorageError, WalData,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The keys the logger encrypts and decrypts with.
struct Keyring {
    encrypter: Arc<dyn Encrypter>,
    decrypter: Arc<dyn Decrypter>,
    /// Decrypters for earlier keys, newest first.
    older: Vec<Arc<dyn Decrypter>>,
}

impl Keyring {
    fn crypters(&self) -> CrypterSet {
        CrypterSet::new(self.encrypter.clone(), self.decrypter.clone())
            .with_fallbacks(self.older.clone())
    }

    /// Drops the oldest decrypters beyond `limit`. Returns how many went.
    fn retain_older(&mut self, limit: usize) -> usize {
        let dropped = self.older.len().saturating_sub(limit);
        self.older.truncate(limit);
        dropped
    }
}

/// The open WAL and snapshotter.
struct OpenLog {
    wal: EncryptedWal,
    snapshotter: EncryptedSnapshotter,
}

struct State {
    keyring: Keyring,
    log: Option<OpenLog>,
}

/// Encrypted WAL and snapshot storage for one raft node.
pub struct EncryptedRaftLogger {
    config: LoggerConfig,
    layout: Layout,
    suite: Arc<dyn CipherSuite>,
    raw_wal: Arc<RawWalFactory>,
    state: RwLock<State>,
}

impl EncryptedRaftLogger {
    /// Creates a logger encrypting with AES-256-GCM under `key`.
    ///
    /// Performs no I/O; call one of the bootstrap methods next.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the key is unusable.
    pub fn new(config: LoggerConfig, key: &DataEncryptionKey) -> CoreResult<Self> {
        Self::with_cipher_suite(config, key, Arc::new(AesGcmSuite))
    }

    /// Creates a logger whose crypters come from `suite`.
    ///
    /// # Errors
    ///
    /// Returns an error if `suite` rejects the key.
    pub fn with_cipher_suite(
        config: LoggerConfig,
        key: &DataEncryptionKey,
        suite: Arc<dyn CipherSuite>,
    ) -> CoreResult<Self> {
        let (encrypter, decrypter) = suite.crypters(key)?;
        let layout = Layout::new(config.state_dir.clone());
        let raw_wal = Arc::new(RawWalFactory::new(config.wal_options()));
        Ok(Self {
            config,
            layout,
            suite,
            raw_wal,
            state: RwLock::new(State {
                keyring: Keyring {
                    encrypter,
                    decrypter,
                    older: Vec::new(),
                },
                log: None,
            }),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Returns the on-disk layout.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// WAL directory of the current layout version.
    #[must_use]
    pub fn wal_dir(&self) -> PathBuf {
        self.layout.wal_dir()
    }

    /// Snapshot directory of the current layout version.
    #[must_use]
    pub fn snap_dir(&self) -> PathBuf {
        self.layout.snap_dir()
    }

    /// Returns `true` between a successful bootstrap and [`Self::close`].
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.read().log.is_some()
    }

    fn factories(&self, crypters: &CrypterSet) -> (EncryptedWalFactory, EncryptedSnapFactory) {
        (
            EncryptedWalFactory::new(self.raw_wal.clone(), crypters.clone()),
            EncryptedSnapFactory::new(Arc::new(RawSnapFactory), crypters.clone()),
        )
    }

    /// Creates a fresh WAL and snapshot directory holding `metadata`.
    ///
    /// # Errors
    ///
    /// Returns `WalExists` if a WAL is already present in the current
    /// layout, or an error if `metadata` cannot be encrypted (nothing is
    /// created in that case).
    pub fn bootstrap_new(&self, metadata: &[u8]) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.log.is_some() {
            return Err(CoreError::invalid_operation("logger is already open"));
        }

        let wal_dir = self.wal_dir();
        let snap_dir = self.snap_dir();
        if wal_exists(&wal_dir) {
            return Err(CoreError::WalExists { dir: wal_dir });
        }

        let crypters = state.keyring.crypters();
        let (wal_factory, snap_factory) = self.factories(&crypters);
        let wal = wal_factory.create_wal(&wal_dir, metadata)?;
        fs::create_dir_all(&snap_dir)?;

        info!(wal_dir = %wal_dir.display(), "bootstrapped new raft log");
        state.log = Some(OpenLog {
            wal,
            snapshotter: snap_factory.snapshotter(&snap_dir),
        });
        Ok(())
    }

    /// Loads existing state, migrating it from an older layout if needed.
    ///
    /// `extra_keys` are earlier DEKs whose data may still be on disk, for
    /// example from a rotation that was interrupted. They are only used for
    /// reading. Returns the newest snapshot, if any, and the WAL contents
    /// after it.
    ///
    /// An existing WAL in the current layout is always used as is, even if
    /// it turns out to be unreadable: older layouts are only consulted for
    /// parts of the current layout that do not exist.
    ///
    /// # Errors
    ///
    /// Returns `NoWal` if no layout holds a WAL, `Cancelled` if `cancel`
    /// fires during migration, or the first read or decrypt failure.
    pub fn bootstrap_from_disk(
        &self,
        cancel: &CancelToken,
        extra_keys: &[DataEncryptionKey],
    ) -> CoreResult<(Option<Snapshot>, WalData)> {
        let mut state = self.state.write();
        if state.log.is_some() {
            return Err(CoreError::invalid_operation("logger is already open"));
        }

        if self.layout.detect() == LayoutVersion::Missing {
            return Err(CoreError::NoWal {
                dir: self.layout.state_dir().to_path_buf(),
            });
        }

        let mut extra = Vec::with_capacity(extra_keys.len());
        for key in extra_keys {
            extra.push(self.suite.crypters(key)?.1);
        }
        let keyring = &state.keyring;
        let crypters = CrypterSet::new(keyring.encrypter.clone(), keyring.decrypter.clone())
            .with_fallbacks(keyring.older.iter().chain(&extra).cloned().collect());
        let (wal_factory, snap_factory) = self.factories(&crypters);

        let wal_dir = self.wal_dir();
        let snap_dir = self.snap_dir();

        self.layout
            .ensure_snapshot_dir(cancel, &RawSnapFactory, &snap_factory)?;
        fs::create_dir_all(&snap_dir)?;

        let snapshotter = snap_factory.snapshotter(&snap_dir);
        let snapshot = snapshotter
            .load()
            .map_err(|e| CoreError::snapshot_load(&snap_dir, e))?;
        let marker = snapshot
            .as_ref()
            .map(Snapshot::wal_marker)
            .unwrap_or_default();

        if !self
            .layout
            .ensure_wal(cancel, self.raw_wal.as_ref(), &wal_factory, marker)?
        {
            return Err(CoreError::NoWal {
                dir: self.layout.state_dir().to_path_buf(),
            });
        }

        let (wal, data) = read_repair_wal(cancel, &wal_dir, marker, |dir, snap| {
            wal_factory.open_wal(dir, snap)
        })?;

        info!(
            wal_dir = %wal_dir.display(),
            snapshot_index = marker.index,
            entries = data.entries.len(),
            "loaded raft log from disk"
        );
        state.keyring.older.extend(extra);
        let dropped = state
            .keyring
            .retain_older(self.config.retained_decryption_keys);
        if dropped > 0 {
            warn!(dropped, "more decryption keys given than are retained");
        }
        state.log = Some(OpenLog { wal, snapshotter });
        Ok((snapshot, data))
    }

    /// Appends `entries` and `hard_state` to the WAL.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` before bootstrap. If any entry fails to encrypt,
    /// none of the batch is written.
    pub fn save_entries(&self, hard_state: &HardState, entries: &[Entry]) -> CoreResult<()> {
        let state = self.state.read();
        let log = state.log.as_ref().ok_or(CoreError::NotOpen)?;
        log.wal.save(hard_state, entries)
    }

    /// Persists `snapshot`.
    ///
    /// The WAL marker is written first, then the encrypted snapshot file.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` before bootstrap, or the first write failure.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()> {
        let state = self.state.read();
        let log = state.log.as_ref().ok_or(CoreError::NotOpen)?;
        log.wal.save_snapshot(&snapshot.wal_marker())?;
        log.snapshotter.save_snap(snapshot)
    }

    /// Switches to `key` for everything written from now on.
    ///
    /// Data written under earlier keys stays readable through this logger,
    /// for up to [`LoggerConfig::retained_decryption_keys`] earlier keys.
    /// A save running concurrently completes entirely under the old key or
    /// entirely under the new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the cipher suite rejects `key`; the old key stays
    /// active.
    pub fn rotate_encryption_key(&self, key: &DataEncryptionKey) -> CoreResult<()> {
        let (encrypter, decrypter) = self.suite.crypters(key)?;

        let mut state = self.state.write();
        let keyring = &mut state.keyring;
        keyring.encrypter = encrypter;
        let previous = std::mem::replace(&mut keyring.decrypter, decrypter);
        keyring.older.insert(0, previous);
        let dropped = keyring.retain_older(self.config.retained_decryption_keys);
        let crypters = keyring.crypters();
        let known_keys = keyring.older.len() + 1;
        if dropped > 0 {
            warn!(dropped, "oldest decryption key dropped");
        }

        if let Some(log) = state.log.as_mut() {
            log.wal.rotate_crypters(crypters.clone());
            let (_, snap_factory) = self.factories(&crypters);
            log.snapshotter = snap_factory.snapshotter(&self.snap_dir());
        }

        info!(
            algorithm = %crypters.encrypter.algorithm(),
            known_keys,
            "rotated raft log encryption key"
        );
        Ok(())
    }

    /// Number of keys this logger can decrypt with, the current one included.
    #[must_use]
    pub fn known_keys(&self) -> usize {
        self.state.read().keyring.older.len() + 1
    }

    /// Deletes snapshots and WAL segments no longer needed.
    ///
    /// Keeps the snapshot at `(term, index)` and `keep_old_snapshots` older
    /// ones, then removes WAL segments holding only entries before the
    /// oldest kept snapshot. If no snapshot at `(term, index)` exists,
    /// nothing is deleted. The newest WAL segment is never deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed or a WAL segment is
    /// locked by a writer.
    pub fn gc(&self, index: u64, term: u64, keep_old_snapshots: usize) -> CoreResult<()> {
        let _state = self.state.read();
        let snap_dir = self.snap_dir();
        let current = snapshot_name(term, index);

        let mut current_pos = None;
        let mut oldest_kept = None;
        for (i, name) in list_snapshots(&snap_dir)?.iter().enumerate() {
            match current_pos {
                Some(pos) if i - pos > keep_old_snapshots => {
                    fs::remove_file(snap_dir.join(name))?;
                    debug!(snapshot = %name, "removed old snapshot");
                    continue;
                }
                None if *name == current => current_pos = Some(i),
                _ => {}
            }
            if current_pos.is_some() {
                oldest_kept = Some(name.clone());
            }
        }

        let Some(oldest) = oldest_kept else {
            return Ok(());
        };
        let Some((_, oldest_index)) = parse_snapshot_name(&oldest) else {
            return Ok(());
        };
        self.gc_wal_segments(oldest_index)
    }

    /// Removes segments before the one an open at `snapshot_index` starts
    /// from.
    fn gc_wal_segments(&self, snapshot_index: u64) -> CoreResult<()> {
        let wal_dir = self.wal_dir();
        let segments = list_wal_segments(&wal_dir)?;

        let keep_from = segments
            .iter()
            .rposition(|name| {
                parse_segment_name(name).is_some_and(|(_, first)| first <= snapshot_index)
            })
            .unwrap_or(0);

        for name in &segments[..keep_from] {
            remove_unlocked(&wal_dir.join(name))?;
            debug!(segment = %name, "removed old WAL segment");
        }
        if keep_from > 0 {
            info!(removed = keep_from, snapshot_index, "garbage collected WAL segments");
        }
        Ok(())
    }

    /// Closes the WAL. Closing a logger that is not open does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(&self) -> CoreResult<()> {
        let log = self.state.write().log.take();
        match log {
            Some(log) => log.wal.close(),
            None => Ok(()),
        }
    }

    /// Closes the logger and deletes the current WAL and snapshot
    /// directories.
    ///
    /// Older layout directories are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if closing or deleting fails.
    pub fn clear(&self) -> CoreResult<()> {
        self.close()?;
        for dir in [self.wal_dir(), self.snap_dir()] {
            remove_dir_if_exists(&dir)?;
        }
        info!(state_dir = %self.layout.state_dir().display(), "cleared raft log");
        Ok(())
    }
}

impl std::fmt::Debug for EncryptedRaftLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedRaftLogger")
            .field("state_dir", &self.layout.state_dir())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Deletes a WAL segment unless another handle holds its lock.
fn remove_unlocked(path: &Path) -> CoreResult<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.try_lock_exclusive().map_err(|_| StorageError::Locked {
        path: path.to_path_buf(),
    })?;
    let removed = fs::remove_file(path);
    drop(file);
    Ok(removed?)
}

fn remove_dir_if_exists(dir: &Path) -> CoreResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
