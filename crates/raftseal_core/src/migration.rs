//! Moving WAL and snapshot directories between layouts, and WAL repair.
//!
//! Migrations never delete their source and never rewrite a record in it.
//! Reading a source may still change it in two ways: a torn record at the
//! end of a WAL is cut off (the untouched segment is kept as
//! `<segment>.broken`), and a snapshot file that fails its checksum is
//! renamed to `<name>.broken` so the next older snapshot is used.
//!
//! The destination is built in a sibling `<dst>.tmp` directory and renamed
//! into place only once it is complete, so an interrupted migration leaves
//! at most a stale temp directory, which the next attempt discards.

use crate::engine::{SnapFactory, Wal, WalFactory};
use crate::error::{CoreError, CoreResult};
use raftseal_storage::{
    install_dir, list_wal_segments, repair_wal, temp_dir_for, Entry, HardState, WalData,
    WalSnapshot,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A cancellation flag shared between a migration and whoever started it.
///
/// Cancelling never deletes a source directory; a destination may be left
/// behind as a `.tmp` directory for the next attempt to discard.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` if cancellation was requested.
    pub fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Copies the WAL in `src` (read from `snapshot`) into a new WAL at `dst`.
///
/// The destination receives the same metadata, a marker for `snapshot`,
/// the hard state and every entry after the snapshot, written through
/// `dst_factory`. A source directory that exists but holds no segments is
/// migrated as an empty destination directory.
///
/// The source is read with [`read_repair_wal`], so a source whose last
/// segment ends in a torn record is truncated to its last complete record
/// first. That truncation is the only change made to `src`.
///
/// # Errors
///
/// Fails without creating anything at `dst` if the source is missing or
/// unreadable. Fails with `Cancelled` if `cancel` fires.
pub fn migrate_wals(
    cancel: &CancelToken,
    src: &Path,
    dst: &Path,
    src_factory: &dyn WalFactory,
    dst_factory: &dyn WalFactory,
    snapshot: WalSnapshot,
) -> CoreResult<()> {
    cancel.check()?;
    let context = |e: CoreError| CoreError::migration(src, dst, e);

    let segments = list_wal_segments(src).map_err(|e| context(e.into()))?;
    if segments.is_empty() {
        fs::create_dir_all(dst).map_err(|e| context(e.into()))?;
        debug!(src = %src.display(), dst = %dst.display(), "source WAL is empty");
        return Ok(());
    }

    let (reader, data) =
        read_repair_wal(cancel, src, snapshot, |dir, snap| src_factory.open(dir, snap))
            .map_err(|e| match e {
                CoreError::Cancelled => e,
                other => context(other),
            })?;
    reader.close().map_err(context)?;
    let WalData {
        metadata,
        hard_state,
        entries,
    } = data;

    cancel.check()?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| context(e.into()))?;
    }
    let tmp = temp_dir_for(dst);
    if tmp.exists() {
        fs::remove_dir_all(&tmp).map_err(|e| context(e.into()))?;
    }

    let writer = dst_factory.create(&tmp, &metadata).map_err(context)?;
    let written = write_wal(writer.as_ref(), &snapshot, &hard_state, &entries);
    writer.close().map_err(context)?;
    written.map_err(context)?;

    cancel.check()?;
    install_dir(&tmp, dst).map_err(|e| context(e.into()))?;

    info!(
        src = %src.display(),
        dst = %dst.display(),
        entries = entries.len(),
        snapshot_index = snapshot.index,
        "migrated WAL"
    );
    Ok(())
}

fn write_wal(
    wal: &dyn Wal,
    snapshot: &WalSnapshot,
    hard_state: &HardState,
    entries: &[Entry],
) -> CoreResult<()> {
    wal.save_snapshot(snapshot)?;
    wal.save(hard_state, entries)
}

/// Copies the newest snapshot in `src` into `dst`.
///
/// With no snapshot in `src` this only makes sure `dst` exists.
///
/// # Errors
///
/// Fails without creating anything at `dst` if `src` is missing or its
/// snapshot cannot be read. Fails with `Cancelled` if `cancel` fires.
pub fn migrate_snapshot(
    cancel: &CancelToken,
    src: &Path,
    dst: &Path,
    src_factory: &dyn SnapFactory,
    dst_factory: &dyn SnapFactory,
) -> CoreResult<()> {
    cancel.check()?;
    let context = |e: CoreError| CoreError::migration(src, dst, e);

    let Some(snapshot) = src_factory
        .new_snapshotter(src)
        .load()
        .map_err(context)?
    else {
        fs::create_dir_all(dst).map_err(|e| context(e.into()))?;
        debug!(src = %src.display(), dst = %dst.display(), "no snapshot to migrate");
        return Ok(());
    };

    cancel.check()?;
    let tmp = temp_dir_for(dst);
    if tmp.exists() {
        fs::remove_dir_all(&tmp).map_err(|e| context(e.into()))?;
    }
    fs::create_dir_all(&tmp).map_err(|e| context(e.into()))?;
    dst_factory
        .new_snapshotter(&tmp)
        .save_snap(&snapshot)
        .map_err(context)?;

    cancel.check()?;
    install_dir(&tmp, dst).map_err(|e| context(e.into()))?;

    info!(
        src = %src.display(),
        dst = %dst.display(),
        index = snapshot.metadata.index,
        term = snapshot.metadata.term,
        "migrated snapshot"
    );
    Ok(())
}

/// Opens and replays the WAL in `dir`, repairing a torn tail once.
///
/// A crash in the middle of an append leaves a partial record at the end
/// of the last segment. If the first replay fails for that reason the
/// partial record is cut off and the replay retried. Every other failure,
/// including records that cannot be decrypted, is returned as is.
///
/// `open_wal` opens the WAL through whichever factory the caller reads
/// with. On success the returned handle is ready for appends.
///
/// # Errors
///
/// Returns `WalRead` wrapping the failure that could not be repaired.
pub fn read_repair_wal<W, F>(
    cancel: &CancelToken,
    dir: &Path,
    snapshot: WalSnapshot,
    open_wal: F,
) -> CoreResult<(W, WalData)>
where
    W: Wal,
    F: Fn(&Path, WalSnapshot) -> CoreResult<W>,
{
    let mut repaired = false;
    loop {
        cancel.check()?;
        let wal = open_wal(dir, snapshot).map_err(|e| CoreError::wal_read(dir, e))?;
        match wal.read_all() {
            Ok(data) => return Ok((wal, data)),
            Err(err) => {
                wal.close().map_err(|e| CoreError::wal_read(dir, e))?;
                if err.is_cannot_decrypt() || repaired || !err.is_unexpected_eof() {
                    return Err(CoreError::wal_read(dir, err));
                }
                if !repair_wal(dir).map_err(|e| CoreError::wal_read(dir, e.into()))? {
                    return Err(CoreError::wal_read(dir, err));
                }
                info!(dir = %dir.display(), error = %err, "repaired WAL error");
                repaired = true;
            }
        }
    }
}
