//! # Database
//!
//! The public handle over a directory of segment files. Owns the segment
//! list, the single writable handle on the active segment, and the two
//! background tasks that do all mutation: the **writer** (drains the
//! write-request channel, appends records, rotates the active segment)
//! and the optional **compactor** (collapses sealed segments into one
//! merged segment).
//!
//! ## Design Overview
//!
//! The store is an append-only segmented log. Writes only ever touch the
//! head of the list — the unique `segment-active` file. When the active
//! file reaches [`DbConfig::segment_size_threshold`] it is sealed
//! (renamed to `segment-<N>`) and a fresh active segment takes its place.
//! Reads scan segments newest-first and stop at the first hit, so the
//! newest value always wins without any per-record versioning.
//!
//! ## Concurrency Model
//!
//! - All writes are serialised through one channel: [`Db::put`] enqueues
//!   a pre-encoded record and blocks on a reply. Concurrent callers
//!   observe FIFO order of arrival at the channel.
//! - The segment list is guarded by a `RwLock`. [`Db::get`] holds a read
//!   lock for its scan; the writer takes the write lock only for the
//!   brief index update and for rotation; the compactor takes it only to
//!   swap the tail of the list — the expensive merge work runs on a
//!   private snapshot with no lock held.
//! - Merge signals are coalesced through a bounded(1) channel; one
//!   pending signal is always enough.
//!
//! ## Guarantees
//!
//! - A `put` that returned success is visible to every later `get`.
//! - Recovery derives the entire state from filenames and file contents;
//!   there is no manifest and no lock file.
//! - [`Db::close`] drains the write queue and joins both tasks before
//!   releasing the active file handle.

mod compactor;
mod writer;

#[cfg(test)]
mod tests;

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded, unbounded};
use thiserror::Error;
use tracing::{info, warn};

use crate::record::{Record, RecordError};
use crate::segment::{ACTIVE_SEGMENT, SEGMENT_PREFIX, Segment, SegmentError};

/// Active-segment size at which the writer rotates, unless overridden
/// via [`DbConfig`].
pub const DEFAULT_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The key has no record in any segment. Expected on reads of absent
    /// keys — not an operational failure.
    #[error("key not found")]
    NotFound,

    /// A stored value failed its SHA-1 digest check.
    #[error("value digest mismatch")]
    ChecksumMismatch,

    /// A segment file could not be replayed, or a record on the read
    /// path is structurally broken.
    #[error("corrupted segment: {0}")]
    CorruptedSegment(String),

    /// Underlying filesystem error, propagated verbatim.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key plus value would overflow the record format's 32-bit length
    /// fields.
    #[error("record size exceeds the 32-bit length limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// The database has been closed; the write path is gone.
    #[error("database is closed")]
    Closed,

    /// Internal invariant violation (poisoned lock, panicked task).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SegmentError> for DbError {
    fn from(e: SegmentError) -> DbError {
        match e {
            SegmentError::NotFound => DbError::NotFound,
            SegmentError::Corrupted(msg) => DbError::CorruptedSegment(msg),
            SegmentError::Record(e) => e.into(),
            SegmentError::Io(e) => DbError::Io(e),
        }
    }
}

impl From<RecordError> for DbError {
    fn from(e: RecordError) -> DbError {
        match e {
            RecordError::ChecksumMismatch => DbError::ChecksumMismatch,
            RecordError::RecordTooLarge(n) => DbError::RecordTooLarge(n),
            RecordError::Io(e) => DbError::Io(e),
            RecordError::TruncatedRecord | RecordError::Malformed(_) | RecordError::InvalidText(_) => {
                DbError::CorruptedSegment(e.to_string())
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Db`] instance.
#[derive(Debug, Clone, Copy)]
pub struct DbConfig {
    /// Active-segment size (bytes) at which the writer rotates. The check
    /// runs after each append, so one oversized record can push a segment
    /// past the threshold — it is a soft limit.
    pub segment_size_threshold: u64,

    /// When true, a compactor task is spawned at open and the writer
    /// signals it whenever more than two sealed segments exist. When
    /// false, compaction only runs through [`Db::merge`].
    pub auto_merge: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            segment_size_threshold: DEFAULT_SEGMENT_SIZE,
            auto_merge: true,
        }
    }
}

/// Snapshot of database statistics returned by [`Db::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    /// Total segments, the active one included.
    pub segment_count: usize,
    /// Sealed (immutable) segments awaiting compaction, the merged
    /// segment included.
    pub sealed_count: usize,
    /// Bytes appended to the active segment so far.
    pub active_size_bytes: u64,
}

// ------------------------------------------------------------------------------------------------
// Segment list
// ------------------------------------------------------------------------------------------------

/// The ordered segment collection: the active segment at the head, then
/// sealed segments newest-first, with the merged segment (whose suffix is
/// not numeric) at the tail. Reads scan in this order and stop at the
/// first hit.
#[derive(Debug)]
pub(crate) struct SegmentList {
    /// The unique writable segment. Its index and offset are mutated by
    /// the writer under the list's write lock.
    pub(crate) active: Segment,

    /// Immutable segments, newest first. `Arc`-shared so the compactor
    /// can snapshot them and work without holding the lock.
    pub(crate) sealed: Vec<Arc<Segment>>,

    /// Suffix the next rotation will seal under. Strictly increases over
    /// the database's lifetime, even after a merge has consumed every
    /// numbered segment.
    pub(crate) next_suffix: u64,
}

impl SegmentList {
    /// Scans head-first and returns the first segment's hit.
    fn get(&self, key: &str) -> Result<String, SegmentError> {
        match self.active.get(key) {
            Err(SegmentError::NotFound) => {}
            other => return other,
        }
        for seg in &self.sealed {
            match seg.get(key) {
                Err(SegmentError::NotFound) => continue,
                other => return other,
            }
        }
        Err(SegmentError::NotFound)
    }
}

/// State shared between the handle, the writer task, and the compactor.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) dir: PathBuf,
    pub(crate) config: DbConfig,
    pub(crate) segments: RwLock<SegmentList>,

    /// Serialises merge iterations — the background task and the
    /// synchronous [`Db::merge`] hook must not interleave.
    pub(crate) merge_lock: Mutex<()>,
}

/// A pending write travelling from [`Db::put`] to the writer task.
pub(crate) enum WriteCommand {
    Append {
        key: String,
        record: Vec<u8>,
        reply: Sender<Result<(), DbError>>,
    },
    Shutdown,
}

/// A nudge travelling from the writer to the compactor.
pub(crate) enum MergeCommand {
    Merge,
    Shutdown,
}

// ------------------------------------------------------------------------------------------------
// Db
// ------------------------------------------------------------------------------------------------

/// The database handle.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Dropping the
/// handle shuts the background tasks down as if [`Db::close`] had been
/// called.
#[derive(Debug)]
pub struct Db {
    shared: Arc<Shared>,
    write_tx: Sender<WriteCommand>,
    merge_tx: Option<Sender<MergeCommand>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    compactor: Mutex<Option<JoinHandle<()>>>,
}

impl Db {
    /// Opens (or creates) a database with default configuration.
    pub fn open(dir: impl AsRef<Path>) -> Result<Db, DbError> {
        Self::open_with(dir, DbConfig::default())
    }

    /// Opens (or creates) a database with an explicit rotation threshold
    /// and auto-merge flag.
    pub fn open_sized(
        dir: impl AsRef<Path>,
        threshold_bytes: u64,
        auto_merge: bool,
    ) -> Result<Db, DbError> {
        Self::open_with(
            dir,
            DbConfig {
                segment_size_threshold: threshold_bytes,
                auto_merge,
            },
        )
    }

    /// Opens (or creates) a database rooted at the given directory.
    ///
    /// Recovery is strict: every `segment-*` file in the directory is
    /// replayed to rebuild its index, and a corrupted segment fails the
    /// open. Ordering is derived purely from filenames — active first,
    /// then sealed segments by descending numeric suffix, then the
    /// merged segment.
    pub fn open_with(dir: impl AsRef<Path>, config: DbConfig) -> Result<Db, DbError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // A crashed merge may leave its scratch file behind; it was never
        // part of the segment list, so it is safe to discard.
        let tmp = dir.join(compactor::MERGE_TMP);
        if tmp.exists() {
            warn!(path = %tmp.display(), "removing stale merge scratch file");
            fs::remove_file(&tmp)?;
        }

        // The sole write handle for the lifetime of the database; it
        // moves into the writer task below.
        let active_path = dir.join(ACTIVE_SEGMENT);
        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)?;

        let mut active = None;
        let mut sealed = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_file() || !name.starts_with(SEGMENT_PREFIX) {
                continue;
            }
            let seg = Segment::recover(path.clone())?;
            if name == ACTIVE_SEGMENT {
                active = Some(seg);
            } else {
                sealed.push(Arc::new(seg));
            }
        }
        let active = active
            .ok_or_else(|| DbError::Internal("active segment missing after create".into()))?;

        // Newest first: descending numeric suffixes, unparseable suffixes
        // (the merged segment) at the tail, ties by filename.
        sealed.sort_by(|a, b| match (a.numeric_suffix(), b.numeric_suffix()) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name().cmp(b.name()),
        });

        let next_suffix = sealed
            .iter()
            .find_map(|s| s.numeric_suffix())
            .map_or(0, |n| n + 1);

        info!(
            dir = %dir.display(),
            sealed = sealed.len(),
            active_bytes = active.offset(),
            "opened database"
        );

        let auto_merge = config.auto_merge;
        let shared = Arc::new(Shared {
            dir,
            config,
            segments: RwLock::new(SegmentList {
                active,
                sealed,
                next_suffix,
            }),
            merge_lock: Mutex::new(()),
        });

        let (merge_tx, merge_rx) = bounded(1);
        let merge_tx = auto_merge.then_some(merge_tx);

        let (write_tx, write_rx) = unbounded();
        let writer = {
            let shared = Arc::clone(&shared);
            let merge_tx = merge_tx.clone();
            thread::Builder::new()
                .name("emberdb-writer".into())
                .spawn(move || writer::run(shared, write_rx, merge_tx, out))?
        };

        let compactor = if auto_merge {
            let shared = Arc::clone(&shared);
            Some(
                thread::Builder::new()
                    .name("emberdb-compactor".into())
                    .spawn(move || compactor::run(shared, merge_rx))?,
            )
        } else {
            None
        };

        Ok(Db {
            shared,
            write_tx,
            merge_tx,
            writer: Mutex::new(Some(writer)),
            compactor: Mutex::new(compactor),
        })
    }

    /// Stores a key-value pair.
    ///
    /// Blocks until the writer task has appended the record to the active
    /// segment (written to the OS file handle; no fsync) and returns the
    /// append's result. Concurrent callers are FIFO-serialised by the
    /// write channel.
    pub fn put(&self, key: &str, value: &str) -> Result<(), DbError> {
        let record = Record::encode(key, value)?;
        let (reply_tx, reply_rx) = bounded(1);

        self.write_tx
            .send(WriteCommand::Append {
                key: key.to_string(),
                record,
                reply: reply_tx,
            })
            .map_err(|_| DbError::Closed)?;

        reply_rx.recv().map_err(|_| DbError::Closed)?
    }

    /// Looks up a key, scanning segments newest-first.
    ///
    /// Returns the first hit's value; [`DbError::NotFound`] only when
    /// every segment misses. A digest mismatch or I/O failure in the
    /// segment holding the key propagates immediately.
    pub fn get(&self, key: &str) -> Result<String, DbError> {
        let list = self
            .shared
            .segments
            .read()
            .map_err(|_| DbError::Internal("segment list lock poisoned".into()))?;
        Ok(list.get(key)?)
    }

    /// Runs one compaction iteration synchronously.
    ///
    /// Collapses all sealed segments into a single merged segment holding
    /// the newest value per key. A no-op when fewer than two sealed
    /// segments exist. Intended for tests and explicit maintenance; the
    /// background compactor performs the same iteration when auto-merge
    /// is on.
    pub fn merge(&self) -> Result<(), DbError> {
        compactor::merge_once(&self.shared).map(|_| ())
    }

    /// Returns a snapshot of segment statistics.
    pub fn stats(&self) -> Result<DbStats, DbError> {
        let list = self
            .shared
            .segments
            .read()
            .map_err(|_| DbError::Internal("segment list lock poisoned".into()))?;
        Ok(DbStats {
            segment_count: 1 + list.sealed.len(),
            sealed_count: list.sealed.len(),
            active_size_bytes: list.active.offset(),
        })
    }

    /// Shuts the database down.
    ///
    /// Drains the write queue (every `put` already enqueued is appended
    /// and answered), joins the writer — which releases the active file
    /// handle — then signals and joins the compactor. Idempotent; later
    /// `put`s fail with [`DbError::Closed`].
    pub fn close(&self) -> Result<(), DbError> {
        // The shutdown command queues behind all pending writes; send
        // failure means the writer is already gone.
        let _ = self.write_tx.send(WriteCommand::Shutdown);
        let writer = self
            .writer
            .lock()
            .map_err(|_| DbError::Internal("writer handle lock poisoned".into()))?
            .take();
        let was_open = writer.is_some();
        if let Some(handle) = writer {
            handle
                .join()
                .map_err(|_| DbError::Internal("writer task panicked".into()))?;
        }

        if let Some(tx) = &self.merge_tx {
            let _ = tx.send(MergeCommand::Shutdown);
        }
        let compactor = self
            .compactor
            .lock()
            .map_err(|_| DbError::Internal("compactor handle lock poisoned".into()))?
            .take();
        if let Some(handle) = compactor {
            handle
                .join()
                .map_err(|_| DbError::Internal("compactor task panicked".into()))?;
        }

        if was_open {
            info!(dir = %self.shared.dir.display(), "closed database");
        }
        Ok(())
    }

    /// Used by tests to assert key → segment placement without touching
    /// the on-disk layout.
    #[cfg(test)]
    pub(crate) fn segment_names(&self) -> Vec<String> {
        let list = self.shared.segments.read().expect("segment list lock");
        let mut names = vec![list.active.name().to_string()];
        names.extend(list.sealed.iter().map(|s| s.name().to_string()));
        names
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "close on drop failed");
        }
    }
}
