//! Compactor.
//!
//! Collapses sealed segments into a single merged segment holding exactly
//! one record per live key — the newest value among the sealed set. The
//! active segment is never touched, so writes racing a merge land ahead
//! of the merged output on the read path and still win.
//!
//! A merge iteration works on a private snapshot of the sealed list:
//!
//! 1. Snapshot the sealed segments under a read lock (fewer than two →
//!    nothing to do).
//! 2. Map every live key to the snapshot segment holding its newest
//!    record, scanning oldest → newest.
//! 3. Re-encode one fresh record per key into a scratch file and fsync
//!    it. Values are fetched through [`Segment::get`], so their digests
//!    are verified on the way out and recomputed on the way in.
//! 4. Under the write lock: rename the scratch file over `segment-` and
//!    swap the snapshotted tail of the list for the new merged segment.
//!    The rename happens inside the lock so no reader can observe the
//!    old merged file replaced underneath a stale list.
//! 5. Unlink the consumed files — all of the snapshot except the merged
//!    path itself, which the rename just replaced.
//!
//! Any failure aborts the iteration: the scratch file is removed and the
//! segment list is left untouched. The background task logs and waits
//! for the next signal; the synchronous [`Db::merge`](super::Db::merge)
//! propagates the error.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::record::Record;
use crate::segment::{MERGED_SEGMENT, Segment};

use super::{DbError, MergeCommand, Shared};

/// Scratch file a merge writes before renaming over `segment-`. The name
/// deliberately lacks the segment prefix so recovery never replays a
/// half-written merge.
pub(crate) const MERGE_TMP: &str = "merge.tmp";

/// The compactor task body. One merge iteration per signal; signals are
/// coalesced by the bounded channel on the sending side.
pub(crate) fn run(shared: Arc<Shared>, rx: Receiver<MergeCommand>) {
    for cmd in rx.iter() {
        match cmd {
            MergeCommand::Shutdown => break,
            MergeCommand::Merge => {
                if let Err(e) = merge_once(&shared) {
                    warn!(error = %e, "merge iteration aborted");
                }
            }
        }
    }
    debug!("compactor task stopped");
}

/// Runs a single merge iteration. Returns `Ok(false)` when fewer than
/// two sealed segments exist and there is nothing to collapse.
pub(crate) fn merge_once(shared: &Shared) -> Result<bool, DbError> {
    let _guard = shared
        .merge_lock
        .lock()
        .map_err(|_| DbError::Internal("merge lock poisoned".into()))?;

    let snapshot: Vec<Arc<Segment>> = {
        let list = shared
            .segments
            .read()
            .map_err(|_| DbError::Internal("segment list lock poisoned".into()))?;
        if list.sealed.len() < 2 {
            return Ok(false);
        }
        list.sealed.clone()
    };

    debug!(segments = snapshot.len(), "merge started");

    let live = live_keys(&snapshot);
    let live_count = live.len();

    let tmp_path = shared.dir.join(MERGE_TMP);
    let merged_path = shared.dir.join(MERGED_SEGMENT);
    let mut merged = Segment::create(merged_path.clone());

    if let Err(e) = write_merged(&tmp_path, &live, &mut merged) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    {
        let mut list = shared
            .segments
            .write()
            .map_err(|_| DbError::Internal("segment list lock poisoned".into()))?;
        if let Err(e) = fs::rename(&tmp_path, &merged_path) {
            drop(list);
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        list.sealed
            .retain(|seg| !snapshot.iter().any(|s| Arc::ptr_eq(s, seg)));
        list.sealed.push(Arc::new(merged));
    }

    for seg in &snapshot {
        if seg.path() == merged_path {
            continue; // just replaced by the rename
        }
        if let Err(e) = fs::remove_file(seg.path()) {
            warn!(path = %seg.path().display(), error = %e, "failed to remove merged-away segment");
        }
    }

    info!(
        consumed = snapshot.len(),
        live_keys = live_count,
        "merge complete"
    );
    Ok(true)
}

/// Maps every key appearing in the snapshot to the segment holding its
/// newest record. Scans oldest → newest so newer occurrences overwrite
/// older ones.
fn live_keys(snapshot: &[Arc<Segment>]) -> HashMap<&str, &Segment> {
    let mut live: HashMap<&str, &Segment> = HashMap::new();
    for seg in snapshot.iter().rev() {
        for key in seg.keys() {
            live.insert(key.as_str(), seg.as_ref());
        }
    }
    live
}

/// Writes one fresh record per live key into the scratch file and
/// records its offset in the new segment's index.
fn write_merged(
    tmp_path: &Path,
    live: &HashMap<&str, &Segment>,
    merged: &mut Segment,
) -> Result<(), DbError> {
    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp_path)?;

    for (key, seg) in live {
        let value = seg.get(key)?;
        let record = Record::encode(key, &value)?;
        out.write_all(&record)?;
        merged.insert((*key).to_string(), record.len() as u64);
    }

    out.sync_all()?;
    Ok(())
}
