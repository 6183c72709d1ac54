//! Write serializer.
//!
//! A single long-lived task drains the write-request channel, appends
//! each pre-encoded record to the active segment, updates its index, and
//! answers the waiting caller. Because exactly one consumer touches the
//! write handle, appends need no lock of their own — the segment list's
//! write lock is held only for the index update and for rotation.
//!
//! Rotation seals the active file in place: `segment-active` is renamed
//! to the next `segment-<N>`, its in-memory index slides to the head of
//! the sealed list untouched, and a fresh empty active segment takes
//! over. The rename happens before the old handle is released, so a
//! failed rename leaves the writer in a fully consistent state.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info};

use crate::segment::{ACTIVE_SEGMENT, SEGMENT_PREFIX, Segment};

use super::{DbError, MergeCommand, SegmentList, Shared, WriteCommand};

/// Sealed segments tolerated before the writer nudges the compactor.
const MERGE_BACKLOG: usize = 2;

/// The writer task body. Runs until a shutdown command arrives; every
/// command already in the queue is processed first.
pub(crate) fn run(
    shared: Arc<Shared>,
    rx: Receiver<WriteCommand>,
    merge_tx: Option<Sender<MergeCommand>>,
    mut out: File,
) {
    for cmd in rx.iter() {
        match cmd {
            WriteCommand::Shutdown => break,
            WriteCommand::Append { key, record, reply } => {
                if let Some(tx) = &merge_tx {
                    maybe_signal_merge(&shared, tx);
                }
                let result = append(&shared, &mut out, key, &record);
                // A dropped reply receiver means the caller gave up; the
                // record is already durable either way.
                let _ = reply.send(result);
            }
        }
    }
    debug!("writer task stopped");
}

/// Nudges the compactor when sealed segments pile up. The channel holds
/// at most one pending signal; a full channel means the nudge is already
/// queued, so the send result is ignored.
fn maybe_signal_merge(shared: &Shared, tx: &Sender<MergeCommand>) {
    let backlog = match shared.segments.read() {
        Ok(list) => list.sealed.len(),
        Err(_) => return,
    };
    if backlog > MERGE_BACKLOG {
        let _ = tx.try_send(MergeCommand::Merge);
    }
}

/// Appends one record: write to the active handle, index it under the
/// write lock, rotate if the file has reached the size threshold.
fn append(shared: &Shared, out: &mut File, key: String, record: &[u8]) -> Result<(), DbError> {
    out.write_all(record)?;

    let mut list = shared
        .segments
        .write()
        .map_err(|_| DbError::Internal("segment list lock poisoned".into()))?;
    list.active.insert(key, record.len() as u64);

    // Checked after the append — a single oversized record may push the
    // file past the threshold, which is a soft limit.
    let size = out.metadata()?.len();
    if size >= shared.config.segment_size_threshold {
        rotate(shared, &mut list, out)?;
    }

    Ok(())
}

/// Seals the active segment and starts a fresh one. Caller holds the
/// segment list's write lock.
fn rotate(shared: &Shared, list: &mut SegmentList, out: &mut File) -> Result<(), DbError> {
    let active_path = shared.dir.join(ACTIVE_SEGMENT);

    let suffix = list.next_suffix;
    let sealed_path = shared.dir.join(format!("{SEGMENT_PREFIX}{suffix}"));

    out.sync_all()?;
    std::fs::rename(&active_path, &sealed_path)?;

    let fresh = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&active_path)?;
    drop(std::mem::replace(out, fresh));

    let mut sealed = std::mem::replace(&mut list.active, Segment::create(active_path));
    sealed.set_path(sealed_path);
    info!(
        sealed = %sealed.name(),
        bytes = sealed.offset(),
        keys = sealed.len(),
        "rotated active segment"
    );
    list.sealed.insert(0, Arc::new(sealed));
    list.next_suffix += 1;

    Ok(())
}
