//! Segment — one append-only file plus its in-memory key → offset index.
//!
//! A segment never stores its index on disk. Opening a database rebuilds
//! every index with [`Segment::recover`], a single forward scan over the
//! file's records. When a key appears more than once in a segment the
//! index points at the *last* occurrence — scan order equals write order,
//! so the index always reflects the newest record per key.
//!
//! # Naming
//!
//! Segment files share the `segment-` prefix and fall into three
//! categories by suffix:
//!
//! | File | Role |
//! |------|------|
//! | `segment-active` | The unique writable segment (head of the list) |
//! | `segment-<N>` | Sealed, immutable; `N` grows over the database's life |
//! | `segment-` | Merge output (empty suffix); at most one exists |
//!
//! # Reads
//!
//! [`Segment::get`] opens the file, seeks to the indexed offset, and
//! decodes a single value with its SHA-1 digest verified. No read handle
//! outlives the call, so open-descriptor count tracks concurrent reads
//! rather than segment count.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use thiserror::Error;
use tracing::trace;

use crate::record::{self, MIN_RECORD_LEN, Record, RecordError};

/// Filename prefix shared by every segment file.
pub const SEGMENT_PREFIX: &str = "segment-";

/// Filename of the unique writable segment.
pub const ACTIVE_SEGMENT: &str = "segment-active";

/// Filename of the merge output — the prefix with an empty suffix.
pub const MERGED_SEGMENT: &str = "segment-";

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by segment operations.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// The key has no record in this segment.
    #[error("key not found")]
    NotFound,

    /// Recovery found a record whose declared size disagrees with the
    /// bytes on disk, or the file ends mid-record.
    #[error("corrupted segment: {0}")]
    Corrupted(String),

    /// Codec failure while reading a record.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// Segment
// ------------------------------------------------------------------------------------------------

/// One append-only segment file and its key → offset index.
#[derive(Debug)]
pub struct Segment {
    /// Path of the backing file. Changes once, when the active segment
    /// is renamed at rotation; immutable afterwards.
    path: PathBuf,

    /// Bytes appended so far — the offset the next record would land at.
    offset: u64,

    /// Offset of the newest record per key.
    index: HashMap<String, u64>,
}

impl Segment {
    /// A fresh, empty segment for a file that does not exist yet.
    pub fn create(path: PathBuf) -> Segment {
        Segment {
            path,
            offset: 0,
            index: HashMap::new(),
        }
    }

    /// Rebuilds a segment's index by scanning its file from offset 0.
    ///
    /// For each record: decode the key, point `index[key]` at the record's
    /// offset, advance by the record's total size. A clean EOF at a record
    /// boundary terminates recovery; EOF mid-record or any structural
    /// mismatch fails with [`SegmentError::Corrupted`]. Digests are not
    /// verified — recovery only rebuilds offsets, integrity is checked on
    /// reads.
    pub fn recover(path: PathBuf) -> Result<Segment, SegmentError> {
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut index = HashMap::new();
        let mut offset = 0u64;

        loop {
            if reader.fill_buf()?.is_empty() {
                break; // clean EOF at a record boundary
            }

            let size = reader
                .read_u32::<LittleEndian>()
                .map_err(|e| mid_record(&path, e))? as usize;
            if size < MIN_RECORD_LEN || offset + size as u64 > file_len {
                return Err(SegmentError::Corrupted(format!(
                    "{}: record at offset {offset} declares {size} bytes",
                    path.display()
                )));
            }

            let mut buf = vec![0u8; size];
            LittleEndian::write_u32(&mut buf[0..4], size as u32);
            reader
                .read_exact(&mut buf[4..])
                .map_err(|e| mid_record(&path, e))?;

            let rec = Record::decode(&buf).map_err(|e| {
                SegmentError::Corrupted(format!(
                    "{}: record at offset {offset}: {e}",
                    path.display()
                ))
            })?;

            index.insert(rec.key, offset);
            offset += size as u64;
        }

        trace!(
            path = %path.display(),
            keys = index.len(),
            bytes = offset,
            "recovered segment"
        );

        Ok(Segment {
            path,
            offset,
            index,
        })
    }

    /// Looks up a key's value in this segment.
    ///
    /// Opens the file, seeks to the indexed offset, and reads one value
    /// with its digest verified. [`SegmentError::NotFound`] when the key
    /// has no record here.
    pub fn get(&self, key: &str) -> Result<String, SegmentError> {
        let offset = *self.index.get(key).ok_or(SegmentError::NotFound)?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);

        Ok(record::read_value(&mut reader)?)
    }

    /// Records a freshly appended record: points the index at the current
    /// offset and advances it by the record's encoded length.
    pub(crate) fn insert(&mut self, key: String, len: u64) {
        self.index.insert(key, self.offset);
        self.offset += len;
    }

    /// Bytes appended so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of distinct keys indexed.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when no record has been indexed.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Iterates the distinct keys indexed by this segment.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.index.keys()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-points this segment at a renamed file (rotation).
    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    /// The file name, e.g. `segment-active` or `segment-3`.
    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// The part of the file name after the `segment-` prefix.
    pub fn suffix(&self) -> Option<&str> {
        self.name().strip_prefix(SEGMENT_PREFIX)
    }

    /// The suffix parsed as a sealed-segment number. `None` for the
    /// active segment and for the merged segment's empty suffix.
    pub fn numeric_suffix(&self) -> Option<u64> {
        self.suffix().and_then(|s| s.parse().ok())
    }
}

/// Maps an EOF inside a record onto [`SegmentError::Corrupted`]; other
/// I/O failures pass through.
fn mid_record(path: &Path, e: io::Error) -> SegmentError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SegmentError::Corrupted(format!("{}: file ends mid-record", path.display()))
    } else {
        SegmentError::Io(e)
    }
}
