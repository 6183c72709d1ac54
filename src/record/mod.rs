//! Record codec.
//!
//! Encodes and decodes the single on-disk record shape used by every
//! segment file. A record is self-describing and length-prefixed; records
//! are written back to back with no padding, so a segment file is fully
//! described by its own bytes.
//!
//! # On-disk layout
//!
//! All length fields are little-endian `u32`:
//!
//! ```text
//! [TOTAL_SIZE][KEY_LEN][KEY_BYTES][VALUE_LEN][VALUE_BYTES][DIGEST_LEN][DIGEST_BYTES]
//!     4B          4B      KEY_LEN     4B       VALUE_LEN      4B          20B
//! ```
//!
//! - `TOTAL_SIZE` counts the entire record, its own field included:
//!   `TOTAL_SIZE == 16 + KEY_LEN + VALUE_LEN + DIGEST_LEN`.
//! - `DIGEST_BYTES` is the 20-byte SHA-1 of the value bytes, and
//!   `DIGEST_LEN` is always 20.
//!
//! # Integrity
//!
//! The digest is computed at encode time and verified by [`read_value`]
//! on every read-path lookup. [`Record::decode`] only checks structural
//! consistency — segment recovery rebuilds offsets without paying for a
//! digest pass.


use std::io::{self, BufRead, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Bytes occupied by the four `u32` length fields of a record.
pub const FIXED_OVERHEAD: usize = 16;

/// Length of the SHA-1 value digest carried by every record.
pub const DIGEST_LEN: usize = 20;

/// Smallest well-formed record: empty key, empty value, 20-byte digest.
pub const MIN_RECORD_LEN: usize = FIXED_OVERHEAD + DIGEST_LEN;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by the record codec.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stored digest disagrees with the digest computed over the
    /// value bytes that were read.
    #[error("value digest mismatch")]
    ChecksumMismatch,

    /// The stream ended in the middle of a record.
    #[error("truncated record")]
    TruncatedRecord,

    /// A length field is inconsistent with the record's actual size.
    #[error("malformed record ({0})")]
    Malformed(&'static str),

    /// Key plus value would overflow the format's 32-bit length fields.
    #[error("record size exceeds the 32-bit length limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// Key or value bytes are not valid UTF-8.
    #[error("record text is not valid UTF-8: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),
}

// ------------------------------------------------------------------------------------------------
// Record
// ------------------------------------------------------------------------------------------------

/// A decoded record: one key, one value, and the stored value digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: String,
    pub digest: [u8; DIGEST_LEN],
}

impl Record {
    /// Encodes a key-value pair into a fresh record buffer.
    ///
    /// Computes the SHA-1 of `value` and lays out the five fields of the
    /// on-disk format in order. The buffer is exactly
    /// [`encoded_len`]`(key, value)` bytes long.
    pub fn encode(key: &str, value: &str) -> Result<Vec<u8>, RecordError> {
        let total = encoded_len(key, value);
        if total > u32::MAX as usize {
            return Err(RecordError::RecordTooLarge(total));
        }

        let digest = Sha1::digest(value.as_bytes());

        let mut buf = Vec::with_capacity(total);
        buf.write_u32::<LittleEndian>(total as u32)?;
        buf.write_u32::<LittleEndian>(key.len() as u32)?;
        buf.extend_from_slice(key.as_bytes());
        buf.write_u32::<LittleEndian>(value.len() as u32)?;
        buf.extend_from_slice(value.as_bytes());
        buf.write_u32::<LittleEndian>(DIGEST_LEN as u32)?;
        buf.extend_from_slice(&digest);

        Ok(buf)
    }

    /// Decodes a complete record buffer (size prefix included) by
    /// fixed-offset arithmetic.
    ///
    /// Validates that every length field is consistent with the buffer.
    /// The digest is **not** verified here — integrity is checked on the
    /// read path by [`read_value`].
    pub fn decode(buf: &[u8]) -> Result<Record, RecordError> {
        if buf.len() < MIN_RECORD_LEN {
            return Err(RecordError::TruncatedRecord);
        }

        let declared = LittleEndian::read_u32(&buf[0..4]) as usize;
        if declared != buf.len() {
            return Err(RecordError::Malformed("size prefix disagrees with length"));
        }

        let key_len = LittleEndian::read_u32(&buf[4..8]) as usize;
        let mut off = 8;
        if off + key_len + 4 > buf.len() {
            return Err(RecordError::Malformed("key length out of bounds"));
        }
        let key = &buf[off..off + key_len];
        off += key_len;

        let value_len = LittleEndian::read_u32(&buf[off..off + 4]) as usize;
        off += 4;
        if off + value_len + 4 > buf.len() {
            return Err(RecordError::Malformed("value length out of bounds"));
        }
        let value = &buf[off..off + value_len];
        off += value_len;

        let digest_len = LittleEndian::read_u32(&buf[off..off + 4]) as usize;
        off += 4;
        if digest_len != DIGEST_LEN || off + digest_len != buf.len() {
            return Err(RecordError::Malformed("bad digest length"));
        }
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&buf[off..]);

        Ok(Record {
            key: String::from_utf8(key.to_vec())?,
            value: String::from_utf8(value.to_vec())?,
            digest,
        })
    }
}

/// Size in bytes of the encoded record for the given key and value.
pub fn encoded_len(key: &str, value: &str) -> usize {
    FIXED_OVERHEAD + key.len() + value.len() + DIGEST_LEN
}

// ------------------------------------------------------------------------------------------------
// Read path
// ------------------------------------------------------------------------------------------------

/// Reads one record from a positioned stream, returning only its value.
///
/// Skips the key, reads the value, and verifies the stored SHA-1 digest
/// against one computed over the value bytes just read. Fails with
/// [`RecordError::ChecksumMismatch`] on disagreement and
/// [`RecordError::TruncatedRecord`] if the stream ends mid-record.
pub fn read_value<R: BufRead>(reader: &mut R) -> Result<String, RecordError> {
    // Total size is re-derivable from the remaining fields; read it to
    // keep the cursor aligned with the layout.
    let _total = reader.read_u32::<LittleEndian>().map_err(eof_to_truncated)?;
    let key_len = reader.read_u32::<LittleEndian>().map_err(eof_to_truncated)? as u64;

    let skipped = io::copy(&mut reader.by_ref().take(key_len), &mut io::sink())?;
    if skipped != key_len {
        return Err(RecordError::TruncatedRecord);
    }

    let value_len = reader.read_u32::<LittleEndian>().map_err(eof_to_truncated)? as usize;
    let mut value = vec![0u8; value_len];
    reader.read_exact(&mut value).map_err(eof_to_truncated)?;

    let digest_len = reader.read_u32::<LittleEndian>().map_err(eof_to_truncated)? as usize;
    let mut stored = vec![0u8; digest_len];
    reader.read_exact(&mut stored).map_err(eof_to_truncated)?;

    let computed = Sha1::digest(&value);
    if computed.as_slice() != stored.as_slice() {
        return Err(RecordError::ChecksumMismatch);
    }

    Ok(String::from_utf8(value)?)
}

/// Maps an unexpected end-of-file onto [`RecordError::TruncatedRecord`];
/// every other I/O failure passes through unchanged.
fn eof_to_truncated(e: io::Error) -> RecordError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        RecordError::TruncatedRecord
    } else {
        RecordError::Io(e)
    }
}
