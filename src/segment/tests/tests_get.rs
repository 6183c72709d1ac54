//! Point-lookup tests for [`Segment::get`].

#[cfg(test)]
mod tests {
    use crate::record::{Record, RecordError};
    use crate::segment::{Segment, SegmentError};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_segment(dir: &TempDir, pairs: &[(&str, &str)]) -> PathBuf {
        let path = dir.path().join("segment-0");
        let mut bytes = Vec::new();
        for (key, value) in pairs {
            bytes.extend(Record::encode(key, value).expect("encode"));
        }
        fs::write(&path, &bytes).expect("write segment file");
        path
    }

    #[test]
    fn get_returns_the_stored_value() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, &[("key1", "val1"), ("key2", "val2")]);

        let seg = Segment::recover(path).expect("recover");
        assert_eq!(seg.get("key1").expect("key1"), "val1");
        assert_eq!(seg.get("key2").expect("key2"), "val2");
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, &[("key1", "val1")]);

        let seg = Segment::recover(path).expect("recover");
        let err = seg.get("absent").unwrap_err();
        assert!(matches!(err, SegmentError::NotFound), "got {err:?}");
    }

    #[test]
    fn get_on_empty_segment_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, &[]);

        let seg = Segment::recover(path).expect("recover");
        assert!(matches!(seg.get("key1"), Err(SegmentError::NotFound)));
    }

    /// # Scenario
    /// Flip one byte of a value after recovery has indexed the file.
    ///
    /// # Expected behavior
    /// `get` for that key fails with a digest mismatch; other keys are
    /// unaffected.
    #[test]
    fn flipped_value_byte_fails_get_with_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, &[("key1", "val1"), ("key2", "val2")]);

        let seg = Segment::recover(path.clone()).expect("recover");

        // First record: value bytes start after the two length fields
        // and the 4-byte key.
        let mut bytes = fs::read(&path).unwrap();
        bytes[16] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = seg.get("key1").unwrap_err();
        assert!(
            matches!(err, SegmentError::Record(RecordError::ChecksumMismatch)),
            "got {err:?}"
        );
        assert_eq!(seg.get("key2").expect("key2"), "val2");
    }

    #[test]
    fn get_after_file_removed_propagates_io_error() {
        let dir = TempDir::new().unwrap();
        let path = write_segment(&dir, &[("key1", "val1")]);

        let seg = Segment::recover(path.clone()).expect("recover");
        fs::remove_file(&path).unwrap();

        let err = seg.get("key1").unwrap_err();
        assert!(matches!(err, SegmentError::Io(_)), "got {err:?}");
    }
}
