//! Compaction tests — collapsing sealed segments into one merged segment.

#[cfg(test)]
mod tests {
    use crate::db::tests::helpers::*;
    use crate::db::Db;
    use crate::segment::Segment;
    use tempfile::TempDir;

    /// # Scenario
    /// Three puts fill one sealed segment, two overwrites fill a second;
    /// the newest value of `key3` stays in the active segment.
    ///
    /// # Expected behavior
    /// Before the merge the directory holds 3 files; after it, 2. The
    /// merged segment holds exactly one record per key — the newest value
    /// among the *sealed* set — and reads still return the overall newest
    /// values, because the active segment is scanned first.
    #[test]
    fn merge_collapses_sealed_segments() {
        let dir = TempDir::new().unwrap();
        let db = Db::open_with(dir.path(), two_record_config()).expect("open");

        db.put("key1", "val1").expect("put");
        db.put("key2", "val2").expect("put"); // seals segment-0 {key1, key2}
        db.put("key3", "val3").expect("put");
        db.put("key2", "newVal2").expect("put"); // seals segment-1 {key3, key2}
        db.put("key3", "newVal3").expect("put"); // stays in the active segment

        assert_eq!(
            segment_files(dir.path()),
            vec!["segment-0", "segment-1", "segment-active"],
        );

        db.merge().expect("merge");

        assert_eq!(
            segment_files(dir.path()),
            vec!["segment-", "segment-active"],
            "sealed segments collapse into the single merged segment"
        );

        // The merged output carries the newest sealed value per key.
        let merged = Segment::recover(dir.path().join("segment-")).expect("recover merged");
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("key1").expect("key1"), "val1");
        assert_eq!(merged.get("key2").expect("key2"), "newVal2");
        assert_eq!(merged.get("key3").expect("key3"), "val3");

        // Reads see the overall newest values — active wins over merged.
        assert_eq!(db.get("key1").expect("get"), "val1");
        assert_eq!(db.get("key2").expect("get"), "newVal2");
        assert_eq!(db.get("key3").expect("get"), "newVal3");
    }

    #[test]
    fn merge_with_fewer_than_two_sealed_segments_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let db = Db::open_with(dir.path(), two_record_config()).expect("open");

        db.put("key1", "val1").expect("put");
        db.put("key2", "val2").expect("put"); // seals segment-0

        let before = segment_files(dir.path());
        db.merge().expect("merge");
        assert_eq!(segment_files(dir.path()), before, "one sealed segment: nothing to collapse");

        assert_eq!(db.get("key1").expect("get"), "val1");
        assert_eq!(db.get("key2").expect("get"), "val2");
    }

    #[test]
    fn merge_preserves_every_live_key() {
        let dir = TempDir::new().unwrap();
        let db = Db::open_with(dir.path(), one_record_config()).expect("open");

        for i in 0..8 {
            db.put(&format!("key{i}"), &format!("val{i}")).expect("put");
        }

        db.merge().expect("merge");

        for i in 0..8 {
            assert_eq!(db.get(&format!("key{i}")).expect("get"), format!("val{i}"));
        }
        assert_eq!(segment_files(dir.path()), vec!["segment-", "segment-active"]);
    }

    #[test]
    fn repeated_merges_consume_the_previous_merged_segment() {
        let dir = TempDir::new().unwrap();
        let db = Db::open_with(dir.path(), one_record_config()).expect("open");

        db.put("key1", "val1").expect("put");
        db.put("key2", "val2").expect("put");
        db.merge().expect("first merge");

        db.put("key1", "newVal1").expect("put"); // seals segment-2
        db.put("key3", "val3").expect("put"); // seals segment-3
        assert_eq!(
            segment_files(dir.path()),
            vec!["segment-", "segment-2", "segment-3", "segment-active"],
        );

        db.merge().expect("second merge");

        assert_eq!(segment_files(dir.path()), vec!["segment-", "segment-active"]);
        assert_eq!(db.get("key1").expect("get"), "newVal1");
        assert_eq!(db.get("key2").expect("get"), "val2");
        assert_eq!(db.get("key3").expect("get"), "val3");
    }

    #[test]
    fn merge_deduplicates_overwrites_across_segments() {
        let dir = TempDir::new().unwrap();
        let db = Db::open_with(dir.path(), one_record_config()).expect("open");

        for round in 0..3 {
            db.put("key", &format!("round{round}")).expect("put");
        }
        db.merge().expect("merge");

        let merged = Segment::recover(dir.path().join("segment-")).expect("recover merged");
        assert_eq!(merged.len(), 1, "one record per live key");
        assert_eq!(db.get("key").expect("get"), "round2");
    }

    #[test]
    fn auto_merge_kicks_in_when_sealed_segments_pile_up() {
        let dir = TempDir::new().unwrap();
        let db = Db::open_sized(dir.path(), 1, true).expect("open");

        // Each put seals one segment; past a backlog of two the writer
        // signals the compactor.
        for i in 0..16 {
            db.put(&format!("key{i}"), &format!("val{i}")).expect("put");
        }

        // The compactor runs asynchronously; closing joins it after its
        // current iteration, but a just-missed signal may leave a small
        // tail of sealed segments. Give it a moment, then verify reads.
        for _ in 0..50 {
            if db.stats().expect("stats").sealed_count <= 3 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        for i in 0..16 {
            assert_eq!(db.get(&format!("key{i}")).expect("get"), format!("val{i}"));
        }
        db.close().expect("close");
    }
}
