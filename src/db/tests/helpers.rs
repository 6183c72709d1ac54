use crate::db::DbConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Threshold far above anything the tests write — no rotations.
pub fn no_rotation_config() -> DbConfig {
    init_tracing();
    DbConfig {
        segment_size_threshold: 10 * 1024 * 1024,
        auto_merge: false,
    }
}

/// Two 44-byte records fill a segment; a `putN("keyN", "valN")` record is
/// exactly 44 bytes (16 overhead + 4 key + 4 value + 20 digest).
pub fn two_record_config() -> DbConfig {
    init_tracing();
    DbConfig {
        segment_size_threshold: 88,
        auto_merge: false,
    }
}

/// Every put rotates — one sealed segment per record.
pub fn one_record_config() -> DbConfig {
    init_tracing();
    DbConfig {
        segment_size_threshold: 1,
        auto_merge: false,
    }
}

/// Names of all `segment-*` files in the directory, sorted.
pub fn segment_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read_dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("segment-"))
        .collect();
    names.sort();
    names
}
