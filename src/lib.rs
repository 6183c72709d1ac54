//! # EmberDB
//!
//! An embeddable, persistent key-value store built on an **append-only
//! segmented log** with in-memory hash indexing and background compaction
//! (the Bitcask design). Optimised for simple point reads and writes;
//! durability comes from replaying segment files on open.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                          Db                             │
//! │                                                         │
//! │   put ──► write channel ──► writer task ──► append      │
//! │                                │                        │
//! │                                ▼ (size threshold)       │
//! │   ┌──────────────┐   rotate   ┌──────────────────────┐  │
//! │   │ segment-     │ ─────────► │ segment-N, segment-… │  │
//! │   │ active       │            │ (sealed, immutable)  │  │
//! │   └──────────────┘            └──────────┬───────────┘  │
//! │          ▲                               │ merge        │
//! │   get ───┴── scans newest → oldest       ▼              │
//! │                               ┌──────────────────────┐  │
//! │                               │ segment- (merged)    │  │
//! │                               └──────────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | Database handle — open, put, get, merge, close |
//! | [`segment`] | One append-only file plus its key → offset index |
//! | [`record`] | On-disk record codec with SHA-1 value digests |
//!
//! ## Key properties
//!
//! - **Single writer, many readers** — all writes are serialised through
//!   one channel-fed writer task; reads proceed concurrently under a
//!   shared lock on the segment list.
//! - **Crash recovery from filenames and contents** — no manifest, no
//!   lock file. Opening a directory rebuilds every segment's index by
//!   scanning its records.
//! - **Value integrity** — every record carries a SHA-1 digest of its
//!   value, verified on every read.
//! - **Background compaction** — sealed segments are collapsed into a
//!   single merged segment holding the newest value per key, without
//!   blocking readers or the writer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use emberdb::Db;
//!
//! let db = Db::open("/tmp/my_db").unwrap();
//!
//! db.put("hello", "world").unwrap();
//! assert_eq!(db.get("hello").unwrap(), "world");
//!
//! db.close().unwrap();
//! ```

pub mod db;
pub mod record;
pub mod segment;

pub use db::{Db, DbConfig, DbError, DbStats};
