//! Content-addressed storage engine.
//!
//! This module provides the persistent cache behind the request pipeline:
//!
//! - Content-addressed blob storage with an in-memory hot tier
//!   (`hash = sha256(body)`, sharded on disk by the first two hex chars)
//! - A metadata index and an alias index, persisted as JSON snapshots with
//!   debounced temp-file-then-rename writes
//! - Logical blob reference counting through the set of index entries
//! - Oldest-first eviction against a configurable byte cap
//! - Per-origin / per-resource-type statistics

pub mod engine;
pub mod entry;
pub mod hash;
pub mod stats;

pub use engine::{CacheStore, StoreConfig};
pub use entry::CacheMeta;
pub use stats::{CacheStats, ReportSnapshot};
