//! Dependency summary cache.
//!
//! This module memoizes resolver results so dependency browsers and reports
//! can read a recent verdict without recounting every relationship.
//!
//! # Architecture
//!
//! * [`database`]: store-backed table with keyed upserts and staleness eviction.
//! * [`entry`]: the cached record and its age-derived state.
//! * [`refresh`]: the periodic job that rebuilds entries.
//!
//! # Staleness
//!
//! Entries move through absent -> fresh -> stale -> refreshed | evicted,
//! driven only by `computed_at` and refresh timing. Reads never block on or
//! reject stale entries; the next refresh run evicts entries older than the
//! staleness window and rebuilds the rest.

pub mod database;
pub mod entry;
pub mod refresh;

pub use database::{CacheStats, DependencyCache};
pub use entry::{CacheEntry, CacheState};
pub use refresh::{CacheRefresher, RefreshFailure, RefreshReport, DEFAULT_STALENESS_WINDOW_SECS};
