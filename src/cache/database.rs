//! Store-backed dependency cache table.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::entry::CacheEntry;
use crate::store::schema::CACHE_TABLE;
use crate::store::{encode_timestamp, Row, Store, StoreError, StoreResult, Value};

/// Entry counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: u64,
    pub fresh: u64,
    pub stale: u64,
}

/// Keyed memo of dependency summaries.
///
/// Uniqueness of `(entity_type, entity_id)` is the table's primary key, and
/// [`DependencyCache::upsert`] relies on SQLite's `ON CONFLICT` merge, so
/// concurrent writers for the same key never produce duplicate rows.
#[derive(Clone)]
pub struct DependencyCache {
    store: Arc<dyn Store>,
}

impl fmt::Debug for DependencyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyCache").finish_non_exhaustive()
    }
}

impl DependencyCache {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Pure lookup; a miss is `None`, never an error.
    pub fn get(&self, entity_type: &str, entity_id: i64) -> StoreResult<Option<CacheEntry>> {
        self.store
            .query_optional(
                &format!(
                    "SELECT entity_type, entity_id, dependency_count, serialized_summary, computed_at \
                     FROM {CACHE_TABLE} WHERE entity_type = ?1 AND entity_id = ?2"
                ),
                &[Value::from(entity_type), Value::Integer(entity_id)],
            )?
            .map(|row| entry_from_row(&row))
            .transpose()
    }

    /// Insert or overwrite the entry for its key.
    pub fn upsert(&self, entry: &CacheEntry) -> StoreResult<()> {
        self.store.execute(
            &format!(
                "INSERT INTO {CACHE_TABLE} \
                 (entity_type, entity_id, dependency_count, serialized_summary, computed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (entity_type, entity_id) DO UPDATE SET \
                 dependency_count = excluded.dependency_count, \
                 serialized_summary = excluded.serialized_summary, \
                 computed_at = excluded.computed_at"
            ),
            &[
                Value::from(entry.entity_type.as_str()),
                Value::Integer(entry.entity_id),
                Value::Integer(i64::try_from(entry.dependency_count).unwrap_or(i64::MAX)),
                Value::from(entry.serialized_summary.as_str()),
                Value::from(encode_timestamp(&entry.computed_at)),
            ],
        )?;
        Ok(())
    }

    /// Delete entries computed before `now - window`; returns how many.
    ///
    /// A window reaching past the earliest representable time evicts nothing.
    pub fn evict_stale(&self, window: Duration, now: DateTime<Utc>) -> StoreResult<usize> {
        let Some(cutoff) = stale_cutoff(window, now) else {
            return Ok(0);
        };
        let outcome = self.store.execute(
            &format!("DELETE FROM {CACHE_TABLE} WHERE computed_at < ?1"),
            &[Value::from(cutoff)],
        )?;
        if outcome.affected_rows > 0 {
            log::debug!("Evicted {} stale cache entries", outcome.affected_rows);
        }
        Ok(outcome.affected_rows)
    }

    /// Number of cached entries.
    pub fn len(&self) -> StoreResult<u64> {
        self.store
            .count(&format!("SELECT COUNT(*) FROM {CACHE_TABLE}"), &[])
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every entry.
    pub fn clear(&self) -> StoreResult<usize> {
        let outcome = self
            .store
            .execute(&format!("DELETE FROM {CACHE_TABLE}"), &[])?;
        log::info!("Cleared {} cache entries", outcome.affected_rows);
        Ok(outcome.affected_rows)
    }

    /// Count entries by state relative to `now`.
    pub fn stats(&self, window: Duration, now: DateTime<Utc>) -> StoreResult<CacheStats> {
        let total = self.len()?;
        let stale = match stale_cutoff(window, now) {
            Some(cutoff) => self.store.count(
                &format!("SELECT COUNT(*) FROM {CACHE_TABLE} WHERE computed_at < ?1"),
                &[Value::from(cutoff)],
            )?,
            None => 0,
        };
        Ok(CacheStats {
            total,
            fresh: total.saturating_sub(stale),
            stale,
        })
    }
}

/// Encoded `now - window`, or `None` when the subtraction leaves chrono's range.
fn stale_cutoff(window: Duration, now: DateTime<Utc>) -> Option<String> {
    now.checked_sub_signed(window).map(|cutoff| encode_timestamp(&cutoff))
}

fn entry_from_row(row: &Row) -> StoreResult<CacheEntry> {
    let count = row.get_i64("dependency_count")?;
    Ok(CacheEntry {
        entity_type: row.get_str("entity_type")?.to_string(),
        entity_id: row.get_i64("entity_id")?,
        dependency_count: u64::try_from(count).map_err(|_| StoreError::TypeMismatch {
            column: "dependency_count".to_string(),
            expected: "a non-negative count",
        })?,
        serialized_summary: row.get_str("serialized_summary")?.to_string(),
        computed_at: row.get_timestamp("computed_at")?,
    })
}
