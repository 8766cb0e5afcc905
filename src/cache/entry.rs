//! Cache entry definitions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::resolver::DependencySummary;

/// Age-derived state of an entry. There is no invalid state: stale entries
/// are still served until a refresh replaces or evicts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Fresh,
    Stale,
}

/// A memoized [`DependencySummary`], keyed by `(entity_type, entity_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub entity_type: String,
    pub entity_id: i64,
    pub dependency_count: u64,
    /// JSON encoding of the summary.
    pub serialized_summary: String,
    pub computed_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build an entry from a freshly computed summary.
    pub fn from_summary(
        summary: &DependencySummary,
        computed_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            entity_type: summary.entity_type.clone(),
            entity_id: summary.entity_id,
            dependency_count: summary.total_dependent_records,
            serialized_summary: serde_json::to_string(summary)?,
            computed_at,
        })
    }

    /// Decode the cached summary.
    pub fn summary(&self) -> Result<DependencySummary, serde_json::Error> {
        serde_json::from_str(&self.serialized_summary)
    }

    /// Time elapsed since the entry was computed (never negative).
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.computed_at).max(Duration::zero())
    }

    /// Whether the entry is older than the staleness window.
    #[must_use]
    pub fn is_stale(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > window
    }

    #[must_use]
    pub fn state(&self, window: Duration, now: DateTime<Utc>) -> CacheState {
        if self.is_stale(window, now) {
            CacheState::Stale
        } else {
            CacheState::Fresh
        }
    }
}
