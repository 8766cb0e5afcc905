//! Cache refresh job.
//!
//! A refresh run:
//! 1. loads every active relationship (a failure here means the run cannot
//!    start and is audited as `FAILED`),
//! 2. evicts entries older than the staleness window,
//! 3. walks every row of every parent table that has an active relationship,
//!    recomputing and upserting its summary,
//! 4. writes one `cache_refresh` audit record for the whole run.
//!
//! Failures for individual entities are logged and counted; they never abort
//! the run. A run with failures or an interruption is audited as `WARNING`
//! unless [`CacheRefresher::with_partial_warning`] turns that off, in which
//! case it is `SUCCESS` with the failure note kept in `error_message`.
//! Overlapping runs are safe because every upsert is keyed.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;

use super::database::DependencyCache;
use super::entry::CacheEntry;
use crate::audit::{AuditLog, AuditRecord, OperationKind, Outcome};
use crate::error::{EngineError, EngineResult};
use crate::progress::ProgressCallback;
use crate::registry::Registry;
use crate::resolver::{DependencyResolver, ResolveOptions};
use crate::store::Store;

/// Default staleness window in seconds.
pub const DEFAULT_STALENESS_WINDOW_SECS: i64 = 3600;

/// One entity that could not be refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshFailure {
    pub entity_type: String,
    /// `None` when the whole entity type could not be enumerated.
    pub entity_id: Option<i64>,
    pub error: String,
}

/// Outcome of a refresh run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub refreshed: u64,
    pub evicted: usize,
    pub interrupted: bool,
    pub failures: Vec<RefreshFailure>,
}

impl RefreshReport {
    /// Whether every entity was refreshed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }

    fn warning_message(&self) -> Option<String> {
        if self.is_complete() {
            return None;
        }
        let mut parts = vec![format!("{} entities refreshed", self.refreshed)];
        if !self.failures.is_empty() {
            parts.push(format!("{} entities failed to refresh", self.failures.len()));
        }
        if self.interrupted {
            parts.push("run interrupted".to_string());
        }
        Some(parts.join("; "))
    }
}

/// Rebuilds cache entries from the current data.
#[derive(Clone)]
pub struct CacheRefresher {
    store: Arc<dyn Store>,
    registry: Registry,
    resolver: DependencyResolver,
    cache: DependencyCache,
    audit: AuditLog,
    staleness_window: Duration,
    warn_on_partial: bool,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl fmt::Debug for CacheRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRefresher")
            .field("staleness_window", &self.staleness_window)
            .field("warn_on_partial", &self.warn_on_partial)
            .field("shutdown_flag", &self.shutdown_flag)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish_non_exhaustive()
    }
}

impl CacheRefresher {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Registry,
        resolver: DependencyResolver,
        cache: DependencyCache,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            registry,
            resolver,
            cache,
            audit,
            staleness_window: Duration::seconds(DEFAULT_STALENESS_WINDOW_SECS),
            warn_on_partial: true,
            shutdown_flag: None,
            progress: None,
        }
    }

    /// Set the age after which entries are evicted before rebuilding.
    #[must_use]
    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    /// Whether an incomplete run is audited as `WARNING` (default) or `SUCCESS`.
    #[must_use]
    pub fn with_partial_warning(mut self, warn_on_partial: bool) -> Self {
        self.warn_on_partial = warn_on_partial;
        self
    }

    /// Set the shutdown flag checked between entities.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Run one refresh pass.
    pub fn refresh_all(&self) -> EngineResult<RefreshReport> {
        match self.run() {
            Ok(report) => {
                let outcome = if report.is_complete() || !self.warn_on_partial {
                    Outcome::Success
                } else {
                    Outcome::Warning
                };
                let mut record = AuditRecord::new(OperationKind::CacheRefresh, outcome)
                    .with_dependency_count(report.refreshed);
                if let Some(message) = report.warning_message() {
                    record = record.with_error(message);
                }
                self.audit.append(&record)?;
                log::info!(
                    "Cache refresh finished: {} refreshed, {} evicted, {} failed",
                    report.refreshed,
                    report.evicted,
                    report.failures.len()
                );
                Ok(report)
            }
            Err(e) => {
                log::error!("Cache refresh could not start: {e}");
                let record = AuditRecord::new(OperationKind::CacheRefresh, Outcome::Failed)
                    .with_error(e.to_string());
                if let Err(audit_err) = self.audit.append(&record) {
                    log::error!("Failed to audit failed cache refresh: {audit_err}");
                }
                Err(e)
            }
        }
    }

    /// Everything up to (not including) the summary audit record.
    ///
    /// Only errors that prevent the pass from starting are returned.
    fn run(&self) -> EngineResult<RefreshReport> {
        let started = Utc::now();
        let relationships = self.registry.all_active()?;
        let evicted = self.cache.evict_stale(self.staleness_window, started)?;

        let parent_types: BTreeSet<&str> = relationships
            .iter()
            .map(|r| r.parent_entity_type.as_str())
            .collect();

        let mut report = RefreshReport {
            evicted,
            ..RefreshReport::default()
        };

        let mut targets = Vec::new();
        for parent_type in parent_types {
            match self.entity_ids(parent_type) {
                Ok(ids) => targets.extend(ids.into_iter().map(|id| (parent_type, id))),
                Err(e) => {
                    log::warn!("Skipping entity type {parent_type}: {e}");
                    report.failures.push(RefreshFailure {
                        entity_type: parent_type.to_string(),
                        entity_id: None,
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some(progress) = &self.progress {
            progress.on_phase_start("refresh", targets.len());
        }

        for (idx, (entity_type, entity_id)) in targets.iter().enumerate() {
            if self.is_shutdown_requested() {
                log::info!("Cache refresh interrupted after {} entities", idx);
                report.interrupted = true;
                break;
            }
            if let Some(progress) = &self.progress {
                progress.on_progress(idx + 1, &format!("{entity_type}/{entity_id}"));
            }

            match self.refresh_one(entity_type, *entity_id) {
                Ok(()) => report.refreshed += 1,
                Err(e) => {
                    log::warn!("Failed to refresh {entity_type} {entity_id}: {e}");
                    report.failures.push(RefreshFailure {
                        entity_type: entity_type.to_string(),
                        entity_id: Some(*entity_id),
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some(progress) = &self.progress {
            progress.on_phase_end("refresh");
        }
        Ok(report)
    }

    fn entity_ids(&self, entity_type: &str) -> EngineResult<Vec<i64>> {
        let catalog = self.resolver.catalog();
        let table = catalog.table(entity_type)?;
        let pk = catalog.primary_key(entity_type)?;
        self.store
            .query(
                &format!("SELECT {pk} AS entity_id FROM {table} ORDER BY {pk}"),
                &[],
            )?
            .iter()
            .map(|row| row.get_i64("entity_id").map_err(EngineError::from))
            .collect()
    }

    fn refresh_one(&self, entity_type: &str, entity_id: i64) -> EngineResult<()> {
        let summary = self
            .resolver
            .compute(entity_type, entity_id, &ResolveOptions::default())?;
        let entry = CacheEntry::from_summary(&summary, Utc::now())?;
        self.cache.upsert(&entry)?;
        Ok(())
    }
}
