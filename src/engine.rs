//! Engine facade.
//!
//! [`Engine`] wires the registry, resolver, cache, audit log and reporting
//! aggregator over one shared store. Construction provisions the engine
//! tables and introspects the schema into the identifier allow-list; tables
//! created afterwards become visible after [`Engine::reload_catalog`].

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::audit::{AuditFilter, AuditLog, AuditPage, Pagination};
use crate::cache::{CacheEntry, CacheRefresher, CacheStats, DependencyCache, RefreshReport};
use crate::config::Config;
use crate::error::EngineResult;
use crate::registry::Registry;
use crate::report::{EntityOverview, Export, ReportAggregator, ReportSummary};
use crate::resolver::{DependencyResolver, DependencySummary, ResolveOptions};
use crate::store::{schema, SchemaCatalog, Store};

/// Entry point for every engine operation.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    registry: Registry,
    audit: AuditLog,
    cache: DependencyCache,
    catalog: Arc<SchemaCatalog>,
    resolver: DependencyResolver,
    reports: ReportAggregator,
    staleness_window: Duration,
    sample_cap: u32,
    partial_refresh_warns: bool,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("catalog_tables", &self.catalog.len())
            .field("staleness_window", &self.staleness_window)
            .field("sample_cap", &self.sample_cap)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine using the tunables from `config`.
    pub fn new(store: Arc<dyn Store>, config: &Config) -> EngineResult<Self> {
        schema::provision(store.as_ref())?;
        let catalog = Arc::new(store.catalog()?);
        log::debug!("Schema catalog holds {} tables", catalog.len());

        let registry = Registry::new(Arc::clone(&store));
        let audit = AuditLog::new(Arc::clone(&store));
        let cache = DependencyCache::new(Arc::clone(&store));
        let resolver = DependencyResolver::new(
            Arc::clone(&store),
            registry.clone(),
            Arc::clone(&catalog),
            audit.clone(),
        )
        .with_sample_cap(config.sample_cap);
        let reports = ReportAggregator::new(
            Arc::clone(&store),
            registry.clone(),
            audit.clone(),
            Arc::clone(&catalog),
        );

        Ok(Self {
            store,
            registry,
            audit,
            cache,
            catalog,
            resolver,
            reports,
            staleness_window: config.staleness_window(),
            sample_cap: config.sample_cap,
            partial_refresh_warns: config.partial_refresh_warns,
        })
    }

    /// Build an engine with default settings.
    pub fn with_defaults(store: Arc<dyn Store>) -> EngineResult<Self> {
        Self::new(store, &Config::default())
    }

    /// Re-introspect the schema, picking up tables created since startup.
    pub fn reload_catalog(&mut self) -> EngineResult<()> {
        let config = Config {
            staleness_window_secs: u64::try_from(self.staleness_window.num_seconds()).unwrap_or(0),
            sample_cap: self.sample_cap,
            partial_refresh_warns: self.partial_refresh_warns,
            ..Config::default()
        };
        *self = Self::new(Arc::clone(&self.store), &config)?;
        Ok(())
    }

    /// Pre-delete check for one entity; audited as `dependency_check`.
    pub fn resolve(
        &self,
        entity_type: &str,
        entity_id: i64,
        options: &ResolveOptions,
    ) -> EngineResult<DependencySummary> {
        self.resolver.resolve(entity_type, entity_id, options)
    }

    /// Dependency browser lookup; audited as `dependency_view`.
    pub fn view(
        &self,
        entity_type: &str,
        entity_id: i64,
        options: &ResolveOptions,
    ) -> EngineResult<DependencySummary> {
        self.resolver.view(entity_type, entity_id, options)
    }

    /// A refresher configured with this engine's staleness window.
    ///
    /// Attach a shutdown flag or progress callback before calling
    /// [`CacheRefresher::refresh_all`].
    #[must_use]
    pub fn refresher(&self) -> CacheRefresher {
        CacheRefresher::new(
            Arc::clone(&self.store),
            self.registry.clone(),
            self.resolver.clone(),
            self.cache.clone(),
            self.audit.clone(),
        )
        .with_staleness_window(self.staleness_window)
        .with_partial_warning(self.partial_refresh_warns)
    }

    /// Evict stale entries and rebuild the cache.
    pub fn refresh_all(&self) -> EngineResult<RefreshReport> {
        self.refresher().refresh_all()
    }

    /// Cached summary for an entity; `None` is a miss, not an error.
    pub fn cache_get(&self, entity_type: &str, entity_id: i64) -> EngineResult<Option<CacheEntry>> {
        Ok(self.cache.get(entity_type, entity_id)?)
    }

    pub fn cache_stats(&self) -> EngineResult<CacheStats> {
        Ok(self.cache.stats(self.staleness_window, Utc::now())?)
    }

    /// Delete entries older than the staleness window.
    pub fn evict_stale(&self) -> EngineResult<usize> {
        Ok(self.cache.evict_stale(self.staleness_window, Utc::now())?)
    }

    /// Browse the audit log, newest first.
    pub fn list_recent(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> EngineResult<AuditPage> {
        Ok(self.audit.list_recent(filter, pagination)?)
    }

    pub fn summary(&self, window_days: u32) -> EngineResult<ReportSummary> {
        self.reports.summary(window_days)
    }

    pub fn entities_overview(&self) -> EngineResult<Vec<EntityOverview>> {
        self.reports.entities_overview()
    }

    /// Render the audit log as `csv` or `json`.
    pub fn export(
        &self,
        window_days: u32,
        filter: &AuditFilter,
        format: &str,
    ) -> EngineResult<Export> {
        self.reports.export(window_days, filter, format)
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    #[must_use]
    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn sample_cap(&self) -> u32 {
        self.sample_cap
    }
}
