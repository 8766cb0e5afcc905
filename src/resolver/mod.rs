//! Dependency resolver.
//!
//! # Overview
//!
//! Given an entity instance `(entity_type, entity_id)` the resolver:
//! 1. confirms the parent row exists,
//! 2. loads the active relationships whose parent is `entity_type`,
//! 3. counts referencing child rows per relationship (optionally sampling a
//!    page of them),
//! 4. folds the counts into a [`DependencySummary`] with a `deletable` verdict.
//!
//! Resolution is fail-fast: if any count query fails the whole call fails,
//! since a partial verdict could wrongly report an entity as deletable.
//!
//! # Example
//!
//! ```no_run
//! use refguard::engine::Engine;
//! use refguard::resolver::ResolveOptions;
//! use refguard::store::SqliteStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_in_memory().unwrap());
//! let engine = Engine::with_defaults(store).unwrap();
//! let summary = engine.resolve("equipment", 42, &ResolveOptions::default()).unwrap();
//! if !summary.deletable {
//!     for finding in summary.blocking_findings() {
//!         println!("{} rows in {}", finding.match_count, finding.child_entity_type);
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditLog, AuditRecord, OperationKind, Outcome};
use crate::error::{EngineError, EngineResult};
use crate::registry::{Registry, RelationshipDefinition, RelationshipKind};
use crate::store::{SchemaCatalog, Store, Value};

/// Upper bound on samples returned per finding.
pub const DEFAULT_SAMPLE_CAP: u32 = 10;

/// Per-call resolution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Fetch a page of matching child rows for each finding.
    pub include_samples: bool,
    /// Requested page size; clamped to the resolver's sample cap.
    pub sample_limit: u32,
    /// 0-based page of samples.
    pub sample_page: u32,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            include_samples: false,
            sample_limit: DEFAULT_SAMPLE_CAP,
            sample_page: 0,
        }
    }
}

impl ResolveOptions {
    /// Request samples with the given page size and page.
    #[must_use]
    pub fn with_samples(mut self, sample_limit: u32, sample_page: u32) -> Self {
        self.include_samples = true;
        self.sample_limit = sample_limit;
        self.sample_page = sample_page;
        self
    }

    fn page_size(&self, cap: u32) -> u32 {
        self.sample_limit.min(cap)
    }
}

/// One matching child row, column name to value.
pub type RecordSample = BTreeMap<String, Value>;

/// Result of checking one relationship for one entity instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyFinding {
    pub child_entity_type: String,
    pub foreign_key_column: String,
    pub relationship_kind: RelationshipKind,
    pub match_count: u64,
    pub cascade_allowed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<RecordSample>,
}

impl DependencyFinding {
    /// Whether this finding prevents deleting the parent.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.match_count > 0 && !self.cascade_allowed
    }
}

/// Aggregate verdict for one entity instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySummary {
    pub entity_type: String,
    pub entity_id: i64,
    /// One entry per active relationship with at least one match, in registry order.
    pub findings: Vec<DependencyFinding>,
    pub total_dependent_records: u64,
    pub deletable: bool,
}

impl DependencySummary {
    /// Fold findings into a summary.
    ///
    /// Findings with zero matches are dropped; `deletable` holds iff every
    /// remaining finding allows cascade.
    #[must_use]
    pub fn new(entity_type: &str, entity_id: i64, findings: Vec<DependencyFinding>) -> Self {
        let findings: Vec<DependencyFinding> =
            findings.into_iter().filter(|f| f.match_count > 0).collect();
        let total_dependent_records = findings.iter().map(|f| f.match_count).sum();
        let deletable = findings.iter().all(|f| !f.is_blocking());
        Self {
            entity_type: entity_type.to_string(),
            entity_id,
            findings,
            total_dependent_records,
            deletable,
        }
    }

    /// Findings that block deletion.
    pub fn blocking_findings(&self) -> impl Iterator<Item = &DependencyFinding> {
        self.findings.iter().filter(|f| f.is_blocking())
    }
}

/// Computes dependency summaries against the store.
#[derive(Clone)]
pub struct DependencyResolver {
    store: Arc<dyn Store>,
    registry: Registry,
    catalog: Arc<SchemaCatalog>,
    audit: AuditLog,
    sample_cap: u32,
}

impl fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("catalog_tables", &self.catalog.len())
            .field("sample_cap", &self.sample_cap)
            .finish_non_exhaustive()
    }
}

impl DependencyResolver {
    /// Create a resolver; identifiers are checked against `catalog`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Registry,
        catalog: Arc<SchemaCatalog>,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            registry,
            catalog,
            audit,
            sample_cap: DEFAULT_SAMPLE_CAP,
        }
    }

    /// Override the per-finding sample cap.
    #[must_use]
    pub fn with_sample_cap(mut self, cap: u32) -> Self {
        self.sample_cap = cap;
        self
    }

    /// The identifier allow-list in use.
    #[must_use]
    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Pre-delete check, audited as `dependency_check`.
    pub fn resolve(
        &self,
        entity_type: &str,
        entity_id: i64,
        options: &ResolveOptions,
    ) -> EngineResult<DependencySummary> {
        self.audited(OperationKind::DependencyCheck, entity_type, entity_id, options)
    }

    /// Dependency browser lookup, audited as `dependency_view`.
    pub fn view(
        &self,
        entity_type: &str,
        entity_id: i64,
        options: &ResolveOptions,
    ) -> EngineResult<DependencySummary> {
        self.audited(OperationKind::DependencyView, entity_type, entity_id, options)
    }

    fn audited(
        &self,
        kind: OperationKind,
        entity_type: &str,
        entity_id: i64,
        options: &ResolveOptions,
    ) -> EngineResult<DependencySummary> {
        let result = self.compute(entity_type, entity_id, options);

        let record = match &result {
            Ok(summary) => AuditRecord::new(kind, Outcome::Success)
                .for_entity(entity_type, entity_id)
                .with_dependency_count(summary.total_dependent_records),
            Err(e) => AuditRecord::new(kind, Outcome::Failed)
                .for_entity(entity_type, entity_id)
                .with_error(e.to_string()),
        };

        match (self.audit.append(&record), result) {
            (Ok(_), result) => result,
            (Err(audit_err), Ok(_)) => {
                log::error!(
                    "Failed to audit {kind} for {entity_type} {entity_id}: {audit_err}"
                );
                Err(audit_err.into())
            }
            (Err(audit_err), Err(e)) => {
                log::error!(
                    "Failed to audit failed {kind} for {entity_type} {entity_id}: {audit_err}"
                );
                Err(e)
            }
        }
    }

    /// Compute a summary without writing an audit record.
    ///
    /// Used by the refresh job, which audits the run as a whole.
    pub fn compute(
        &self,
        entity_type: &str,
        entity_id: i64,
        options: &ResolveOptions,
    ) -> EngineResult<DependencySummary> {
        let table = self.catalog.table(entity_type)?;
        let pk = self.catalog.primary_key(entity_type)?;
        let parent = self.store.query_optional(
            &format!("SELECT 1 AS present FROM {table} WHERE {pk} = ?1 LIMIT 1"),
            &[Value::Integer(entity_id)],
        )?;
        if parent.is_none() {
            return Err(EngineError::EntityNotFound {
                entity_type: entity_type.to_string(),
                entity_id,
            });
        }

        let relationships = self.registry.active_relationships_for(entity_type)?;
        let mut findings = Vec::with_capacity(relationships.len());
        for relationship in &relationships {
            let finding = self.check_relationship(relationship, entity_id, options)?;
            if finding.match_count > 0 {
                findings.push(finding);
            }
        }

        let summary = DependencySummary::new(entity_type, entity_id, findings);
        log::debug!(
            "Resolved {} {}: {} dependents across {} relationships, deletable={}",
            entity_type,
            entity_id,
            summary.total_dependent_records,
            relationships.len(),
            summary.deletable
        );
        Ok(summary)
    }

    fn check_relationship(
        &self,
        relationship: &RelationshipDefinition,
        entity_id: i64,
        options: &ResolveOptions,
    ) -> EngineResult<DependencyFinding> {
        let child_type = relationship.child_entity_type.as_str();
        let child = self.catalog.table(child_type)?;
        let fk = self
            .catalog
            .column(child_type, &relationship.foreign_key_column)?;

        let match_count = self.store.count(
            &format!("SELECT COUNT(*) FROM {child} WHERE {fk} = ?1"),
            &[Value::Integer(entity_id)],
        )?;

        let page_size = options.page_size(self.sample_cap);
        let samples = if options.include_samples && match_count > 0 && page_size > 0 {
            let order = self.catalog.primary_key(child_type)?;
            let offset = u64::from(options.sample_page) * u64::from(page_size);
            self.store
                .query(
                    &format!(
                        "SELECT * FROM {child} WHERE {fk} = ?1 ORDER BY {order} LIMIT ?2 OFFSET ?3"
                    ),
                    &[
                        Value::Integer(entity_id),
                        Value::Integer(i64::from(page_size)),
                        Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)),
                    ],
                )?
                .into_iter()
                .map(|row| row.into_map())
                .collect()
        } else {
            Vec::new()
        };

        Ok(DependencyFinding {
            child_entity_type: relationship.child_entity_type.clone(),
            foreign_key_column: relationship.foreign_key_column.clone(),
            relationship_kind: relationship.relationship_kind,
            match_count,
            cascade_allowed: relationship.cascade_allowed,
            samples,
        })
    }
}
