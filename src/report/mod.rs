//! Time-windowed reporting over the audit log and registry.
//!
//! # Submodules
//!
//! - [`csv`]: CSV rendering of audit records
//! - [`json`]: JSON rendering of audit records
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use refguard::audit::AuditFilter;
//! use refguard::engine::Engine;
//! use refguard::store::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::open_in_memory().unwrap());
//! let engine = Engine::with_defaults(store).unwrap();
//!
//! let summary = engine.summary(7).unwrap();
//! println!("{} validations", summary.total_validations);
//!
//! let export = engine.export(7, &AuditFilter::default(), "csv").unwrap();
//! std::fs::write(&export.file_name, &export.bytes).unwrap();
//! ```

pub mod csv;
pub mod json;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{validate_window, window_start, AuditFilter, AuditLog, OperationKind, Outcome};
use crate::error::{EngineError, EngineResult};
use crate::registry::{Registry, RegistryError, RelationshipDefinition};
use crate::store::schema::AUDIT_TABLE;
use crate::store::{encode_timestamp, SchemaCatalog, Store, StoreError, Value};

pub use self::csv::{CsvOutput, CsvOutputError};
pub use self::json::JsonOutput;

/// Aggregate counts over a trailing window of validations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub window_days: u32,
    pub total_validations: u64,
    pub successful: u64,
    pub failed: u64,
    pub warnings: u64,
    /// Distinct entities with at least one record reporting dependents.
    pub entities_with_dependencies: u64,
    /// Mean `dependency_count` over records with a positive count.
    pub average_dependencies: f64,
}

/// Registry statistics for one parent entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityOverview {
    pub entity_type: String,
    pub total_relationships: u64,
    pub active_relationships: u64,
    /// Active relationships whose child table holds at least one reference.
    pub relationships_with_dependencies: u64,
}

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(EngineError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// A rendered export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub content_type: &'static str,
    pub file_name: String,
    pub total_records: usize,
    pub bytes: Vec<u8>,
}

/// Read-only aggregation over the audit log and registry.
#[derive(Clone)]
pub struct ReportAggregator {
    store: Arc<dyn Store>,
    registry: Registry,
    audit: AuditLog,
    catalog: Arc<SchemaCatalog>,
}

impl fmt::Debug for ReportAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportAggregator")
            .field("catalog_tables", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl ReportAggregator {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Registry,
        audit: AuditLog,
        catalog: Arc<SchemaCatalog>,
    ) -> Self {
        Self {
            store,
            registry,
            audit,
            catalog,
        }
    }

    /// Validation counts over the trailing `window_days`.
    pub fn summary(&self, window_days: u32) -> EngineResult<ReportSummary> {
        self.summary_at(window_days, Utc::now())
    }

    /// [`summary`](Self::summary) relative to an explicit `now`.
    pub fn summary_at(&self, window_days: u32, now: DateTime<Utc>) -> EngineResult<ReportSummary> {
        validate_window(Some(window_days))?;

        let params = [
            Value::from(encode_timestamp(&window_start(now, window_days))),
            Value::from(OperationKind::DependencyCheck.as_str()),
            Value::from(OperationKind::DependencyView.as_str()),
            Value::from(Outcome::Success.as_str()),
            Value::from(Outcome::Failed.as_str()),
            Value::from(Outcome::Warning.as_str()),
        ];
        let scope = "created_at >= ?1 AND operation_kind IN (?2, ?3)";

        let counts = self.store.query_optional(
            &format!(
                "SELECT COUNT(*) AS total, \
                 COALESCE(SUM(CASE WHEN outcome = ?4 THEN 1 ELSE 0 END), 0) AS successful, \
                 COALESCE(SUM(CASE WHEN outcome = ?5 THEN 1 ELSE 0 END), 0) AS failed, \
                 COALESCE(SUM(CASE WHEN outcome = ?6 THEN 1 ELSE 0 END), 0) AS warnings \
                 FROM {AUDIT_TABLE} WHERE {scope}"
            ),
            &params,
        )?;
        let (total, successful, failed, warnings) = match counts {
            Some(row) => (
                non_negative(row.get_i64("total")?),
                non_negative(row.get_i64("successful")?),
                non_negative(row.get_i64("failed")?),
                non_negative(row.get_i64("warnings")?),
            ),
            None => (0, 0, 0, 0),
        };

        let entities_with_dependencies = self.store.count(
            &format!(
                "SELECT COUNT(*) FROM (SELECT DISTINCT entity_type, entity_id FROM {AUDIT_TABLE} \
                 WHERE {scope} AND entity_id IS NOT NULL AND dependency_count > 0)"
            ),
            &params[..3],
        )?;

        let average_dependencies = self
            .store
            .query_optional(
                &format!(
                    "SELECT AVG(dependency_count) AS average FROM {AUDIT_TABLE} \
                     WHERE {scope} AND dependency_count > 0"
                ),
                &params[..3],
            )?
            .and_then(|row| match row.get("average") {
                Some(Value::Real(avg)) => Some(*avg),
                Some(Value::Integer(avg)) => Some(*avg as f64),
                _ => None,
            })
            .unwrap_or(0.0);

        Ok(ReportSummary {
            window_days,
            total_validations: total,
            successful,
            failed,
            warnings,
            entities_with_dependencies,
            average_dependencies,
        })
    }

    /// Per parent type relationship counts, empty if the registry is not provisioned.
    pub fn entities_overview(&self) -> EngineResult<Vec<EntityOverview>> {
        if !self.registry.is_provisioned()? {
            log::debug!("Relationship registry not provisioned, overview is empty");
            return Ok(Vec::new());
        }
        let relationships = match self.registry.list(true) {
            Ok(relationships) => relationships,
            Err(RegistryError::Unavailable(e)) if e.is_missing_table() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut grouped: BTreeMap<String, EntityOverview> = BTreeMap::new();
        for relationship in &relationships {
            let overview = grouped
                .entry(relationship.parent_entity_type.clone())
                .or_insert_with(|| EntityOverview {
                    entity_type: relationship.parent_entity_type.clone(),
                    total_relationships: 0,
                    active_relationships: 0,
                    relationships_with_dependencies: 0,
                });
            overview.total_relationships += 1;
            if relationship.active {
                overview.active_relationships += 1;
                if self.has_references(relationship)? {
                    overview.relationships_with_dependencies += 1;
                }
            }
        }
        Ok(grouped.into_values().collect())
    }

    fn has_references(&self, relationship: &RelationshipDefinition) -> EngineResult<bool> {
        let child = &relationship.child_entity_type;
        let identifiers = self.catalog.table(child).and_then(|table| {
            self.catalog
                .column(child, &relationship.foreign_key_column)
                .map(|column| (table, column))
        });
        let (table, column) = match identifiers {
            Ok(pair) => pair,
            Err(e @ StoreError::UnknownIdentifier { .. }) => {
                log::warn!("Relationship {} skipped in overview: {e}", relationship.id);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let present = self.store.count(
            &format!(
                "SELECT COUNT(*) FROM \
                 (SELECT 1 FROM {table} WHERE {column} IS NOT NULL LIMIT 1)"
            ),
            &[],
        )?;
        Ok(present > 0)
    }

    /// Render the windowed, filtered audit log.
    ///
    /// `window_days` overrides any window already set on `filter`.
    pub fn export(
        &self,
        window_days: u32,
        filter: &AuditFilter,
        format: &str,
    ) -> EngineResult<Export> {
        let format: ExportFormat = format.parse()?;
        let filter = filter.clone().with_window_days(window_days);
        let now = Utc::now();
        let records = self.audit.records(&filter, now)?;

        let bytes = match format {
            ExportFormat::Csv => CsvOutput::new(&records)
                .to_bytes()
                .map_err(|e| EngineError::Render(e.to_string()))?,
            ExportFormat::Json => {
                let mut buffer = Vec::new();
                JsonOutput::new(&records, &filter, now).write_to(&mut buffer)?;
                buffer
            }
        };

        log::info!("Exported {} audit records as {format}", records.len());
        Ok(Export {
            content_type: format.content_type(),
            file_name: format!(
                "dependency_audit_{}.{}",
                now.format("%Y%m%d_%H%M%S"),
                format.extension()
            ),
            total_records: records.len(),
            bytes,
        })
    }
}

fn non_negative(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}
