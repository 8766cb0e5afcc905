//! Append-only audit log.
//!
//! Every dependency check, dependency view and cache refresh leaves exactly
//! one [`AuditRecord`]. The log exposes `append` and read-only browsing; it
//! never updates or deletes rows. Retention is handled outside the engine.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::catalog::is_well_formed;
use crate::store::schema::AUDIT_TABLE;
use crate::store::{encode_timestamp, Row, Store, StoreError, Value};

/// Largest trailing window accepted by filters.
pub const MAX_WINDOW_DAYS: u32 = 3650;
/// Largest page size accepted by [`Pagination`].
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Errors raised by the audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A filter or pagination value was out of range or malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// What kind of operation produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    DependencyCheck,
    DependencyView,
    CacheRefresh,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DependencyCheck => "dependency_check",
            Self::DependencyView => "dependency_view",
            Self::CacheRefresh => "cache_refresh",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dependency_check" => Ok(Self::DependencyCheck),
            "dependency_view" => Ok(Self::DependencyView),
            "cache_refresh" => Ok(Self::CacheRefresh),
            other => Err(AuditError::InvalidFilter(format!(
                "unknown operation kind '{other}'"
            ))),
        }
    }
}

/// Result of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Success,
    Failed,
    Warning,
}

impl Outcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Warning => "WARNING",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "WARNING" => Ok(Self::Warning),
            other => Err(AuditError::InvalidFilter(format!("unknown outcome '{other}'"))),
        }
    }
}

/// One immutable audit log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Store row id; `None` until appended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub operation_kind: OperationKind,
    pub outcome: Outcome,
    pub dependency_count: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// A system-level record stamped with the current time.
    #[must_use]
    pub fn new(operation_kind: OperationKind, outcome: Outcome) -> Self {
        Self {
            id: None,
            entity_type: None,
            entity_id: None,
            operation_kind,
            outcome,
            dependency_count: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Attach the entity this record is about.
    #[must_use]
    pub fn for_entity(mut self, entity_type: &str, entity_id: i64) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id);
        self
    }

    #[must_use]
    pub fn with_dependency_count(mut self, count: u64) -> Self {
        self.dependency_count = Some(count);
        self
    }

    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Override the timestamp (imports and tests).
    #[must_use]
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    fn from_row(row: &Row) -> Result<Self, AuditError> {
        let operation_kind = row.get_str("operation_kind")?.parse()?;
        let outcome = row.get_str("outcome")?.parse()?;
        Ok(Self {
            id: Some(row.get_i64("id")?),
            entity_type: row.get_opt_str("entity_type")?.map(str::to_string),
            entity_id: row.get_opt_i64("entity_id")?,
            operation_kind,
            outcome,
            dependency_count: row
                .get_opt_i64("dependency_count")?
                .map(|n| u64::try_from(n).unwrap_or(0)),
            error_message: row.get_opt_str("error_message")?.map(str::to_string),
            created_at: row.get_timestamp("created_at")?,
        })
    }
}

/// Filters shared by browsing, summaries and export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_kind: Option<OperationKind>,
    /// Trailing window in days; `None` means the whole log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_days: Option<u32>,
}

impl AuditFilter {
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_operation_kind(mut self, kind: OperationKind) -> Self {
        self.operation_kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = Some(days);
        self
    }

    /// Reject malformed windows and entity types.
    pub fn validate(&self) -> Result<(), AuditError> {
        validate_window(self.window_days)?;
        if let Some(entity_type) = &self.entity_type {
            if !is_well_formed(entity_type) {
                return Err(AuditError::InvalidFilter(format!(
                    "entity type '{entity_type}' is not a valid identifier"
                )));
            }
        }
        Ok(())
    }

    /// Build the WHERE clause and its parameters.
    fn where_clause(&self, now: DateTime<Utc>) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(entity_type) = &self.entity_type {
            params.push(Value::from(entity_type.as_str()));
            clauses.push(format!("entity_type = ?{}", params.len()));
        }
        if let Some(outcome) = self.outcome {
            params.push(Value::from(outcome.as_str()));
            clauses.push(format!("outcome = ?{}", params.len()));
        }
        if let Some(kind) = self.operation_kind {
            params.push(Value::from(kind.as_str()));
            clauses.push(format!("operation_kind = ?{}", params.len()));
        }
        if let Some(days) = self.window_days {
            params.push(Value::from(encode_timestamp(&window_start(now, days))));
            clauses.push(format!("created_at >= ?{}", params.len()));
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

/// Start of a trailing `days`-long window ending at `now`.
#[must_use]
pub fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

pub(crate) fn validate_window(window_days: Option<u32>) -> Result<(), AuditError> {
    match window_days {
        Some(0) => Err(AuditError::InvalidFilter(
            "window must be at least 1 day".to_string(),
        )),
        Some(days) if days > MAX_WINDOW_DAYS => Err(AuditError::InvalidFilter(format!(
            "window of {days} days exceeds the {MAX_WINDOW_DAYS}-day maximum"
        ))),
        _ => Ok(()),
    }
}

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 50 }
    }
}

impl Pagination {
    #[must_use]
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    fn validate(self) -> Result<(), AuditError> {
        if self.page == 0 {
            return Err(AuditError::InvalidFilter("page numbers start at 1".to_string()));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(AuditError::InvalidFilter(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        Ok(())
    }

    fn offset(self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

/// One page of audit records, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

/// Handle to the audit table.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn Store>,
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

impl AuditLog {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append one record and return its row id.
    pub fn append(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let outcome = self.store.execute(
            &format!(
                "INSERT INTO {AUDIT_TABLE} (entity_type, entity_id, operation_kind, outcome, \
                 dependency_count, error_message, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            &[
                Value::from(record.entity_type.clone()),
                Value::from(record.entity_id),
                Value::from(record.operation_kind.as_str()),
                Value::from(record.outcome.as_str()),
                Value::from(record.dependency_count.map(|n| i64::try_from(n).unwrap_or(i64::MAX))),
                Value::from(record.error_message.clone()),
                Value::from(encode_timestamp(&record.created_at)),
            ],
        )?;
        log::trace!(
            "Audit {} {} for {:?}/{:?}",
            record.operation_kind,
            record.outcome,
            record.entity_type,
            record.entity_id
        );
        Ok(outcome.insert_id)
    }

    /// Browse recent records, newest first.
    pub fn list_recent(
        &self,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> Result<AuditPage, AuditError> {
        filter.validate()?;
        pagination.validate()?;

        let (where_sql, mut params) = filter.where_clause(Utc::now());
        let total = self
            .store
            .count(&format!("SELECT COUNT(*) FROM {AUDIT_TABLE} {where_sql}"), &params)?;

        params.push(Value::Integer(i64::from(pagination.limit)));
        let limit_idx = params.len();
        params.push(Value::Integer(i64::try_from(pagination.offset()).unwrap_or(i64::MAX)));
        let offset_idx = params.len();

        let rows = self.store.query(
            &format!(
                "SELECT * FROM {AUDIT_TABLE} {where_sql} \
                 ORDER BY created_at DESC, id DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
            ),
            &params,
        )?;
        let records = rows
            .iter()
            .map(AuditRecord::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AuditPage {
            records,
            total,
            page: pagination.page,
            limit: pagination.limit,
            total_pages: total.div_ceil(u64::from(pagination.limit)),
        })
    }

    /// Every record matching `filter`, newest first, relative to `now`.
    pub fn records(
        &self,
        filter: &AuditFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        filter.validate()?;
        let (where_sql, params) = filter.where_clause(now);
        self.store
            .query(
                &format!(
                    "SELECT * FROM {AUDIT_TABLE} {where_sql} ORDER BY created_at DESC, id DESC"
                ),
                &params,
            )?
            .iter()
            .map(AuditRecord::from_row)
            .collect()
    }
}
