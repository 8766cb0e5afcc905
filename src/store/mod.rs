//! Relational store collaborator.
//!
//! Every other component talks to the database through the [`Store`] trait:
//! a parameterized `query` returning rows and an `execute` returning the
//! affected-row count and last insert id. The trait is object-safe so the
//! engine shares one `Arc<dyn Store>` across all components.
//!
//! # Architecture
//!
//! * [`sqlite`]: `rusqlite`-backed implementation used by the CLI and tests.
//! * [`catalog`]: schema introspection and the identifier allow-list.
//! * [`schema`]: provisioning of the engine's own tables.
//!
//! # Identifiers
//!
//! Table and column names can never be bound as parameters. The only names
//! that reach a SQL string are those returned by [`SchemaCatalog`] lookups,
//! which reject anything that is not a known, well-formed identifier.

pub mod catalog;
pub mod schema;
pub mod sqlite;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use catalog::{Ident, SchemaCatalog, TableSchema};
pub use sqlite::SqliteStore;

/// Fixed-width timestamp layout; lexical order equals chronological order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Errors raised by the store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite call failed.
    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),

    /// The database stayed locked for longer than the configured busy timeout.
    #[error("database busy: {0}")]
    Timeout(String),

    /// A table or column name was not in the schema allow-list.
    #[error("rejected {kind} identifier '{name}': not a known schema identifier")]
    UnknownIdentifier {
        /// Either "table" or "column".
        kind: &'static str,
        /// The rejected name.
        name: String,
    },

    /// A result row did not carry the expected column.
    #[error("missing column in result row: {0}")]
    MissingColumn(String),

    /// A column held a value of the wrong type.
    #[error("column '{column}' is not {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
    },

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// Another thread panicked while holding the connection.
    #[error("store connection lock poisoned")]
    Poisoned,

    /// Filesystem error while opening the database.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when the error reports a table that does not exist.
    #[must_use]
    pub fn is_missing_table(&self) -> bool {
        matches!(self, Self::Sqlite(e) if e.to_string().contains("no such table"))
    }

    /// True when a uniqueness or other constraint rejected the write.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(e)
                if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::Timeout(err.to_string())
            }
            _ => Self::Sqlite(err),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A single SQL value, either bound as a parameter or read from a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Outcome of an `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Number of rows inserted, updated or deleted.
    pub affected_rows: usize,
    /// Row id of the most recent insert on this connection.
    pub insert_id: i64,
}

/// One result row: column names shared across the result set plus values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from shared column names and its values.
    #[must_use]
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Column names in select order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value of the named column, if present.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    fn require(&self, column: &str) -> StoreResult<&Value> {
        self.get(column)
            .ok_or_else(|| StoreError::MissingColumn(column.to_string()))
    }

    /// Read a non-null integer column.
    pub fn get_i64(&self, column: &str) -> StoreResult<i64> {
        match self.require(column)? {
            Value::Integer(v) => Ok(*v),
            _ => Err(StoreError::TypeMismatch {
                column: column.to_string(),
                expected: "an integer",
            }),
        }
    }

    /// Read a nullable integer column.
    pub fn get_opt_i64(&self, column: &str) -> StoreResult<Option<i64>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            _ => self.get_i64(column).map(Some),
        }
    }

    /// Read an integer column as a boolean flag.
    pub fn get_bool(&self, column: &str) -> StoreResult<bool> {
        self.get_i64(column).map(|v| v != 0)
    }

    /// Read a non-null text column.
    pub fn get_str(&self, column: &str) -> StoreResult<&str> {
        match self.require(column)? {
            Value::Text(v) => Ok(v.as_str()),
            _ => Err(StoreError::TypeMismatch {
                column: column.to_string(),
                expected: "text",
            }),
        }
    }

    /// Read a nullable text column.
    pub fn get_opt_str(&self, column: &str) -> StoreResult<Option<&str>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            _ => self.get_str(column).map(Some),
        }
    }

    /// Read a timestamp column written by [`encode_timestamp`].
    pub fn get_timestamp(&self, column: &str) -> StoreResult<DateTime<Utc>> {
        decode_timestamp(self.get_str(column)?)
    }

    /// Convert the row into a name-to-value map.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.columns.iter().cloned().zip(self.values).collect()
    }
}

/// The relational store capability consumed by the engine.
pub trait Store: Send + Sync {
    /// Run a parameterized statement and collect every result row.
    fn query(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>>;

    /// Run a parameterized statement that returns no rows.
    fn execute(&self, sql: &str, params: &[Value]) -> StoreResult<ExecOutcome>;

    /// Introspect the current schema into an identifier allow-list.
    fn catalog(&self) -> StoreResult<SchemaCatalog>;

    /// Run a query and return its first row, if any.
    fn query_optional(&self, sql: &str, params: &[Value]) -> StoreResult<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Run a single-column `COUNT(*)`-style query.
    fn count(&self, sql: &str, params: &[Value]) -> StoreResult<u64> {
        let row = self
            .query_optional(sql, params)?
            .ok_or_else(|| StoreError::MissingColumn("count".to_string()))?;
        match row.values.first() {
            Some(Value::Integer(n)) => Ok(u64::try_from(*n).unwrap_or(0)),
            Some(Value::Null) => Ok(0),
            _ => Err(StoreError::TypeMismatch {
                column: row.columns.first().cloned().unwrap_or_default(),
                expected: "an integer count",
            }),
        }
    }
}

/// Render a timestamp in the store's fixed-width layout.
#[must_use]
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp written by [`encode_timestamp`].
pub fn decode_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| StoreError::InvalidTimestamp(raw.to_string()))
}
