//! Schema catalog and identifier allow-list.
//!
//! The catalog is built once by introspecting the store at engine startup.
//! Registry rows name tables and columns; before any of those names is placed
//! into a SQL string it must pass through [`SchemaCatalog::table`] or
//! [`SchemaCatalog::column`], which check both the identifier's shape and its
//! presence in the introspected schema.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use super::schema::ENGINE_TABLES;
use super::{StoreError, StoreResult};

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid regex"))
}

/// True when `name` has the shape of a plain SQL identifier.
#[must_use]
pub fn is_well_formed(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

/// A validated identifier, rendered double-quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(String);

impl Ident {
    /// The bare identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SQLite's implicit row id, used for tables without a declared key.
    fn rowid() -> Self {
        Self("rowid".to_string())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.replace('"', "\"\""))
    }
}

/// Introspected shape of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: BTreeSet<String>,
    /// First declared primary-key column, if any.
    pub primary_key: Option<String>,
}

/// The set of tables and columns that may appear in dynamic SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaCatalog {
    /// Build a catalog from introspected tables.
    ///
    /// Engine-owned tables and malformed names are left out, so registry rows
    /// can never point the resolver at them.
    #[must_use]
    pub fn from_tables(tables: impl IntoIterator<Item = TableSchema>) -> Self {
        let tables = tables
            .into_iter()
            .filter(|t| is_well_formed(&t.name) && !ENGINE_TABLES.contains(&t.name.as_str()))
            .map(|mut t| {
                t.columns.retain(|c| is_well_formed(c));
                (t.name.clone(), t)
            })
            .collect();
        Self { tables }
    }

    /// Number of allowed tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True when no table is allowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Whether `table` is in the allow-list.
    #[must_use]
    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Validate a table name.
    pub fn table(&self, name: &str) -> StoreResult<Ident> {
        if is_well_formed(name) && self.tables.contains_key(name) {
            Ok(Ident(name.to_string()))
        } else {
            Err(StoreError::UnknownIdentifier {
                kind: "table",
                name: name.to_string(),
            })
        }
    }

    /// Validate a column name on an allowed table.
    pub fn column(&self, table: &str, name: &str) -> StoreResult<Ident> {
        let schema = self
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownIdentifier {
                kind: "table",
                name: table.to_string(),
            })?;
        if is_well_formed(name) && schema.columns.contains(name) {
            Ok(Ident(name.to_string()))
        } else {
            Err(StoreError::UnknownIdentifier {
                kind: "column",
                name: format!("{table}.{name}"),
            })
        }
    }

    /// Primary-key column of an allowed table, falling back to `rowid`.
    pub fn primary_key(&self, table: &str) -> StoreResult<Ident> {
        let schema = self
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownIdentifier {
                kind: "table",
                name: table.to_string(),
            })?;
        match &schema.primary_key {
            Some(pk) if is_well_formed(pk) => Ok(Ident(pk.clone())),
            _ => Ok(Ident::rowid()),
        }
    }
}
