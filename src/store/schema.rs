//! Engine-owned tables.
//!
//! Provisioning is idempotent: every statement is `IF NOT EXISTS`, so it is
//! safe to run at each startup.

use super::{Store, StoreResult, Value};

/// Relationship definitions read by the registry.
pub const RELATIONSHIPS_TABLE: &str = "dependency_relationships";
/// Memoized dependency summaries.
pub const CACHE_TABLE: &str = "dependency_cache";
/// Append-only audit trail.
pub const AUDIT_TABLE: &str = "dependency_audit_log";

/// Tables that dynamic SQL may never target.
pub const ENGINE_TABLES: &[&str] = &[RELATIONSHIPS_TABLE, CACHE_TABLE, AUDIT_TABLE];

const PROVISION_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS dependency_relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_entity_type TEXT NOT NULL,
        child_entity_type TEXT NOT NULL,
        foreign_key_column TEXT NOT NULL,
        relationship_kind TEXT NOT NULL DEFAULT 'one_to_many',
        cascade_allowed INTEGER NOT NULL DEFAULT 0,
        active INTEGER NOT NULL DEFAULT 1,
        description TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_dependency_relationships_active_edge
        ON dependency_relationships (parent_entity_type, child_entity_type, foreign_key_column)
        WHERE active = 1",
    "CREATE TABLE IF NOT EXISTS dependency_cache (
        entity_type TEXT NOT NULL,
        entity_id INTEGER NOT NULL,
        dependency_count INTEGER NOT NULL,
        serialized_summary TEXT NOT NULL,
        computed_at TEXT NOT NULL,
        PRIMARY KEY (entity_type, entity_id)
    )",
    "CREATE TABLE IF NOT EXISTS dependency_audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT,
        entity_id INTEGER,
        operation_kind TEXT NOT NULL,
        outcome TEXT NOT NULL,
        dependency_count INTEGER,
        error_message TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_dependency_audit_log_created_at
        ON dependency_audit_log (created_at)",
];

/// Create the engine tables and indexes if they are missing.
pub fn provision(store: &dyn Store) -> StoreResult<()> {
    for statement in PROVISION_STATEMENTS {
        store.execute(statement, &[])?;
    }
    log::debug!("Engine tables provisioned");
    Ok(())
}

/// Whether `table` exists in the store.
pub fn table_exists(store: &dyn Store, table: &str) -> StoreResult<bool> {
    let n = store.count(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        &[Value::from(table)],
    )?;
    Ok(n > 0)
}
