//! SQLite-backed store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};

use super::{ExecOutcome, Row, SchemaCatalog, Store, StoreError, StoreResult, TableSchema, Value};
use crate::logging::SQL_TARGET;

/// Default time a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Value::Text(format!("<{} bytes>", bytes.len())),
        }
    }
}

/// A single SQLite connection shared behind a mutex.
///
/// `rusqlite::Connection` is `Send` but not `Sync`; the mutex makes the store
/// shareable as `Arc<dyn Store>`. Uniqueness and upsert atomicity come from
/// SQLite itself, not from this lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database file.
    ///
    /// Parent directories are created as needed. The busy timeout bounds how
    /// long any statement waits for a lock before surfacing
    /// [`StoreError::Timeout`].
    pub fn open(path: &Path, busy_timeout: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        log::debug!("Opened store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file path, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a batch of SQL without parameters (fixtures, migrations).
    pub fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        log::trace!(target: SQL_TARGET, "batch: {sql}");
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for SqliteStore {
    fn query(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
        log::trace!(target: SQL_TARGET, "query: {sql} {params:?}");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
            .into();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(Value::from(row.get_ref(idx)?));
            }
            out.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> StoreResult<ExecOutcome> {
        log::trace!(target: SQL_TARGET, "execute: {sql} {params:?}");
        let conn = self.lock()?;
        let affected_rows = conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(ExecOutcome {
            affected_rows,
            insert_id: conn.last_insert_rowid(),
        })
    }

    fn catalog(&self) -> StoreResult<SchemaCatalog> {
        let tables = self.query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )?;

        let mut schemas = Vec::with_capacity(tables.len());
        for table in tables {
            let name = table.get_str("name")?.to_string();
            let columns = self.query(
                "SELECT name, pk FROM pragma_table_info(?1) ORDER BY cid",
                &[Value::from(name.as_str())],
            )?;
            let mut schema = TableSchema {
                name,
                columns: Default::default(),
                primary_key: None,
            };
            for column in columns {
                let column_name = column.get_str("name")?.to_string();
                if column.get_i64("pk")? == 1 {
                    schema.primary_key = Some(column_name.clone());
                }
                schema.columns.insert(column_name);
            }
            schemas.push(schema);
        }

        let catalog = SchemaCatalog::from_tables(schemas);
        log::debug!("Schema catalog built with {} tables", catalog.len());
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE equipment (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
                 CREATE TABLE service_orders (id INTEGER PRIMARY KEY, equipment_id INTEGER, notes TEXT);
                 INSERT INTO equipment (id, name) VALUES (42, 'Infusion pump');",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_query_binds_parameters() {
        let store = fixture();
        let rows = store
            .query(
                "SELECT id, name FROM equipment WHERE id = ?1",
                &[Value::Integer(42)],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("name").unwrap(), "Infusion pump");
    }

    #[test]
    fn test_execute_reports_affected_rows_and_insert_id() {
        let store = fixture();
        let outcome = store
            .execute(
                "INSERT INTO service_orders (equipment_id, notes) VALUES (?1, ?2)",
                &[Value::Integer(42), Value::Null],
            )
            .unwrap();
        assert_eq!(outcome.affected_rows, 1);
        assert_eq!(outcome.insert_id, 1);

        let n = store
            .count(
                "SELECT COUNT(*) FROM service_orders WHERE equipment_id = ?1",
                &[Value::Integer(42)],
            )
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_catalog_introspects_tables_and_keys() {
        let store = fixture();
        let catalog = store.catalog().unwrap();
        assert!(catalog.contains_table("equipment"));
        assert!(catalog.column("service_orders", "equipment_id").is_ok());
        assert_eq!(catalog.primary_key("equipment").unwrap().as_str(), "id");
    }

    #[test]
    fn test_missing_table_detected() {
        let store = fixture();
        let err = store.query("SELECT * FROM nope", &[]).unwrap_err();
        assert!(err.is_missing_table());
    }

    #[test]
    fn test_open_file_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("refguard.db");
        let store = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert!(path.exists());
    }

    #[test]
    fn test_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SqliteStore>();
    }
}
