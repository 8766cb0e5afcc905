//! Shared fixtures: a small maintenance schema behind a file-backed store.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use refguard::audit::{AuditFilter, AuditRecord};
use refguard::engine::Engine;
use refguard::registry::NewRelationship;
use refguard::store::SqliteStore;
use tempfile::TempDir;

/// equipment 41 has 1 service order, 42 has 3, 43 has none but one calendar event.
pub const SCHEMA: &str = "
    CREATE TABLE equipment (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE service_orders (id INTEGER PRIMARY KEY, equipment_id INTEGER, title TEXT);
    CREATE TABLE calendar_events (id INTEGER PRIMARY KEY, equipment_id INTEGER, starts_at TEXT);
    INSERT INTO equipment (id, name) VALUES (41, 'infusion pump'), (42, 'ventilator'), (43, 'monitor');
    INSERT INTO service_orders (equipment_id, title) VALUES
        (42, 'calibration'), (42, 'filter swap'), (42, 'inspection'), (41, 'battery');
    INSERT INTO calendar_events (equipment_id, starts_at) VALUES (43, '2024-01-01'), (NULL, '2024-02-01');
";

pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub engine: Engine,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("refguard.db");
        let store = Arc::new(SqliteStore::open(&path, std::time::Duration::from_secs(5)).unwrap());
        store.execute_batch(SCHEMA).unwrap();
        let engine = Engine::with_defaults(store.clone()).unwrap();
        Self { dir, store, engine }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("refguard.db")
    }

    pub fn register(&self, child: &str, cascade: bool) -> i64 {
        self.engine
            .registry()
            .register(
                &NewRelationship::new("equipment", child, "equipment_id").with_cascade(cascade),
            )
            .unwrap()
    }

    /// Every audit record, newest first.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.engine
            .audit()
            .records(&AuditFilter::default(), Utc::now())
            .unwrap()
    }
}
