use chrono::{Duration, Utc};
use refguard::audit::{AuditFilter, AuditRecord, OperationKind, Outcome, Pagination};
use refguard::error::EngineError;
use refguard::resolver::ResolveOptions;

use super::fixtures::Fixture;

#[test]
fn test_list_recent_pages_engine_activity() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    for id in [41, 42, 43] {
        fixture
            .engine
            .resolve("equipment", id, &ResolveOptions::default())
            .unwrap();
    }
    fixture
        .engine
        .view("equipment", 42, &ResolveOptions::default())
        .unwrap();

    let page = fixture
        .engine
        .list_recent(&AuditFilter::default(), Pagination::new(1, 3))
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.records.len(), 3);
    assert_eq!(page.records[0].operation_kind, OperationKind::DependencyView);

    let checks = fixture
        .engine
        .list_recent(
            &AuditFilter::default().with_operation_kind(OperationKind::DependencyCheck),
            Pagination::default(),
        )
        .unwrap();
    assert_eq!(checks.total, 3);
    let ids: Vec<_> = checks.records.iter().filter_map(|r| r.entity_id).collect();
    assert_eq!(ids, vec![43, 42, 41]);
}

#[test]
fn test_list_recent_window_excludes_old_records() {
    let fixture = Fixture::new();
    let audit = fixture.engine.audit();
    audit
        .append(
            &AuditRecord::new(OperationKind::DependencyCheck, Outcome::Success)
                .for_entity("equipment", 1)
                .at(Utc::now() - Duration::days(10)),
        )
        .unwrap();
    audit
        .append(
            &AuditRecord::new(OperationKind::DependencyCheck, Outcome::Success)
                .for_entity("equipment", 2),
        )
        .unwrap();

    let page = fixture
        .engine
        .list_recent(&AuditFilter::default().with_window_days(7), Pagination::default())
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].entity_id, Some(2));
}

#[test]
fn test_list_recent_beyond_last_page_is_empty() {
    let fixture = Fixture::new();
    fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap();
    let page = fixture
        .engine
        .list_recent(&AuditFilter::default(), Pagination::new(5, 10))
        .unwrap();
    assert_eq!(page.total, 1);
    assert!(page.records.is_empty());
}

#[test]
fn test_invalid_filters_surface_as_invalid_filter() {
    let fixture = Fixture::new();
    let err = fixture
        .engine
        .list_recent(&AuditFilter::default().with_window_days(0), Pagination::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFilter(_)));

    let err = fixture
        .engine
        .list_recent(&AuditFilter::default(), Pagination::new(1, 501))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFilter(_)));

    let err = fixture
        .engine
        .list_recent(
            &AuditFilter::default().with_entity_type("equipment' OR '1'='1"),
            Pagination::default(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidFilter");
}

#[test]
fn test_records_serialize_camel_case() {
    let fixture = Fixture::new();
    fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap();
    let record = &fixture.audit_records()[0];
    let value = serde_json::to_value(record).unwrap();
    assert_eq!(value["entityType"], "equipment");
    assert_eq!(value["operationKind"], "dependency_check");
    assert_eq!(value["outcome"], "SUCCESS");
    assert_eq!(value["dependencyCount"], 0);
    assert!(value["createdAt"].is_string());
}
