use chrono::{SubsecRound, Utc};
use refguard::audit::{OperationKind, Outcome};
use refguard::error::EngineError;
use refguard::resolver::ResolveOptions;
use refguard::store::{StoreError, Value};

use super::fixtures::Fixture;

#[test]
fn test_blocking_dependents_prevent_delete() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);

    let summary = fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap();

    assert_eq!(summary.total_dependent_records, 3);
    assert!(!summary.deletable);
    assert_eq!(summary.findings.len(), 1);
    assert_eq!(summary.findings[0].match_count, 3);
    assert_eq!(summary.findings[0].child_entity_type, "service_orders");
    assert!(summary.findings[0].samples.is_empty());
}

#[test]
fn test_cascade_relationship_does_not_block() {
    let fixture = Fixture::new();
    let id = fixture.register("service_orders", false);
    fixture.engine.registry().set_cascade_allowed(id, true).unwrap();

    let summary = fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap();
    assert_eq!(summary.total_dependent_records, 3);
    assert!(summary.deletable);
}

#[test]
fn test_no_relationships_is_deletable() {
    let fixture = Fixture::new();
    let summary = fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap();
    assert!(summary.deletable);
    assert_eq!(summary.total_dependent_records, 0);
    assert!(summary.findings.is_empty());
}

#[test]
fn test_zero_match_relationships_are_omitted() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    fixture.register("calendar_events", false);

    let summary = fixture
        .engine
        .resolve("equipment", 43, &ResolveOptions::default())
        .unwrap();
    assert_eq!(summary.findings.len(), 1);
    assert_eq!(summary.findings[0].child_entity_type, "calendar_events");
    assert_eq!(summary.total_dependent_records, 1);
    assert!(!summary.deletable);
}

#[test]
fn test_inactive_relationship_is_ignored() {
    let fixture = Fixture::new();
    let id = fixture.register("service_orders", false);
    fixture.engine.registry().set_active(id, false).unwrap();

    let summary = fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap();
    assert!(summary.deletable);
    assert_eq!(summary.total_dependent_records, 0);
}

#[test]
fn test_samples_are_paged_by_child_key() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);

    let first = fixture
        .engine
        .view("equipment", 42, &ResolveOptions::default().with_samples(2, 0))
        .unwrap();
    let samples = &first.findings[0].samples;
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].get("title"), Some(&Value::Text("calibration".to_string())));
    assert_eq!(samples[1].get("title"), Some(&Value::Text("filter swap".to_string())));
    // Count is independent of the sample page.
    assert_eq!(first.findings[0].match_count, 3);

    let second = fixture
        .engine
        .view("equipment", 42, &ResolveOptions::default().with_samples(2, 1))
        .unwrap();
    assert_eq!(second.findings[0].samples.len(), 1);
    assert_eq!(
        second.findings[0].samples[0].get("title"),
        Some(&Value::Text("inspection".to_string()))
    );
}

#[test]
fn test_sample_limit_is_capped() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);

    let summary = fixture
        .engine
        .view("equipment", 42, &ResolveOptions::default().with_samples(500, 0))
        .unwrap();
    assert_eq!(summary.findings[0].samples.len(), 3);
    assert!(fixture.engine.sample_cap() < 500);
}

#[test]
fn test_resolve_is_idempotent() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    fixture.register("calendar_events", true);

    let options = ResolveOptions::default().with_samples(5, 0);
    let a = fixture.engine.resolve("equipment", 42, &options).unwrap();
    let b = fixture.engine.resolve("equipment", 42, &options).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_each_call_writes_one_audit_record() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    let start = Utc::now().trunc_subsecs(6);

    fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap();
    fixture
        .engine
        .view("equipment", 41, &ResolveOptions::default())
        .unwrap();

    let records = fixture.audit_records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.created_at >= start));

    let view = &records[0];
    assert_eq!(view.operation_kind, OperationKind::DependencyView);
    assert_eq!(view.entity_id, Some(41));
    assert_eq!(view.dependency_count, Some(1));

    let check = &records[1];
    assert_eq!(check.operation_kind, OperationKind::DependencyCheck);
    assert_eq!(check.outcome, Outcome::Success);
    assert_eq!(check.entity_type.as_deref(), Some("equipment"));
    assert_eq!(check.dependency_count, Some(3));
}

#[test]
fn test_missing_entity_is_audited_as_failure() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);

    let err = fixture
        .engine
        .resolve("equipment", 999, &ResolveOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::EntityNotFound { ref entity_type, entity_id: 999 }
            if entity_type == "equipment"
    ));

    let records = fixture.audit_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Failed);
    assert!(records[0].error_message.as_deref().unwrap().contains("not found"));
}

#[test]
fn test_unknown_entity_type_is_rejected() {
    let fixture = Fixture::new();

    let err = fixture
        .engine
        .resolve("equipment; DROP TABLE equipment", 1, &ResolveOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::UnknownIdentifier { .. })
    ));

    let err = fixture
        .engine
        .resolve("dependency_audit_log", 1, &ResolveOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::UnknownIdentifier { .. })
    ));

    let records = fixture.audit_records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.outcome == Outcome::Failed));
}

#[test]
fn test_unknown_child_column_fails_whole_resolution() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    fixture
        .engine
        .registry()
        .register(&refguard::registry::NewRelationship::new(
            "equipment",
            "calendar_events",
            "device_id",
        ))
        .unwrap();

    let err = fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::UnknownIdentifier { .. })
    ));
    assert_eq!(fixture.audit_records()[0].outcome, Outcome::Failed);
}

#[test]
fn test_registry_unavailable() {
    let fixture = Fixture::new();
    fixture
        .store
        .execute_batch("DROP TABLE dependency_relationships")
        .unwrap();

    let err = fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::RegistryUnavailable(_)));
    assert_eq!(err.kind(), "RegistryUnavailable");

    let records = fixture.audit_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Failed);
}
