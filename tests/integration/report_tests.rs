use refguard::audit::{AuditFilter, AuditRecord, OperationKind, Outcome};
use refguard::error::EngineError;
use refguard::report::EntityOverview;
use refguard::resolver::ResolveOptions;

use super::fixtures::Fixture;

#[test]
fn test_summary_over_empty_log() {
    let fixture = Fixture::new();
    let summary = fixture.engine.summary(7).unwrap();
    assert_eq!(summary.window_days, 7);
    assert_eq!(summary.total_validations, 0);
    assert_eq!(summary.successful, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.warnings, 0);
    assert_eq!(summary.entities_with_dependencies, 0);
    assert_eq!(summary.average_dependencies, 0.0);
}

#[test]
fn test_summary_reflects_checks() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    let options = ResolveOptions::default();
    fixture.engine.resolve("equipment", 42, &options).unwrap();
    fixture.engine.resolve("equipment", 42, &options).unwrap();
    fixture.engine.view("equipment", 41, &options).unwrap();
    fixture.engine.resolve("equipment", 43, &options).unwrap();
    fixture.engine.resolve("equipment", 1000, &options).unwrap_err();
    fixture.engine.refresh_all().unwrap();

    let summary = fixture.engine.summary(7).unwrap();
    assert_eq!(summary.total_validations, 5);
    assert_eq!(summary.successful, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.entities_with_dependencies, 2);
    // (3 + 3 + 1) / 3 records with dependents
    assert!((summary.average_dependencies - 7.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_entities_overview_counts_references() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    let events = fixture.register("calendar_events", true);

    let overview = fixture.engine.entities_overview().unwrap();
    assert_eq!(
        overview,
        vec![EntityOverview {
            entity_type: "equipment".to_string(),
            total_relationships: 2,
            active_relationships: 2,
            relationships_with_dependencies: 2,
        }]
    );

    fixture.engine.registry().set_active(events, false).unwrap();
    let overview = fixture.engine.entities_overview().unwrap();
    assert_eq!(overview[0].active_relationships, 1);
    assert_eq!(overview[0].relationships_with_dependencies, 1);
}

#[test]
fn test_entities_overview_without_registry_table() {
    let fixture = Fixture::new();
    fixture
        .store
        .execute_batch("DROP TABLE dependency_relationships")
        .unwrap();
    assert!(fixture.engine.entities_overview().unwrap().is_empty());
}

#[test]
fn test_csv_export_doubles_embedded_quotes() {
    let fixture = Fixture::new();
    fixture
        .engine
        .audit()
        .append(
            &AuditRecord::new(OperationKind::DependencyCheck, Outcome::Failed)
                .for_entity("equipment", 42)
                .with_error("relationship \"service_orders\" could not be counted"),
        )
        .unwrap();

    let export = fixture
        .engine
        .export(7, &AuditFilter::default(), "csv")
        .unwrap();
    assert_eq!(export.content_type, "text/csv");
    assert_eq!(export.total_records, 1);

    let text = String::from_utf8(export.bytes).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("\"id\",\"created_at\""));
    assert!(lines[1].contains("\"FAILED\""));
    assert!(lines[1].contains("\"relationship \"\"service_orders\"\" could not be counted\""));

    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let row = reader.records().next().unwrap().unwrap();
    assert_eq!(&row[7], "relationship \"service_orders\" could not be counted");
}

#[test]
fn test_json_export_document() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    fixture
        .engine
        .resolve("equipment", 42, &ResolveOptions::default())
        .unwrap();
    fixture
        .engine
        .resolve("equipment", 41, &ResolveOptions::default())
        .unwrap();

    let filter = AuditFilter::default().with_entity_type("equipment");
    let export = fixture.engine.export(7, &filter, "json").unwrap();
    assert_eq!(export.content_type, "application/json");
    assert!(export.file_name.ends_with(".json"));

    let path = fixture.dir.path().join(&export.file_name);
    std::fs::write(&path, &export.bytes).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();

    assert!(value["exportDate"].is_string());
    assert_eq!(value["filters"]["entityType"], "equipment");
    assert_eq!(value["filters"]["windowDays"], 7);
    assert_eq!(value["totalRecords"], 2);
    assert_eq!(value["records"].as_array().unwrap().len(), 2);
    assert_eq!(value["records"][0]["entityId"], 41);
}

#[test]
fn test_unsupported_export_format() {
    let fixture = Fixture::new();
    let err = fixture
        .engine
        .export(7, &AuditFilter::default(), "xml")
        .unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    assert_eq!(err.kind(), "UnsupportedFormat");
}

#[test]
fn test_export_rejects_bad_window() {
    let fixture = Fixture::new();
    let err = fixture
        .engine
        .export(0, &AuditFilter::default(), "csv")
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFilter(_)));
}
