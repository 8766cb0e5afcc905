use clap::Parser;
use refguard::cli::Cli;
use refguard::error::{EngineError, ExitCode, StructuredError};
use refguard::run_app;

use super::fixtures::Fixture;

fn run(fixture: &Fixture, args: &[&str]) -> anyhow::Result<ExitCode> {
    let db = fixture.db_path();
    let mut argv = vec!["refguard", "-q", "--database", db.to_str().unwrap()];
    argv.extend_from_slice(args);
    run_app(Cli::try_parse_from(argv).unwrap())
}

#[test]
fn test_init_and_check_exit_codes() {
    let fixture = Fixture::new();
    assert_eq!(run(&fixture, &["init"]).unwrap(), ExitCode::Success);

    assert_eq!(
        run(
            &fixture,
            &["relationship", "add", "equipment", "service_orders", "equipment_id"],
        )
        .unwrap(),
        ExitCode::Success
    );
    assert_eq!(run(&fixture, &["check", "equipment", "42"]).unwrap(), ExitCode::Blocked);
    assert_eq!(run(&fixture, &["check", "equipment", "43"]).unwrap(), ExitCode::Success);
    // Viewing never blocks.
    assert_eq!(
        run(&fixture, &["view", "equipment", "42", "--samples", "--output", "json"]).unwrap(),
        ExitCode::Success
    );
    assert_eq!(fixture.audit_records().len(), 3);
}

#[test]
fn test_refresh_partial_success_exit_code() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    assert_eq!(run(&fixture, &["refresh", "--no-progress"]).unwrap(), ExitCode::Success);

    run(
        &fixture,
        &["relationship", "add", "ghost_assets", "service_orders", "equipment_id"],
    )
    .unwrap();
    assert_eq!(
        run(&fixture, &["refresh", "--no-progress"]).unwrap(),
        ExitCode::PartialSuccess
    );
    assert!(fixture.engine.cache_get("equipment", 42).unwrap().is_some());
}

#[test]
fn test_export_to_file() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    run(&fixture, &["check", "equipment", "42"]).unwrap();

    let out = fixture.dir.path().join("audit.csv");
    let code = run(
        &fixture,
        &["export", "--days", "7", "--format", "csv", "--out", out.to_str().unwrap()],
    )
    .unwrap();
    assert_eq!(code, ExitCode::Success);
    let content = std::fs::read_to_string(&out).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("\"dependency_check\""));
}

#[test]
fn test_unsupported_export_format_is_structured() {
    let fixture = Fixture::new();
    let err = run(&fixture, &["export", "--format", "xml"]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::UnsupportedFormat(_))
    ));

    let structured = StructuredError::new(&err, ExitCode::GeneralError);
    assert_eq!(structured.code, "RG001");
    assert_eq!(structured.kind, Some("UnsupportedFormat"));
}

#[test]
fn test_missing_entity_is_an_error() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    let err = run(&fixture, &["check", "equipment", "404"]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::EntityNotFound { entity_id: 404, .. })
    ));
}

#[test]
fn test_reporting_commands_succeed() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    run(&fixture, &["check", "equipment", "41"]).unwrap();

    for args in [
        &["summary", "--days", "7"][..],
        &["summary", "--output", "json"][..],
        &["overview"][..],
        &["audit", "--outcome", "success", "--kind", "check"][..],
        &["cache", "stats"][..],
        &["cache", "get", "equipment", "41"][..],
        &["cache", "evict"][..],
        &["relationship", "list", "--all"][..],
    ] {
        assert_eq!(run(&fixture, args).unwrap(), ExitCode::Success, "{args:?}");
    }
}
