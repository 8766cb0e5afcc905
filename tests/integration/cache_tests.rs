use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use chrono::{Duration, SubsecRound, Utc};
use refguard::audit::{AuditFilter, OperationKind, Outcome};
use refguard::cache::{CacheEntry, DependencyCache};
use refguard::config::Config;
use refguard::engine::Engine;
use refguard::error::EngineError;
use refguard::registry::NewRelationship;
use refguard::resolver::{DependencySummary, ResolveOptions};

use super::fixtures::Fixture;

fn refresh_records(fixture: &Fixture) -> Vec<refguard::audit::AuditRecord> {
    fixture
        .engine
        .audit()
        .records(
            &AuditFilter::default().with_operation_kind(OperationKind::CacheRefresh),
            Utc::now(),
        )
        .unwrap()
}

#[test]
fn test_refresh_matches_direct_resolution() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    fixture.register("calendar_events", true);

    let report = fixture.engine.refresh_all().unwrap();
    assert_eq!(report.refreshed, 3);
    assert!(report.is_complete());

    for id in [41, 42, 43] {
        let entry = fixture.engine.cache_get("equipment", id).unwrap().unwrap();
        let direct = fixture
            .engine
            .resolve("equipment", id, &ResolveOptions::default())
            .unwrap();
        assert_eq!(entry.dependency_count, direct.total_dependent_records);
        assert_eq!(entry.summary().unwrap(), direct);
    }
}

#[test]
fn test_refresh_writes_one_summary_record() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);

    let start = Utc::now().trunc_subsecs(6);
    fixture.engine.refresh_all().unwrap();

    // Per-entity computations are not audited individually.
    let all = fixture.audit_records();
    assert_eq!(all.len(), 1);
    assert!(all[0].created_at >= start);
    assert_eq!(all[0].operation_kind, OperationKind::CacheRefresh);
    assert_eq!(all[0].outcome, Outcome::Success);
    assert_eq!(all[0].dependency_count, Some(3));
    assert_eq!(all[0].entity_type, None);
}

#[test]
fn test_oversized_staleness_window_is_clamped() {
    let fixture = Fixture::new();
    let config = Config {
        staleness_window_secs: 100_000_000_000_000,
        ..Config::default()
    };
    assert!(config.validate().is_err());

    let engine = Engine::new(fixture.store.clone(), &config).unwrap();
    engine
        .registry()
        .register(&NewRelationship::new("equipment", "service_orders", "equipment_id"))
        .unwrap();

    let report = engine.refresh_all().unwrap();
    assert_eq!(report.refreshed, 3);
    assert_eq!(report.evicted, 0);
    let stats = engine.cache_stats().unwrap();
    assert_eq!((stats.total, stats.stale), (3, 0));
    assert_eq!(engine.evict_stale().unwrap(), 0);

    let records = refresh_records(&fixture);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Success);
}

#[test]
fn test_refresh_twice_keeps_one_entry_per_key() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);

    fixture.engine.refresh_all().unwrap();
    let first = fixture.engine.cache_get("equipment", 42).unwrap().unwrap();
    fixture.engine.refresh_all().unwrap();
    let second = fixture.engine.cache_get("equipment", 42).unwrap().unwrap();

    assert_eq!(fixture.engine.cache_stats().unwrap().total, 3);
    assert!(second.computed_at >= first.computed_at);
    assert_eq!(refresh_records(&fixture).len(), 2);
}

#[test]
fn test_refresh_evicts_stale_and_keeps_untouched_entries() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    let cache = DependencyCache::new(fixture.store.clone());

    let stale = CacheEntry::from_summary(
        &DependencySummary::new("equipment", 999, Vec::new()),
        Utc::now().trunc_subsecs(6) - Duration::hours(2),
    )
    .unwrap();
    let untouched = CacheEntry::from_summary(
        &DependencySummary::new("departments", 5, Vec::new()),
        Utc::now().trunc_subsecs(6),
    )
    .unwrap();
    cache.upsert(&stale).unwrap();
    cache.upsert(&untouched).unwrap();

    let report = fixture.engine.refresh_all().unwrap();
    assert_eq!(report.evicted, 1);
    assert!(fixture.engine.cache_get("equipment", 999).unwrap().is_none());
    assert_eq!(
        fixture.engine.cache_get("departments", 5).unwrap(),
        Some(untouched)
    );
}

#[test]
fn test_stale_entries_are_still_readable() {
    let fixture = Fixture::new();
    let cache = DependencyCache::new(fixture.store.clone());
    let old = CacheEntry::from_summary(
        &DependencySummary::new("equipment", 42, Vec::new()),
        Utc::now().trunc_subsecs(6) - Duration::days(3),
    )
    .unwrap();
    cache.upsert(&old).unwrap();

    assert_eq!(fixture.engine.cache_get("equipment", 42).unwrap(), Some(old));
    let stats = fixture.engine.cache_stats().unwrap();
    assert_eq!((stats.total, stats.fresh, stats.stale), (1, 0, 1));

    assert_eq!(fixture.engine.evict_stale().unwrap(), 1);
    assert!(fixture.engine.cache_get("equipment", 42).unwrap().is_none());
}

#[test]
fn test_unknown_parent_type_is_a_partial_failure() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);
    fixture
        .engine
        .registry()
        .register(&NewRelationship::new("ghost_assets", "service_orders", "equipment_id"))
        .unwrap();

    let report = fixture.engine.refresh_all().unwrap();
    assert_eq!(report.refreshed, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entity_type, "ghost_assets");
    assert_eq!(report.failures[0].entity_id, None);

    let records = refresh_records(&fixture);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Warning);
    assert_eq!(records[0].dependency_count, Some(3));
    assert_eq!(
        records[0].error_message.as_deref(),
        Some("3 entities refreshed; 1 entities failed to refresh")
    );
}

#[test]
fn test_partial_refresh_can_be_audited_as_success() {
    let fixture = Fixture::new();
    let config = Config {
        partial_refresh_warns: false,
        ..Config::default()
    };
    let engine = Engine::new(fixture.store.clone(), &config).unwrap();
    for parent in ["equipment", "ghost_assets"] {
        engine
            .registry()
            .register(&NewRelationship::new(parent, "service_orders", "equipment_id"))
            .unwrap();
    }

    let report = engine.refresh_all().unwrap();
    assert!(!report.is_complete());

    let records = refresh_records(&fixture);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Success);
    assert_eq!(records[0].dependency_count, Some(3));
    assert!(records[0]
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("1 entities failed")));
}

#[test]
fn test_refresh_without_registry_fails_and_is_audited() {
    let fixture = Fixture::new();
    fixture
        .store
        .execute_batch("DROP TABLE dependency_relationships")
        .unwrap();

    let err = fixture.engine.refresh_all().unwrap_err();
    assert!(matches!(err, EngineError::RegistryUnavailable(_)));

    let records = refresh_records(&fixture);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Failed);
    assert!(!records[0].error_message.as_deref().unwrap_or("").is_empty());
}

#[test]
fn test_shutdown_flag_interrupts_refresh() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);

    let report = fixture
        .engine
        .refresher()
        .with_shutdown_flag(Arc::new(AtomicBool::new(true)))
        .refresh_all()
        .unwrap();
    assert!(report.interrupted);
    assert_eq!(report.refreshed, 0);
    assert!(fixture.engine.cache_get("equipment", 42).unwrap().is_none());

    let records = refresh_records(&fixture);
    assert_eq!(records[0].outcome, Outcome::Warning);
}

#[test]
fn test_concurrent_upserts_do_not_duplicate() {
    let fixture = Fixture::new();
    let cache = DependencyCache::new(fixture.store.clone());

    thread::scope(|scope| {
        for worker in 0..8u64 {
            let cache = cache.clone();
            scope.spawn(move || {
                for round in 0..20u64 {
                    let mut entry = CacheEntry::from_summary(
                        &DependencySummary::new("equipment", 42, Vec::new()),
                        Utc::now(),
                    )
                    .unwrap();
                    entry.dependency_count = worker * 100 + round;
                    cache.upsert(&entry).unwrap();
                }
            });
        }
    });

    assert_eq!(cache.len().unwrap(), 1);
    assert!(cache.get("equipment", 42).unwrap().is_some());
}

#[test]
fn test_overlapping_refresh_runs() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);

    thread::scope(|scope| {
        for _ in 0..3 {
            let engine = fixture.engine.clone();
            scope.spawn(move || engine.refresh_all().unwrap());
        }
    });

    assert_eq!(fixture.engine.cache_stats().unwrap().total, 3);
    assert_eq!(refresh_records(&fixture).len(), 3);
}
