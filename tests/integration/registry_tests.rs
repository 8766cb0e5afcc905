use refguard::registry::{NewRelationship, RegistryError, RelationshipKind};

use super::fixtures::Fixture;

#[test]
fn test_duplicate_active_edge_rejected() {
    let fixture = Fixture::new();
    fixture.register("service_orders", false);

    let err = fixture
        .engine
        .registry()
        .register(&NewRelationship::new("equipment", "service_orders", "equipment_id"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Duplicate { .. }));
}

#[test]
fn test_deactivated_edge_can_be_replaced_but_not_reactivated() {
    let fixture = Fixture::new();
    let registry = fixture.engine.registry();
    let original = fixture.register("service_orders", false);
    registry.set_active(original, false).unwrap();

    let replacement = registry
        .register(
            &NewRelationship::new("equipment", "service_orders", "equipment_id")
                .with_cascade(true)
                .with_kind(RelationshipKind::ManyToMany)
                .with_description("orders are archived with the device"),
        )
        .unwrap();
    assert_ne!(original, replacement);

    let err = registry.set_active(original, true).unwrap_err();
    assert!(matches!(err, RegistryError::Duplicate { .. }));

    let active = registry.list(false).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, replacement);
    assert_eq!(active[0].relationship_kind, RelationshipKind::ManyToMany);
    assert!(active[0].cascade_allowed);
    assert_eq!(registry.list(true).unwrap().len(), 2);
}

#[test]
fn test_unknown_relationship_id() {
    let fixture = Fixture::new();
    let registry = fixture.engine.registry();
    assert!(matches!(registry.get(77), Err(RegistryError::NotFound(77))));
    assert!(matches!(
        registry.set_cascade_allowed(77, true),
        Err(RegistryError::NotFound(77))
    ));
    assert!(matches!(registry.set_active(77, false), Err(RegistryError::NotFound(77))));
}
