mod common;

use common::{sample_tree, TestHarness};
use hierarchy_service::models::{
    empty_attributes, AssignmentType, CreateAssignment, Entity, EntityType, SupersedeAssignment,
};
use hierarchy_service::services::HierarchyError;
use uuid::Uuid;

#[tokio::test]
async fn test_create_assignment_records_actor() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let user = Uuid::new_v4();

    let assignment = harness.assign(user, &tree.a, AssignmentType::Membership).await;
    assert!(assignment.is_active);
    assert!(assignment.revoked_utc.is_none());
    assert_eq!(assignment.assigned_by_user_id, Some(harness.admin_id));
    assert_eq!(assignment.supersedes_assignment_id, None);

    let loaded = harness
        .state
        .assignments
        .get_assignment(assignment.assignment_id)
        .await
        .unwrap();
    assert_eq!(loaded.entity_id, tree.a.entity_id);
}

#[tokio::test]
async fn test_duplicate_active_assignment_is_rejected() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let user = Uuid::new_v4();
    harness.assign(user, &tree.a, AssignmentType::Membership).await;

    let err = harness
        .state
        .assignments
        .create_assignment(
            CreateAssignment {
                tenant_id: harness.tenant_id,
                user_id: user,
                entity_id: tree.a.entity_id,
                assignment_type: AssignmentType::Membership,
            },
            harness.admin_id,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::DuplicateAssignment { .. }));

    // A different type on the same entity is a separate grant.
    harness.assign(user, &tree.a, AssignmentType::ResponsiblePerson).await;
}

#[tokio::test]
async fn test_location_assignment_must_target_a_location() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;

    let err = harness
        .state
        .assignments
        .create_assignment(
            CreateAssignment {
                tenant_id: harness.tenant_id,
                user_id: Uuid::new_v4(),
                entity_id: tree.b.entity_id,
                assignment_type: AssignmentType::LocationAssignment,
            },
            harness.admin_id,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::InvalidInput(_)));
}

#[tokio::test]
async fn test_assignment_to_foreign_entity_is_cross_tenant() {
    let harness = TestHarness::new();
    sample_tree(&harness).await;

    let foreign = Entity::new_root(
        Uuid::new_v4(),
        EntityType::Organization,
        "Elsewhere".into(),
        empty_attributes(),
    );
    harness.store.import_entity(foreign.clone()).await;

    let err = harness
        .state
        .assignments
        .create_assignment(
            CreateAssignment {
                tenant_id: harness.tenant_id,
                user_id: Uuid::new_v4(),
                entity_id: foreign.entity_id,
                assignment_type: AssignmentType::Membership,
            },
            harness.admin_id,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::CrossTenant { .. }));

    let err = harness
        .state
        .assignments
        .create_assignment(
            CreateAssignment {
                tenant_id: harness.tenant_id,
                user_id: Uuid::new_v4(),
                entity_id: Uuid::new_v4(),
                assignment_type: AssignmentType::Membership,
            },
            harness.admin_id,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::EntityNotFound(_)));
}

#[tokio::test]
async fn test_revoke_keeps_history() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let user = Uuid::new_v4();
    let assignment = harness.assign(user, &tree.a, AssignmentType::Membership).await;

    let revoked = harness
        .state
        .assignments
        .revoke_assignment(assignment.assignment_id, harness.admin_id)
        .await
        .unwrap();
    assert!(!revoked.is_active);
    assert!(revoked.revoked_utc.is_some());

    let err = harness
        .state
        .assignments
        .revoke_assignment(assignment.assignment_id, harness.admin_id)
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::AssignmentInactive(_)));

    let active = harness
        .state
        .assignments
        .list_user_assignments(harness.tenant_id, user, true)
        .await
        .unwrap();
    assert!(active.is_empty());
    let all = harness
        .state
        .assignments
        .list_user_assignments(harness.tenant_id, user, false)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);

    // Re-granting after a revoke is allowed.
    harness.assign(user, &tree.a, AssignmentType::Membership).await;
}

#[tokio::test]
async fn test_supersede_links_successor() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let user = Uuid::new_v4();
    let original = harness.assign(user, &tree.l1, AssignmentType::LocationAssignment).await;

    let successor = harness
        .state
        .assignments
        .supersede_assignment(
            original.assignment_id,
            SupersedeAssignment {
                entity_id: Some(tree.l2.entity_id),
                assignment_type: None,
            },
            harness.admin_id,
        )
        .await
        .unwrap();

    assert_eq!(successor.supersedes_assignment_id, Some(original.assignment_id));
    assert_eq!(successor.entity_id, tree.l2.entity_id);
    assert_eq!(successor.assignment_type, AssignmentType::LocationAssignment);
    assert_eq!(successor.user_id, user);

    let previous = harness
        .state
        .assignments
        .get_assignment(original.assignment_id)
        .await
        .unwrap();
    assert!(!previous.is_active);

    let scope = harness
        .state
        .scopes
        .resolve_scope(&harness.roles, user, Some(harness.tenant_id))
        .await
        .unwrap();
    assert!(scope.grants_full(tree.l2.entity_id));
    assert!(!scope.contains(tree.l1.entity_id));
}

#[tokio::test]
async fn test_failed_supersede_leaves_original_active() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let user = Uuid::new_v4();
    let original = harness.assign(user, &tree.l1, AssignmentType::LocationAssignment).await;

    let err = harness
        .state
        .assignments
        .supersede_assignment(
            original.assignment_id,
            SupersedeAssignment {
                entity_id: Some(tree.b.entity_id),
                assignment_type: None,
            },
            harness.admin_id,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::InvalidInput(_)));

    let still = harness
        .state
        .assignments
        .get_assignment(original.assignment_id)
        .await
        .unwrap();
    assert!(still.is_active);
    assert_eq!(harness.store.assignment_count().await, 1);
}

#[tokio::test]
async fn test_unknown_assignment_is_not_found() {
    let harness = TestHarness::new();

    let err = harness
        .state
        .assignments
        .revoke_assignment(Uuid::new_v4(), harness.admin_id)
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::AssignmentNotFound(_)));
}
