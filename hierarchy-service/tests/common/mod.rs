//! Test helper module for hierarchy-service integration tests.
//!
//! Builds the engine on top of the in-memory store so tests run without
//! PostgreSQL.

#![allow(dead_code)]

use hierarchy_service::{
    models::{empty_attributes, Assignment, AssignmentType, CreateAssignment, CreateEntity, Entity, EntityType},
    services::{MemoryHierarchyStore, ScopeCache, StaticRoleProvider},
    AppState,
};
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

static TRACING: Once = Once::new();

/// Quiet test logging; `RUST_LOG` still overrides.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// One tenant wired to a fresh in-memory store.
pub struct TestHarness {
    pub store: Arc<MemoryHierarchyStore>,
    pub cache: Arc<ScopeCache>,
    pub state: AppState,
    pub roles: StaticRoleProvider,
    pub tenant_id: Uuid,
    pub admin_id: Uuid,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_store(MemoryHierarchyStore::new(), ScopeCache::new(Duration::from_secs(60)))
    }

    pub fn without_cache() -> Self {
        Self::with_store(MemoryHierarchyStore::new(), ScopeCache::disabled())
    }

    pub fn with_store(store: MemoryHierarchyStore, cache: ScopeCache) -> Self {
        init_tracing();
        let store = Arc::new(store);
        let cache = Arc::new(cache);
        let state = AppState::new(store.clone(), cache.clone());

        let tenant_id = Uuid::new_v4();
        let admin_id = Uuid::new_v4();
        let roles = StaticRoleProvider::new();
        roles.grant(tenant_id, admin_id, hierarchy_service::models::TenantRole::TenantAdmin);

        Self {
            store,
            cache,
            state,
            roles,
            tenant_id,
            admin_id,
        }
    }

    /// Another service instance over the same store, with its own scope cache.
    pub fn second_instance(&self) -> (AppState, Arc<ScopeCache>) {
        let cache = Arc::new(ScopeCache::new(Duration::from_secs(60)));
        (AppState::new(self.store.clone(), cache.clone()), cache)
    }

    pub async fn create(
        &self,
        parent: Option<&Entity>,
        entity_type: EntityType,
        name: &str,
    ) -> Entity {
        self.state
            .hierarchy
            .create_entity(
                CreateEntity {
                    tenant_id: self.tenant_id,
                    parent_entity_id: parent.map(|p| p.entity_id),
                    entity_type,
                    entity_name: name.to_string(),
                    attributes: empty_attributes(),
                },
                self.admin_id,
            )
            .await
            .expect("Failed to create entity")
    }

    pub async fn root(&self, name: &str) -> Entity {
        self.create(None, EntityType::Organization, name).await
    }

    pub async fn org(&self, parent: &Entity, name: &str) -> Entity {
        self.create(Some(parent), EntityType::Organization, name).await
    }

    pub async fn location(&self, parent: &Entity, name: &str) -> Entity {
        self.create(Some(parent), EntityType::Location, name).await
    }

    pub async fn assign(&self, user_id: Uuid, entity: &Entity, assignment_type: AssignmentType) -> Assignment {
        self.state
            .assignments
            .create_assignment(
                CreateAssignment {
                    tenant_id: self.tenant_id,
                    user_id,
                    entity_id: entity.entity_id,
                    assignment_type,
                },
                self.admin_id,
            )
            .await
            .expect("Failed to create assignment")
    }

    /// Reload an entity from the store.
    pub async fn reload(&self, entity: &Entity) -> Entity {
        self.state
            .hierarchy
            .get_entity(entity.entity_id)
            .await
            .expect("Entity should exist")
    }
}

/// Root R with organizations A and B, where A holds organization C and
/// location L1, and B holds location L2.
pub struct SampleTree {
    pub root: Entity,
    pub a: Entity,
    pub b: Entity,
    pub c: Entity,
    pub l1: Entity,
    pub l2: Entity,
}

pub async fn sample_tree(harness: &TestHarness) -> SampleTree {
    let root = harness.root("R").await;
    let a = harness.org(&root, "A").await;
    let b = harness.org(&root, "B").await;
    let c = harness.org(&a, "C").await;
    let l1 = harness.location(&a, "L1").await;
    let l2 = harness.location(&b, "L2").await;
    SampleTree { root, a, b, c, l1, l2 }
}

/// Every path ends with the entity itself, starts at a root, and agrees with
/// the parent's path and the level.
pub fn assert_path_invariants(entities: &[Entity]) {
    for entity in entities {
        assert_eq!(
            entity.hierarchy_path.last(),
            Some(&entity.entity_id),
            "path of {} must end with itself",
            entity.entity_name
        );
        assert_eq!(entity.entity_level as usize, entity.hierarchy_path.len());
        match entity.parent_entity_id {
            None => assert_eq!(entity.hierarchy_path, vec![entity.entity_id]),
            Some(parent_id) => {
                let parent = entities
                    .iter()
                    .find(|e| e.entity_id == parent_id)
                    .expect("parent must exist");
                let mut expected = parent.hierarchy_path.clone();
                expected.push(entity.entity_id);
                assert_eq!(entity.hierarchy_path, expected, "path of {}", entity.entity_name);
                assert_eq!(entity.tenant_id, parent.tenant_id);
            }
        }
    }
}
