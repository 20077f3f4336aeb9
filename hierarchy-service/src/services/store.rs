//! Storage seam for entities and assignments.
//!
//! Reads go straight to the store. Every write goes through a
//! [`StoreTransaction`], which is rolled back when dropped without a commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::HierarchyResult;
use super::filter::ScopePredicate;
use crate::models::{Assignment, AssignmentType, Entity, PathUpdate};

pub type StoreResult<T> = HierarchyResult<T>;

/// Read access to the entity and assignment tables.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Ping the backing store.
    async fn health_check(&self) -> StoreResult<()>;

    async fn get_entity(&self, entity_id: Uuid) -> StoreResult<Option<Entity>>;

    /// Entities with the given IDs, in no particular order. Unknown IDs are skipped.
    async fn find_entities(&self, entity_ids: &[Uuid]) -> StoreResult<Vec<Entity>>;

    /// All entities of a tenant ordered by level.
    async fn list_tenant_entities(&self, tenant_id: Uuid) -> StoreResult<Vec<Entity>>;

    async fn list_tenant_entity_ids(&self, tenant_id: Uuid) -> StoreResult<Vec<Uuid>>;

    /// Entities whose path contains any of `entity_ids`, the listed entities
    /// included, ordered by level.
    async fn list_descendants(
        &self,
        tenant_id: Uuid,
        entity_ids: &[Uuid],
    ) -> StoreResult<Vec<Entity>>;

    /// Entities matching a scope predicate, ordered by level.
    async fn list_scoped_entities(&self, predicate: &ScopePredicate) -> StoreResult<Vec<Entity>>;

    async fn get_assignment(&self, assignment_id: Uuid) -> StoreResult<Option<Assignment>>;

    async fn list_user_assignments(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<Assignment>>;

    /// Current scope generation of a tenant. Zero until its first mutation.
    ///
    /// Cached scopes are valid only while this value is unchanged.
    async fn scope_generation(&self, tenant_id: Uuid) -> StoreResult<i64>;

    /// Open a write transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// One unit of work. Locks taken through it are held until commit or drop.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Serialize structural changes within a tenant.
    async fn lock_tenant(&mut self, tenant_id: Uuid) -> StoreResult<()>;

    /// Lock and return the subtree rooted at `entity_id`, root first.
    async fn lock_subtree(&mut self, tenant_id: Uuid, entity_id: Uuid)
        -> StoreResult<Vec<Entity>>;

    async fn get_entity(&mut self, entity_id: Uuid) -> StoreResult<Option<Entity>>;

    async fn find_root(&mut self, tenant_id: Uuid) -> StoreResult<Option<Entity>>;

    async fn list_tenant_entities(&mut self, tenant_id: Uuid) -> StoreResult<Vec<Entity>>;

    async fn insert_entity(&mut self, entity: &Entity) -> StoreResult<()>;

    async fn update_entity_position(
        &mut self,
        update: &PathUpdate,
        updated_utc: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn rename_entity(
        &mut self,
        entity_id: Uuid,
        entity_name: &str,
        updated_utc: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Bump `updated_utc` without any other change.
    async fn touch_entity(&mut self, entity_id: Uuid, updated_utc: DateTime<Utc>)
        -> StoreResult<()>;

    async fn delete_entity(&mut self, entity_id: Uuid) -> StoreResult<()>;

    /// Remove every assignment, active or not, referencing the entities.
    async fn delete_assignments_for_entities(&mut self, entity_ids: &[Uuid]) -> StoreResult<u64>;

    async fn get_assignment(&mut self, assignment_id: Uuid) -> StoreResult<Option<Assignment>>;

    async fn find_active_assignment(
        &mut self,
        tenant_id: Uuid,
        user_id: Uuid,
        entity_id: Uuid,
        assignment_type: AssignmentType,
    ) -> StoreResult<Option<Assignment>>;

    async fn insert_assignment(&mut self, assignment: &Assignment) -> StoreResult<()>;

    async fn revoke_assignment(
        &mut self,
        assignment_id: Uuid,
        revoked_utc: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Advance the tenant's scope generation. Every transaction that can change
    /// an access scope calls this before committing.
    async fn bump_scope_generation(&mut self, tenant_id: Uuid) -> StoreResult<i64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
