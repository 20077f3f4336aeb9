//! Assignment store operations.
//!
//! Records are never edited in place: a change revokes the old row and adds a
//! successor linked back to it.

use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::cache::ScopeCache;
use super::error::{HierarchyError, HierarchyResult};
use super::metrics::track_mutation;
use super::store::{HierarchyStore, StoreTransaction};
use crate::models::{
    Assignment, AssignmentType, CreateAssignment, Entity, EntityType, SupersedeAssignment,
};

#[derive(Clone)]
pub struct AssignmentService {
    store: Arc<dyn HierarchyStore>,
    cache: Arc<ScopeCache>,
}

impl AssignmentService {
    pub fn new(store: Arc<dyn HierarchyStore>, cache: Arc<ScopeCache>) -> Self {
        Self { store, cache }
    }

    /// Grant a user direct access to an entity.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, user_id = %input.user_id, entity_id = %input.entity_id))]
    pub async fn create_assignment(
        &self,
        input: CreateAssignment,
        actor_id: Uuid,
    ) -> HierarchyResult<Assignment> {
        let result = self.apply_create(input, actor_id).await;
        track_mutation("create_assignment", &result);
        result
    }

    async fn apply_create(
        &self,
        input: CreateAssignment,
        actor_id: Uuid,
    ) -> HierarchyResult<Assignment> {
        let mut tx = self.store.begin().await?;
        load_target(tx.as_mut(), input.tenant_id, input.entity_id, input.assignment_type).await?;

        tx.lock_tenant(input.tenant_id).await?;
        load_target(tx.as_mut(), input.tenant_id, input.entity_id, input.assignment_type).await?;
        reject_duplicate(
            tx.as_mut(),
            input.tenant_id,
            input.user_id,
            input.entity_id,
            input.assignment_type,
        )
        .await?;

        let assignment = Assignment::new(
            input.tenant_id,
            input.user_id,
            input.entity_id,
            input.assignment_type,
            Some(actor_id),
        );
        tx.insert_assignment(&assignment).await?;
        tx.bump_scope_generation(assignment.tenant_id).await?;
        tx.commit().await?;
        self.cache.invalidate_tenant(assignment.tenant_id);

        tracing::info!(
            assignment_id = %assignment.assignment_id,
            assignment_type = %assignment.assignment_type,
            %actor_id,
            "Assignment created"
        );
        Ok(assignment)
    }

    /// End an active assignment.
    #[instrument(skip(self))]
    pub async fn revoke_assignment(
        &self,
        assignment_id: Uuid,
        actor_id: Uuid,
    ) -> HierarchyResult<Assignment> {
        let result = self.apply_revoke(assignment_id, actor_id).await;
        track_mutation("revoke_assignment", &result);
        result
    }

    async fn apply_revoke(&self, assignment_id: Uuid, actor_id: Uuid) -> HierarchyResult<Assignment> {
        let mut tx = self.store.begin().await?;
        let assignment = load_active(tx.as_mut(), assignment_id).await?;
        tx.lock_tenant(assignment.tenant_id).await?;
        let assignment = load_active(tx.as_mut(), assignment_id).await?;

        let now = Utc::now();
        tx.revoke_assignment(assignment_id, now).await?;
        tx.bump_scope_generation(assignment.tenant_id).await?;
        tx.commit().await?;
        self.cache.invalidate_tenant(assignment.tenant_id);

        tracing::info!(%assignment_id, %actor_id, "Assignment revoked");
        Ok(Assignment {
            is_active: false,
            revoked_utc: Some(now),
            ..assignment
        })
    }

    /// Revoke an assignment and record its replacement in one transaction.
    /// Returns the new record.
    #[instrument(skip(self, changes))]
    pub async fn supersede_assignment(
        &self,
        assignment_id: Uuid,
        changes: SupersedeAssignment,
        actor_id: Uuid,
    ) -> HierarchyResult<Assignment> {
        let result = self.apply_supersede(assignment_id, changes, actor_id).await;
        track_mutation("supersede_assignment", &result);
        result
    }

    async fn apply_supersede(
        &self,
        assignment_id: Uuid,
        changes: SupersedeAssignment,
        actor_id: Uuid,
    ) -> HierarchyResult<Assignment> {
        let mut tx = self.store.begin().await?;
        let previous = load_active(tx.as_mut(), assignment_id).await?;
        let entity_id = changes.entity_id.unwrap_or(previous.entity_id);
        let assignment_type = changes.assignment_type.unwrap_or(previous.assignment_type);
        load_target(tx.as_mut(), previous.tenant_id, entity_id, assignment_type).await?;

        tx.lock_tenant(previous.tenant_id).await?;
        let previous = load_active(tx.as_mut(), assignment_id).await?;
        load_target(tx.as_mut(), previous.tenant_id, entity_id, assignment_type).await?;

        tx.revoke_assignment(assignment_id, Utc::now()).await?;
        reject_duplicate(
            tx.as_mut(),
            previous.tenant_id,
            previous.user_id,
            entity_id,
            assignment_type,
        )
        .await?;

        let successor = previous.successor(entity_id, assignment_type, Some(actor_id));
        tx.insert_assignment(&successor).await?;
        tx.bump_scope_generation(successor.tenant_id).await?;
        tx.commit().await?;
        self.cache.invalidate_tenant(successor.tenant_id);

        tracing::info!(
            %assignment_id,
            successor_id = %successor.assignment_id,
            %actor_id,
            "Assignment superseded"
        );
        Ok(successor)
    }

    pub async fn get_assignment(&self, assignment_id: Uuid) -> HierarchyResult<Assignment> {
        self.store
            .get_assignment(assignment_id)
            .await?
            .ok_or(HierarchyError::AssignmentNotFound(assignment_id))
    }

    /// A user's assignments in a tenant, oldest first.
    pub async fn list_user_assignments(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        active_only: bool,
    ) -> HierarchyResult<Vec<Assignment>> {
        self.store
            .list_user_assignments(tenant_id, user_id, active_only)
            .await
    }
}

/// The entity an assignment points at must exist in the assignment's tenant,
/// and location assignments must target a location.
async fn load_target(
    tx: &mut dyn StoreTransaction,
    tenant_id: Uuid,
    entity_id: Uuid,
    assignment_type: AssignmentType,
) -> HierarchyResult<Entity> {
    let entity = tx
        .get_entity(entity_id)
        .await?
        .ok_or(HierarchyError::EntityNotFound(entity_id))?;
    if entity.tenant_id != tenant_id {
        return Err(HierarchyError::CrossTenant {
            entity_tenant_id: entity.tenant_id,
            target_tenant_id: tenant_id,
        });
    }
    if assignment_type == AssignmentType::LocationAssignment
        && entity.entity_type != EntityType::Location
    {
        return Err(HierarchyError::InvalidInput(format!(
            "{} assignments must target a location",
            assignment_type
        )));
    }
    Ok(entity)
}

async fn load_active(tx: &mut dyn StoreTransaction, assignment_id: Uuid) -> HierarchyResult<Assignment> {
    let assignment = tx
        .get_assignment(assignment_id)
        .await?
        .ok_or(HierarchyError::AssignmentNotFound(assignment_id))?;
    if !assignment.is_active {
        return Err(HierarchyError::AssignmentInactive(assignment_id));
    }
    Ok(assignment)
}

async fn reject_duplicate(
    tx: &mut dyn StoreTransaction,
    tenant_id: Uuid,
    user_id: Uuid,
    entity_id: Uuid,
    assignment_type: AssignmentType,
) -> HierarchyResult<()> {
    if tx
        .find_active_assignment(tenant_id, user_id, entity_id, assignment_type)
        .await?
        .is_some()
    {
        return Err(HierarchyError::DuplicateAssignment {
            user_id,
            entity_id,
            assignment_type,
        });
    }
    Ok(())
}
