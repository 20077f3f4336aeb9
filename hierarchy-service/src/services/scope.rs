//! Access-scope resolution.
//!
//! Tenant admins see the whole tenant. Everyone else sees what their active
//! assignments grant: each assigned entity with everything below it, plus the
//! ancestor chain of each assigned entity as breadcrumb context.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::cache::ScopeCache;
use super::error::{HierarchyError, HierarchyResult};
use super::metrics::{record_cache, record_scope_resolution};
use super::roles::RoleProvider;
use super::store::HierarchyStore;
use crate::models::AccessScope;

#[derive(Clone)]
pub struct ScopeResolver {
    store: Arc<dyn HierarchyStore>,
    cache: Arc<ScopeCache>,
}

impl ScopeResolver {
    pub fn new(store: Arc<dyn HierarchyStore>, cache: Arc<ScopeCache>) -> Self {
        Self { store, cache }
    }

    /// Resolve everything `actor_id` may access in `tenant_id`.
    ///
    /// No assignments yields an empty scope, not an error. A missing tenant is
    /// a caller bug and fails with `MissingTenantContext`.
    #[instrument(skip(self, roles))]
    pub async fn resolve_scope(
        &self,
        roles: &dyn RoleProvider,
        actor_id: Uuid,
        tenant_id: Option<Uuid>,
    ) -> HierarchyResult<AccessScope> {
        let Some(tenant_id) = tenant_id else {
            tracing::error!(%actor_id, "Scope requested without a tenant context");
            return Err(HierarchyError::MissingTenantContext);
        };

        if roles.is_tenant_admin(tenant_id, actor_id).await? {
            let entity_ids = self.store.list_tenant_entity_ids(tenant_id).await?;
            record_scope_resolution("tenant_admin");
            return Ok(AccessScope::tenant(tenant_id, entity_ids));
        }

        // Read before computing: a mutation committing meanwhile leaves the
        // entry stamped with a generation that is already stale.
        let generation = if self.cache.is_enabled() {
            let generation = self.store.scope_generation(tenant_id).await?;
            if let Some(scope) = self.cache.get(tenant_id, actor_id, generation) {
                record_cache(true);
                record_scope_resolution("cached");
                return Ok(scope);
            }
            record_cache(false);
            Some(generation)
        } else {
            None
        };

        let scope = self.compute_scoped(tenant_id, actor_id).await?;
        if let Some(generation) = generation {
            self.cache.insert(actor_id, scope.clone(), generation);
        }

        record_scope_resolution("scoped");
        tracing::debug!(%tenant_id, %actor_id, visible = scope.len(), "Scope resolved");
        Ok(scope)
    }

    async fn compute_scoped(&self, tenant_id: Uuid, actor_id: Uuid) -> HierarchyResult<AccessScope> {
        let assigned_ids: Vec<Uuid> = self
            .store
            .list_user_assignments(tenant_id, actor_id, true)
            .await?
            .into_iter()
            .map(|a| a.entity_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if assigned_ids.is_empty() {
            return Ok(AccessScope::empty(tenant_id));
        }

        let mut direct = self.store.find_entities(&assigned_ids).await?;
        direct.retain(|e| e.tenant_id == tenant_id);
        if direct.is_empty() {
            return Ok(AccessScope::empty(tenant_id));
        }

        let direct_ids: Vec<Uuid> = direct.iter().map(|e| e.entity_id).collect();
        let descendant_ids = self
            .store
            .list_descendants(tenant_id, &direct_ids)
            .await?
            .into_iter()
            .map(|e| e.entity_id);

        Ok(AccessScope::assemble(tenant_id, &direct, descendant_ids))
    }

    /// Point check without materializing the whole scope.
    ///
    /// Unknown entities are not accessible.
    #[instrument(skip(self, roles))]
    pub async fn can_access(
        &self,
        roles: &dyn RoleProvider,
        actor_id: Uuid,
        entity_id: Uuid,
    ) -> HierarchyResult<bool> {
        let Some(entity) = self.store.get_entity(entity_id).await? else {
            return Ok(false);
        };
        let tenant_id = entity.tenant_id;

        if roles.is_tenant_admin(tenant_id, actor_id).await? {
            return Ok(true);
        }
        if self.cache.is_enabled() {
            let generation = self.store.scope_generation(tenant_id).await?;
            if let Some(scope) = self.cache.get(tenant_id, actor_id, generation) {
                record_cache(true);
                return Ok(scope.contains(entity_id));
            }
        }

        let assigned_ids: Vec<Uuid> = self
            .store
            .list_user_assignments(tenant_id, actor_id, true)
            .await?
            .into_iter()
            .map(|a| a.entity_id)
            .collect();
        if assigned_ids.is_empty() {
            return Ok(false);
        }

        // Assigned to the entity or to one of its ancestors.
        if assigned_ids.iter().any(|id| entity.is_within(*id)) {
            return Ok(true);
        }

        // Breadcrumb: the entity is an ancestor of something assigned.
        let assigned = self.store.find_entities(&assigned_ids).await?;
        Ok(assigned
            .iter()
            .any(|a| a.tenant_id == tenant_id && a.has_ancestor(entity_id)))
    }
}
