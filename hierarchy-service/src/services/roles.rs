//! Roles come from the identity subsystem; the engine only asks for them.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::error::HierarchyError;
use crate::models::TenantRole;

/// Source of an actor's roles within a tenant.
#[async_trait]
pub trait RoleProvider: Send + Sync {
    async fn roles_for(&self, tenant_id: Uuid, user_id: Uuid)
        -> Result<Vec<TenantRole>, HierarchyError>;

    async fn is_tenant_admin(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool, HierarchyError> {
        Ok(self
            .roles_for(tenant_id, user_id)
            .await?
            .contains(&TenantRole::TenantAdmin))
    }
}

/// Role table held in memory, for embedded use and tests.
#[derive(Default)]
pub struct StaticRoleProvider {
    roles: DashMap<(Uuid, Uuid), Vec<TenantRole>>,
}

impl StaticRoleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, tenant_id: Uuid, user_id: Uuid, role: TenantRole) {
        let mut roles = self.roles.entry((tenant_id, user_id)).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    pub fn revoke(&self, tenant_id: Uuid, user_id: Uuid, role: TenantRole) {
        if let Some(mut roles) = self.roles.get_mut(&(tenant_id, user_id)) {
            roles.retain(|r| *r != role);
        }
    }
}

#[async_trait]
impl RoleProvider for StaticRoleProvider {
    async fn roles_for(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<TenantRole>, HierarchyError> {
        Ok(self
            .roles
            .get(&(tenant_id, user_id))
            .map(|roles| roles.clone())
            .unwrap_or_default())
    }
}
