//! Access scope model - the entity IDs an actor may reach within a tenant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::Entity;

/// Role an actor holds in a tenant, supplied by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantRole {
    TenantAdmin,
    Member,
}

impl TenantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantAdmin => "tenant_admin",
            Self::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "tenant_admin" | "tenant-admin" | "admin" => Some(Self::TenantAdmin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Resolved scope of one actor in one tenant.
///
/// A tenant admin sees every entity of the tenant. Any other actor sees the
/// `granted` tier (directly assigned entities and everything below them) and
/// the `context` tier (the ancestor chain of each assigned entity, kept for
/// breadcrumbs). Siblings of assigned entities are in neither tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessScope {
    Tenant {
        tenant_id: Uuid,
        entity_ids: BTreeSet<Uuid>,
    },
    Scoped {
        tenant_id: Uuid,
        granted: BTreeSet<Uuid>,
        context: BTreeSet<Uuid>,
    },
}

impl AccessScope {
    /// Whole-tenant scope.
    pub fn tenant(tenant_id: Uuid, entity_ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self::Tenant {
            tenant_id,
            entity_ids: entity_ids.into_iter().collect(),
        }
    }

    /// No access at all. Not an error: reads simply return nothing.
    pub fn empty(tenant_id: Uuid) -> Self {
        Self::Scoped {
            tenant_id,
            granted: BTreeSet::new(),
            context: BTreeSet::new(),
        }
    }

    /// Assemble a scoped-user scope from the directly assigned entities and
    /// the IDs of every entity below them.
    pub fn assemble<'a>(
        tenant_id: Uuid,
        direct: impl IntoIterator<Item = &'a Entity>,
        descendant_ids: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        let mut granted = BTreeSet::new();
        let mut ancestors = BTreeSet::new();

        for entity in direct {
            if entity.tenant_id != tenant_id {
                continue;
            }
            granted.insert(entity.entity_id);
            ancestors.extend(entity.ancestor_ids().iter().copied());
        }
        granted.extend(descendant_ids);

        let context = ancestors.difference(&granted).copied().collect();

        Self::Scoped {
            tenant_id,
            granted,
            context,
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        match self {
            Self::Tenant { tenant_id, .. } | Self::Scoped { tenant_id, .. } => *tenant_id,
        }
    }

    pub fn is_tenant_wide(&self) -> bool {
        matches!(self, Self::Tenant { .. })
    }

    /// Whether the entity is visible at all (granted or breadcrumb context).
    pub fn contains(&self, entity_id: Uuid) -> bool {
        match self {
            Self::Tenant { entity_ids, .. } => entity_ids.contains(&entity_id),
            Self::Scoped {
                granted, context, ..
            } => granted.contains(&entity_id) || context.contains(&entity_id),
        }
    }

    /// Whether the entity is in the granted tier.
    pub fn grants_full(&self, entity_id: Uuid) -> bool {
        match self {
            Self::Tenant { entity_ids, .. } => entity_ids.contains(&entity_id),
            Self::Scoped { granted, .. } => granted.contains(&entity_id),
        }
    }

    /// Every visible entity ID, deduplicated.
    pub fn entity_ids(&self) -> BTreeSet<Uuid> {
        match self {
            Self::Tenant { entity_ids, .. } => entity_ids.clone(),
            Self::Scoped {
                granted, context, ..
            } => granted.union(context).copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Tenant { entity_ids, .. } => entity_ids.len(),
            Self::Scoped {
                granted, context, ..
            } => granted.len() + context.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
