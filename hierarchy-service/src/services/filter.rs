//! Query filter adapter: the read surface CRUD routes use.
//!
//! Either filter rows already in memory with [`filter_by_scope`], or push the
//! restriction into SQL with [`scope_predicate`] so unauthorized rows are never
//! fetched.

use sqlx::{Postgres, QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

use super::error::HierarchyResult;
use super::roles::RoleProvider;
use super::scope::ScopeResolver;
use super::store::HierarchyStore;
use crate::models::{build_entity_tree, AccessScope, Assignment, Entity, EntityTreeNode};

/// A row owned by one entity of one tenant.
pub trait ScopedRow {
    fn scope_tenant_id(&self) -> Uuid;
    fn scope_entity_id(&self) -> Uuid;
}

impl ScopedRow for Entity {
    fn scope_tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    fn scope_entity_id(&self) -> Uuid {
        self.entity_id
    }
}

impl ScopedRow for Assignment {
    fn scope_tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    fn scope_entity_id(&self) -> Uuid {
        self.entity_id
    }
}

/// Keep only rows visible in `scope`. Order is preserved.
pub fn filter_by_scope<R: ScopedRow>(rows: impl IntoIterator<Item = R>, scope: &AccessScope) -> Vec<R> {
    let tenant_id = scope.tenant_id();
    rows.into_iter()
        .filter(|row| row.scope_tenant_id() == tenant_id && scope.contains(row.scope_entity_id()))
        .collect()
}

/// Scope restriction in a form a query can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopePredicate {
    /// Every row of the tenant.
    Tenant { tenant_id: Uuid },
    /// Rows of the tenant owned by one of the listed entities.
    Entities { tenant_id: Uuid, entity_ids: Vec<Uuid> },
    /// Matches no row.
    Nothing,
}

impl ScopePredicate {
    pub fn matches(&self, tenant_id: Uuid, entity_id: Uuid) -> bool {
        match self {
            Self::Tenant { tenant_id: t } => *t == tenant_id,
            Self::Entities {
                tenant_id: t,
                entity_ids,
            } => *t == tenant_id && entity_ids.contains(&entity_id),
            Self::Nothing => false,
        }
    }

    /// Append the restriction as a boolean SQL expression.
    pub fn push_sql(
        &self,
        qb: &mut QueryBuilder<'_, Postgres>,
        tenant_column: &str,
        entity_column: &str,
    ) {
        match self {
            Self::Tenant { tenant_id } => {
                qb.push(format!("{tenant_column} = "));
                qb.push_bind(*tenant_id);
            }
            Self::Entities {
                tenant_id,
                entity_ids,
            } => {
                qb.push(format!("({tenant_column} = "));
                qb.push_bind(*tenant_id);
                qb.push(format!(" AND {entity_column} = ANY("));
                qb.push_bind(entity_ids.clone());
                qb.push("))");
            }
            Self::Nothing => {
                qb.push("FALSE");
            }
        }
    }
}

/// Predicate equivalent to `scope.contains`.
pub fn scope_predicate(scope: &AccessScope) -> ScopePredicate {
    match scope {
        AccessScope::Tenant { tenant_id, .. } => ScopePredicate::Tenant {
            tenant_id: *tenant_id,
        },
        AccessScope::Scoped { .. } if scope.is_empty() => ScopePredicate::Nothing,
        AccessScope::Scoped { tenant_id, .. } => ScopePredicate::Entities {
            tenant_id: *tenant_id,
            entity_ids: scope.entity_ids().into_iter().collect(),
        },
    }
}

/// Scope-filtered reads for request handlers.
#[derive(Clone)]
pub struct QueryFilter {
    store: Arc<dyn HierarchyStore>,
    resolver: ScopeResolver,
}

impl QueryFilter {
    pub fn new(store: Arc<dyn HierarchyStore>, resolver: ScopeResolver) -> Self {
        Self { store, resolver }
    }

    /// Entities of the tenant the actor may see, ordered by level.
    pub async fn visible_entities(
        &self,
        roles: &dyn RoleProvider,
        actor_id: Uuid,
        tenant_id: Option<Uuid>,
    ) -> HierarchyResult<Vec<Entity>> {
        let scope = self.resolver.resolve_scope(roles, actor_id, tenant_id).await?;
        self.store.list_scoped_entities(&scope_predicate(&scope)).await
    }

    /// Nested tree of a tenant. With an actor, only what that actor may see;
    /// entities whose parent is hidden become top-level nodes.
    pub async fn hierarchy_tree(
        &self,
        roles: &dyn RoleProvider,
        tenant_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> HierarchyResult<Vec<EntityTreeNode>> {
        let entities = match actor_id {
            Some(actor_id) => {
                self.visible_entities(roles, actor_id, Some(tenant_id))
                    .await?
            }
            None => self.store.list_tenant_entities(tenant_id).await?,
        };
        Ok(build_entity_tree(entities))
    }

    /// Intersect caller-supplied rows with the actor's scope.
    pub async fn filter_rows<R: ScopedRow + Send>(
        &self,
        roles: &dyn RoleProvider,
        actor_id: Uuid,
        tenant_id: Option<Uuid>,
        rows: Vec<R>,
    ) -> HierarchyResult<Vec<R>> {
        let scope = self.resolver.resolve_scope(roles, actor_id, tenant_id).await?;
        Ok(filter_by_scope(rows, &scope))
    }

    pub async fn can_access(
        &self,
        roles: &dyn RoleProvider,
        actor_id: Uuid,
        entity_id: Uuid,
    ) -> HierarchyResult<bool> {
        self.resolver.can_access(roles, actor_id, entity_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{empty_attributes, EntityType};

    fn sample() -> (Entity, Entity, Entity) {
        let root = Entity::new_root(
            Uuid::new_v4(),
            EntityType::Organization,
            "Root".into(),
            empty_attributes(),
        );
        let west = Entity::new_child(&root, EntityType::Organization, "West".into(), empty_attributes());
        let east = Entity::new_child(&root, EntityType::Organization, "East".into(), empty_attributes());
        (root, west, east)
    }

    #[test]
    fn test_filter_by_scope_drops_unreachable_rows() {
        let (root, west, east) = sample();
        let scope = AccessScope::assemble(root.tenant_id, [&west], [west.entity_id]);

        let visible = filter_by_scope(vec![root.clone(), west.clone(), east], &scope);
        let ids: Vec<Uuid> = visible.iter().map(|e| e.entity_id).collect();
        assert_eq!(ids, vec![root.entity_id, west.entity_id]);
    }

    #[test]
    fn test_filter_by_scope_ignores_other_tenants() {
        let (root, _, _) = sample();
        let scope = AccessScope::tenant(Uuid::new_v4(), [root.entity_id]);
        assert!(filter_by_scope(vec![root], &scope).is_empty());
    }

    #[test]
    fn test_predicate_agrees_with_scope() {
        let (root, west, east) = sample();
        let scope = AccessScope::assemble(root.tenant_id, [&west], [west.entity_id]);
        let predicate = scope_predicate(&scope);

        for entity in [&root, &west, &east] {
            assert_eq!(
                predicate.matches(entity.tenant_id, entity.entity_id),
                scope.contains(entity.entity_id)
            );
        }
        assert_eq!(scope_predicate(&AccessScope::empty(root.tenant_id)), ScopePredicate::Nothing);
    }

    #[test]
    fn test_push_sql_binds_tenant_and_entities() {
        let predicate = ScopePredicate::Entities {
            tenant_id: Uuid::new_v4(),
            entity_ids: vec![Uuid::new_v4()],
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT entity_id FROM entities WHERE ");
        predicate.push_sql(&mut qb, "tenant_id", "entity_id");
        assert_eq!(
            qb.sql(),
            "SELECT entity_id FROM entities WHERE (tenant_id = $1 AND entity_id = ANY($2))"
        );

        let mut qb = QueryBuilder::<Postgres>::new("WHERE ");
        ScopePredicate::Nothing.push_sql(&mut qb, "tenant_id", "entity_id");
        assert_eq!(qb.sql(), "WHERE FALSE");
    }
}
