//! Hierarchy manager: the only writer of entity paths and levels.
//!
//! Every mutation runs in one store transaction. Structural rules are checked
//! before the first write, so a rejected request never leaves partial state.
//! Mutations of a tenant are serialized by the tenant lock; moves additionally
//! lock the moved subtree.

use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::cache::ScopeCache;
use super::error::{HierarchyError, HierarchyResult, InvalidParentReason};
use super::metrics::track_mutation;
use super::store::HierarchyStore;
use crate::models::{
    build_entity_tree, extend_path, path_level, CreateEntity, DeleteOptions, DeleteOutcome,
    Entity, EntityTreeNode, EntityType, PathUpdate, RebuildReport,
};

/// Maximum length of an entity name.
pub const MAX_ENTITY_NAME_LEN: usize = 255;

#[derive(Clone)]
pub struct HierarchyManager {
    store: Arc<dyn HierarchyStore>,
    cache: Arc<ScopeCache>,
}

impl HierarchyManager {
    pub fn new(store: Arc<dyn HierarchyStore>, cache: Arc<ScopeCache>) -> Self {
        Self { store, cache }
    }

    // ==================== Mutations ====================

    /// Create an entity below `parent_entity_id`, or the tenant root when no
    /// parent is given.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, parent_entity_id = ?input.parent_entity_id))]
    pub async fn create_entity(&self, input: CreateEntity, actor_id: Uuid) -> HierarchyResult<Entity> {
        let result = self.apply_create(input, actor_id).await;
        track_mutation("create_entity", &result);
        result
    }

    async fn apply_create(&self, input: CreateEntity, actor_id: Uuid) -> HierarchyResult<Entity> {
        let entity_name = normalize_name(&input.entity_name)?;
        let mut tx = self.store.begin().await?;

        // Tenant check happens before any lock is taken.
        if let Some(parent_id) = input.parent_entity_id {
            let parent = tx
                .get_entity(parent_id)
                .await?
                .ok_or_else(|| invalid_parent(Some(parent_id), InvalidParentReason::NotFound))?;
            if parent.tenant_id != input.tenant_id {
                return Err(invalid_parent(
                    Some(parent_id),
                    InvalidParentReason::DifferentTenant,
                ));
            }
        }

        tx.lock_tenant(input.tenant_id).await?;

        let entity = match input.parent_entity_id {
            Some(parent_id) => {
                let parent = tx
                    .get_entity(parent_id)
                    .await?
                    .ok_or_else(|| invalid_parent(Some(parent_id), InvalidParentReason::NotFound))?;
                if !parent.entity_type.can_parent() {
                    return Err(invalid_parent(
                        Some(parent_id),
                        InvalidParentReason::LocationParent,
                    ));
                }
                Entity::new_child(&parent, input.entity_type, entity_name, input.attributes)
            }
            None => {
                if input.entity_type == EntityType::Location {
                    return Err(invalid_parent(None, InvalidParentReason::LocationWithoutParent));
                }
                if let Some(root) = tx.find_root(input.tenant_id).await? {
                    return Err(HierarchyError::RootAlreadyExists {
                        tenant_id: input.tenant_id,
                        root_entity_id: root.entity_id,
                    });
                }
                Entity::new_root(input.tenant_id, input.entity_type, entity_name, input.attributes)
            }
        };

        tx.insert_entity(&entity).await?;
        tx.bump_scope_generation(entity.tenant_id).await?;
        tx.commit().await?;
        self.cache.invalidate_tenant(entity.tenant_id);

        tracing::info!(
            entity_id = %entity.entity_id,
            entity_type = %entity.entity_type,
            entity_level = entity.entity_level,
            %actor_id,
            "Entity created"
        );
        Ok(entity)
    }

    /// Re-attach an entity and its whole subtree below `new_parent_entity_id`.
    ///
    /// Moving to the current parent changes nothing but `updated_utc`.
    #[instrument(skip(self))]
    pub async fn move_entity(
        &self,
        entity_id: Uuid,
        new_parent_entity_id: Option<Uuid>,
        actor_id: Uuid,
    ) -> HierarchyResult<Entity> {
        let result = self.apply_move(entity_id, new_parent_entity_id, actor_id).await;
        track_mutation("move_entity", &result);
        result
    }

    async fn apply_move(
        &self,
        entity_id: Uuid,
        new_parent_entity_id: Option<Uuid>,
        actor_id: Uuid,
    ) -> HierarchyResult<Entity> {
        let mut tx = self.store.begin().await?;

        let entity = tx
            .get_entity(entity_id)
            .await?
            .ok_or(HierarchyError::EntityNotFound(entity_id))?;

        if let Some(parent_id) = new_parent_entity_id {
            if parent_id == entity_id {
                return Err(HierarchyError::CycleDetected {
                    entity_id,
                    new_parent_entity_id: parent_id,
                });
            }
            let parent = tx
                .get_entity(parent_id)
                .await?
                .ok_or_else(|| invalid_parent(Some(parent_id), InvalidParentReason::NotFound))?;
            if parent.tenant_id != entity.tenant_id {
                return Err(HierarchyError::CrossTenant {
                    entity_tenant_id: entity.tenant_id,
                    target_tenant_id: parent.tenant_id,
                });
            }
        }

        let tenant_id = entity.tenant_id;
        tx.lock_tenant(tenant_id).await?;

        // Positions may have changed while waiting for the lock.
        let entity = tx
            .get_entity(entity_id)
            .await?
            .ok_or(HierarchyError::EntityNotFound(entity_id))?;
        let new_parent = match new_parent_entity_id {
            Some(parent_id) => Some(
                tx.get_entity(parent_id)
                    .await?
                    .ok_or_else(|| invalid_parent(Some(parent_id), InvalidParentReason::NotFound))?,
            ),
            None => None,
        };

        let now = Utc::now();

        if entity.parent_entity_id == new_parent_entity_id {
            tx.touch_entity(entity_id, now).await?;
            tx.commit().await?;
            tracing::info!(%entity_id, %actor_id, "Entity already under requested parent");
            return Ok(Entity {
                updated_utc: now,
                ..entity
            });
        }

        let new_prefix = match &new_parent {
            Some(parent) => {
                if !parent.entity_type.can_parent() {
                    return Err(invalid_parent(
                        Some(parent.entity_id),
                        InvalidParentReason::LocationParent,
                    ));
                }
                if parent.is_within(entity_id) {
                    return Err(HierarchyError::CycleDetected {
                        entity_id,
                        new_parent_entity_id: parent.entity_id,
                    });
                }
                parent.hierarchy_path.clone()
            }
            None => {
                if entity.entity_type == EntityType::Location {
                    return Err(invalid_parent(None, InvalidParentReason::LocationWithoutParent));
                }
                if let Some(root) = tx.find_root(tenant_id).await? {
                    if root.entity_id != entity_id {
                        return Err(HierarchyError::RootAlreadyExists {
                            tenant_id,
                            root_entity_id: root.entity_id,
                        });
                    }
                }
                Vec::new()
            }
        };

        let subtree = tx.lock_subtree(tenant_id, entity_id).await?;
        let updates = plan_subtree_move(&subtree, entity_id, new_parent_entity_id, &new_prefix);
        for update in &updates {
            tx.update_entity_position(update, now).await?;
        }
        tx.bump_scope_generation(tenant_id).await?;
        tx.commit().await?;
        self.cache.invalidate_tenant(tenant_id);

        tracing::info!(
            %entity_id,
            new_parent_entity_id = ?new_parent_entity_id,
            rewritten = updates.len(),
            %actor_id,
            "Entity moved"
        );

        let moved = updates
            .into_iter()
            .find(|u| u.entity_id == entity_id)
            .ok_or(HierarchyError::EntityNotFound(entity_id))?;
        Ok(Entity {
            parent_entity_id: moved.parent_entity_id,
            hierarchy_path: moved.hierarchy_path,
            entity_level: moved.entity_level,
            updated_utc: now,
            ..entity
        })
    }

    /// Change an entity's display name. Position is untouched.
    #[instrument(skip(self, entity_name))]
    pub async fn rename_entity(
        &self,
        entity_id: Uuid,
        entity_name: &str,
        actor_id: Uuid,
    ) -> HierarchyResult<Entity> {
        let result = self.apply_rename(entity_id, entity_name, actor_id).await;
        track_mutation("rename_entity", &result);
        result
    }

    async fn apply_rename(
        &self,
        entity_id: Uuid,
        entity_name: &str,
        actor_id: Uuid,
    ) -> HierarchyResult<Entity> {
        let entity_name = normalize_name(entity_name)?;
        let mut tx = self.store.begin().await?;
        let entity = tx
            .get_entity(entity_id)
            .await?
            .ok_or(HierarchyError::EntityNotFound(entity_id))?;

        let now = Utc::now();
        tx.rename_entity(entity_id, &entity_name, now).await?;
        tx.commit().await?;

        tracing::info!(%entity_id, %actor_id, "Entity renamed");
        Ok(Entity {
            entity_name,
            updated_utc: now,
            ..entity
        })
    }

    /// Delete an entity. Non-leaf entities need `cascade`, which removes the
    /// whole subtree leaf-first together with every assignment on it.
    #[instrument(skip(self))]
    pub async fn delete_entity(
        &self,
        entity_id: Uuid,
        actor_id: Uuid,
        options: DeleteOptions,
    ) -> HierarchyResult<DeleteOutcome> {
        let result = self.apply_delete(entity_id, actor_id, options).await;
        track_mutation("delete_entity", &result);
        result
    }

    async fn apply_delete(
        &self,
        entity_id: Uuid,
        actor_id: Uuid,
        options: DeleteOptions,
    ) -> HierarchyResult<DeleteOutcome> {
        let mut tx = self.store.begin().await?;
        let entity = tx
            .get_entity(entity_id)
            .await?
            .ok_or(HierarchyError::EntityNotFound(entity_id))?;

        tx.lock_tenant(entity.tenant_id).await?;
        let mut subtree = tx.lock_subtree(entity.tenant_id, entity_id).await?;
        if subtree.is_empty() {
            return Err(HierarchyError::EntityNotFound(entity_id));
        }

        let descendant_count = subtree.len() - 1;
        if descendant_count > 0 && !options.cascade {
            return Err(HierarchyError::HasChildren {
                entity_id,
                descendant_count,
            });
        }

        // Leaf-first so no row outlives its children.
        subtree.sort_by(|a, b| b.entity_level.cmp(&a.entity_level));
        let deleted_entity_ids: Vec<Uuid> = subtree.iter().map(|e| e.entity_id).collect();

        let removed_assignment_count = tx
            .delete_assignments_for_entities(&deleted_entity_ids)
            .await?;
        for id in &deleted_entity_ids {
            tx.delete_entity(*id).await?;
        }
        tx.bump_scope_generation(entity.tenant_id).await?;
        tx.commit().await?;
        self.cache.invalidate_tenant(entity.tenant_id);

        tracing::info!(
            %entity_id,
            deleted = deleted_entity_ids.len(),
            removed_assignments = removed_assignment_count,
            %actor_id,
            "Entity deleted"
        );
        Ok(DeleteOutcome {
            deleted_entity_ids,
            removed_assignment_count,
        })
    }

    /// Recompute every path of a tenant top-down from its roots.
    ///
    /// Entities unreachable from a root are reported as orphans and left in place.
    #[instrument(skip(self))]
    pub async fn rebuild_all_hierarchy_paths(&self, tenant_id: Uuid) -> HierarchyResult<RebuildReport> {
        let result = self.apply_rebuild(tenant_id).await;
        track_mutation("rebuild_paths", &result);
        result
    }

    async fn apply_rebuild(&self, tenant_id: Uuid) -> HierarchyResult<RebuildReport> {
        let mut tx = self.store.begin().await?;
        tx.lock_tenant(tenant_id).await?;
        let entities = tx.list_tenant_entities(tenant_id).await?;

        let plan = plan_rebuild(&entities);
        if plan.root_count > 1 {
            tracing::warn!(%tenant_id, roots = plan.root_count, "Tenant has more than one root");
        }

        let now = Utc::now();
        for update in &plan.updates {
            tx.update_entity_position(update, now).await?;
        }
        if !plan.updates.is_empty() {
            tx.bump_scope_generation(tenant_id).await?;
        }
        tx.commit().await?;

        if !plan.updates.is_empty() {
            self.cache.invalidate_tenant(tenant_id);
        }
        if !plan.orphans.is_empty() {
            tracing::warn!(
                %tenant_id,
                orphans = ?plan.orphans,
                "Entities not reachable from a root were left untouched"
            );
        }
        tracing::info!(%tenant_id, updated = plan.updates.len(), "Hierarchy paths rebuilt");

        Ok(RebuildReport {
            tenant_id,
            updated_count: plan.updates.len(),
            orphans: plan.orphans,
        })
    }

    // ==================== Reads ====================

    /// Whether `ancestor_id` is a strict ancestor of `descendant_id`.
    /// Unknown IDs give `false`.
    #[instrument(skip(self))]
    pub async fn validate_hierarchy_integrity(
        &self,
        ancestor_id: Uuid,
        descendant_id: Uuid,
    ) -> HierarchyResult<bool> {
        let Some(descendant) = self.store.get_entity(descendant_id).await? else {
            return Ok(false);
        };
        if !descendant.has_ancestor(ancestor_id) {
            return Ok(false);
        }
        Ok(match self.store.get_entity(ancestor_id).await? {
            Some(ancestor) => ancestor.is_ancestor_of(&descendant),
            None => false,
        })
    }

    pub async fn get_entity(&self, entity_id: Uuid) -> HierarchyResult<Entity> {
        self.store
            .get_entity(entity_id)
            .await?
            .ok_or(HierarchyError::EntityNotFound(entity_id))
    }

    /// Breadcrumb of an entity: its ancestors, root first.
    pub async fn list_ancestors(&self, entity_id: Uuid) -> HierarchyResult<Vec<Entity>> {
        let entity = self.get_entity(entity_id).await?;
        let mut ancestors = self.store.find_entities(entity.ancestor_ids()).await?;
        ancestors.retain(|a| a.tenant_id == entity.tenant_id);
        ancestors.sort_by_key(|a| a.entity_level);
        Ok(ancestors)
    }

    /// Everything below an entity, ordered by level.
    pub async fn list_descendants(&self, entity_id: Uuid) -> HierarchyResult<Vec<Entity>> {
        let entity = self.get_entity(entity_id).await?;
        let mut descendants = self
            .store
            .list_descendants(entity.tenant_id, &[entity_id])
            .await?;
        descendants.retain(|d| d.entity_id != entity_id);
        Ok(descendants)
    }

    pub async fn list_tenant_entities(&self, tenant_id: Uuid) -> HierarchyResult<Vec<Entity>> {
        self.store.list_tenant_entities(tenant_id).await
    }

    /// Unfiltered nested tree of a tenant.
    pub async fn tenant_tree(&self, tenant_id: Uuid) -> HierarchyResult<Vec<EntityTreeNode>> {
        Ok(build_entity_tree(self.list_tenant_entities(tenant_id).await?))
    }
}

fn invalid_parent(parent_entity_id: Option<Uuid>, reason: InvalidParentReason) -> HierarchyError {
    HierarchyError::InvalidParent {
        parent_entity_id,
        reason,
    }
}

fn normalize_name(entity_name: &str) -> HierarchyResult<String> {
    let trimmed = entity_name.trim();
    if trimmed.is_empty() {
        return Err(HierarchyError::InvalidInput("entity_name must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_ENTITY_NAME_LEN {
        return Err(HierarchyError::InvalidInput(format!(
            "entity_name must be at most {} characters",
            MAX_ENTITY_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// New positions for every entity of a subtree re-attached below `new_prefix`.
///
/// Only the moved entity changes parent; descendants keep theirs and get the
/// rewritten prefix.
pub fn plan_subtree_move(
    subtree: &[Entity],
    moved_id: Uuid,
    new_parent_entity_id: Option<Uuid>,
    new_prefix: &[Uuid],
) -> Vec<PathUpdate> {
    subtree
        .iter()
        .filter_map(|entity| {
            let hierarchy_path = entity.rebased_path(moved_id, new_prefix)?;
            let parent_entity_id = if entity.entity_id == moved_id {
                new_parent_entity_id
            } else {
                entity.parent_entity_id
            };
            Some(PathUpdate {
                entity_id: entity.entity_id,
                parent_entity_id,
                entity_level: path_level(&hierarchy_path),
                hierarchy_path,
            })
        })
        .collect()
}

/// Outcome of a rebuild pass before it is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildPlan {
    /// Only entities whose stored path or level differs.
    pub updates: Vec<PathUpdate>,
    pub orphans: Vec<Uuid>,
    pub root_count: usize,
}

/// Breadth-first recomputation of paths from each root via parent links.
///
/// A parent's path is always settled before any child's is derived from it.
/// Entities never reached (dangling parent, parent cycle) become orphans.
pub fn plan_rebuild(entities: &[Entity]) -> RebuildPlan {
    let mut ordered: Vec<&Entity> = entities.iter().collect();
    ordered.sort_by(|a, b| {
        a.created_utc
            .cmp(&b.created_utc)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });

    let mut children: HashMap<Uuid, Vec<&Entity>> = HashMap::new();
    let mut queue: VecDeque<(&Entity, Vec<Uuid>)> = VecDeque::new();
    for entity in ordered.iter().copied() {
        match entity.parent_entity_id {
            Some(parent_id) => children.entry(parent_id).or_default().push(entity),
            None => queue.push_back((entity, Vec::new())),
        }
    }
    let root_count = queue.len();

    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut updates = Vec::new();

    while let Some((entity, parent_path)) = queue.pop_front() {
        if !visited.insert(entity.entity_id) {
            continue;
        }
        let hierarchy_path = extend_path(&parent_path, entity.entity_id);
        let entity_level = path_level(&hierarchy_path);

        if let Some(kids) = children.get(&entity.entity_id) {
            for child in kids {
                queue.push_back((*child, hierarchy_path.clone()));
            }
        }

        if hierarchy_path != entity.hierarchy_path || entity_level != entity.entity_level {
            updates.push(PathUpdate {
                entity_id: entity.entity_id,
                parent_entity_id: entity.parent_entity_id,
                hierarchy_path,
                entity_level,
            });
        }
    }

    let orphans = ordered
        .iter()
        .filter(|e| !visited.contains(&e.entity_id))
        .map(|e| e.entity_id)
        .collect();

    RebuildPlan {
        updates,
        orphans,
        root_count,
    }
}
