//! In-process hierarchy store.
//!
//! Writers are serialized by a single mutex and stage their changes on a copy
//! of the state that is swapped in on commit, so readers always see either the
//! state before a transaction or the state after it. The store enforces the
//! same constraints as the PostgreSQL schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::error::HierarchyError;
use super::filter::ScopePredicate;
use super::store::{HierarchyStore, StoreResult, StoreTransaction};
use crate::models::{Assignment, AssignmentType, Entity, PathUpdate};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Clone)]
struct MemoryState {
    entities: HashMap<Uuid, Entity>,
    assignments: HashMap<Uuid, Assignment>,
    scope_generations: HashMap<Uuid, i64>,
}

impl MemoryState {
    fn sorted_entities<'a>(&self, iter: impl Iterator<Item = &'a Entity>) -> Vec<Entity> {
        let mut entities: Vec<Entity> = iter.cloned().collect();
        entities.sort_by(|a, b| {
            a.entity_level
                .cmp(&b.entity_level)
                .then_with(|| a.created_utc.cmp(&b.created_utc))
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        entities
    }

    fn tenant_entities(&self, tenant_id: Uuid) -> Vec<Entity> {
        self.sorted_entities(
            self.entities
                .values()
                .filter(|e| e.tenant_id == tenant_id),
        )
    }

    fn descendants(&self, tenant_id: Uuid, entity_ids: &[Uuid]) -> Vec<Entity> {
        self.sorted_entities(self.entities.values().filter(|e| {
            e.tenant_id == tenant_id && e.hierarchy_path.iter().any(|id| entity_ids.contains(id))
        }))
    }

    fn user_assignments(&self, tenant_id: Uuid, user_id: Uuid, active_only: bool) -> Vec<Assignment> {
        let mut assignments: Vec<Assignment> = self
            .assignments
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.user_id == user_id)
            .filter(|a| !active_only || a.is_active)
            .cloned()
            .collect();
        assignments.sort_by(|a, b| {
            a.assigned_utc
                .cmp(&b.assigned_utc)
                .then_with(|| a.assignment_id.cmp(&b.assignment_id))
        });
        assignments
    }
}

fn constraint_violation(constraint: &str, detail: impl std::fmt::Display) -> HierarchyError {
    HierarchyError::Internal(anyhow::anyhow!(
        "constraint {} violated: {}",
        constraint,
        detail
    ))
}

/// Hierarchy store kept in process memory.
#[derive(Clone)]
pub struct MemoryHierarchyStore {
    state: Arc<RwLock<MemoryState>>,
    writer: Arc<Mutex<()>>,
    lock_timeout: Duration,
}

impl Default for MemoryHierarchyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHierarchyStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Store whose transactions give up after `lock_timeout` waiting for a writer.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            writer: Arc::new(Mutex::new(())),
            lock_timeout,
        }
    }

    /// Write an entity row as-is, skipping every check.
    ///
    /// Stands in for bulk imports and manual data fixes that leave paths stale.
    pub async fn import_entity(&self, entity: Entity) {
        let mut state = self.state.write().await;
        state.entities.insert(entity.entity_id, entity);
    }

    /// Number of stored entities across all tenants.
    pub async fn entity_count(&self) -> usize {
        self.state.read().await.entities.len()
    }

    /// Number of stored assignment rows across all tenants.
    pub async fn assignment_count(&self) -> usize {
        self.state.read().await.assignments.len()
    }
}

#[async_trait]
impl HierarchyStore for MemoryHierarchyStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get_entity(&self, entity_id: Uuid) -> StoreResult<Option<Entity>> {
        Ok(self.state.read().await.entities.get(&entity_id).cloned())
    }

    async fn find_entities(&self, entity_ids: &[Uuid]) -> StoreResult<Vec<Entity>> {
        let state = self.state.read().await;
        Ok(state.sorted_entities(entity_ids.iter().filter_map(|id| state.entities.get(id))))
    }

    async fn list_tenant_entities(&self, tenant_id: Uuid) -> StoreResult<Vec<Entity>> {
        Ok(self.state.read().await.tenant_entities(tenant_id))
    }

    async fn list_tenant_entity_ids(&self, tenant_id: Uuid) -> StoreResult<Vec<Uuid>> {
        Ok(self
            .state
            .read()
            .await
            .tenant_entities(tenant_id)
            .into_iter()
            .map(|e| e.entity_id)
            .collect())
    }

    async fn list_descendants(
        &self,
        tenant_id: Uuid,
        entity_ids: &[Uuid],
    ) -> StoreResult<Vec<Entity>> {
        Ok(self.state.read().await.descendants(tenant_id, entity_ids))
    }

    async fn list_scoped_entities(&self, predicate: &ScopePredicate) -> StoreResult<Vec<Entity>> {
        let state = self.state.read().await;
        Ok(state.sorted_entities(
            state
                .entities
                .values()
                .filter(|e| predicate.matches(e.tenant_id, e.entity_id)),
        ))
    }

    async fn get_assignment(&self, assignment_id: Uuid) -> StoreResult<Option<Assignment>> {
        Ok(self.state.read().await.assignments.get(&assignment_id).cloned())
    }

    async fn list_user_assignments(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        active_only: bool,
    ) -> StoreResult<Vec<Assignment>> {
        Ok(self
            .state
            .read()
            .await
            .user_assignments(tenant_id, user_id, active_only))
    }

    async fn scope_generation(&self, tenant_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .state
            .read()
            .await
            .scope_generations
            .get(&tenant_id)
            .copied()
            .unwrap_or(0))
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = tokio::time::timeout(self.lock_timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "Timed out waiting for hierarchy writer lock"
                );
                HierarchyError::LockTimeout
            })?;

        let staged = self.state.read().await.clone();
        Ok(Box::new(MemoryTransaction {
            _writer: guard,
            state: self.state.clone(),
            staged,
        }))
    }
}

/// Staged changes of one writer.
pub struct MemoryTransaction {
    _writer: OwnedMutexGuard<()>,
    state: Arc<RwLock<MemoryState>>,
    staged: MemoryState,
}

impl MemoryTransaction {
    fn entity_mut(&mut self, entity_id: Uuid) -> StoreResult<&mut Entity> {
        self.staged
            .entities
            .get_mut(&entity_id)
            .ok_or(HierarchyError::EntityNotFound(entity_id))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_tenant(&mut self, _tenant_id: Uuid) -> StoreResult<()> {
        // The writer mutex already serializes every transaction.
        Ok(())
    }

    async fn lock_subtree(
        &mut self,
        tenant_id: Uuid,
        entity_id: Uuid,
    ) -> StoreResult<Vec<Entity>> {
        Ok(self.staged.descendants(tenant_id, &[entity_id]))
    }

    async fn get_entity(&mut self, entity_id: Uuid) -> StoreResult<Option<Entity>> {
        Ok(self.staged.entities.get(&entity_id).cloned())
    }

    async fn find_root(&mut self, tenant_id: Uuid) -> StoreResult<Option<Entity>> {
        Ok(self
            .staged
            .entities
            .values()
            .find(|e| e.tenant_id == tenant_id && e.is_root())
            .cloned())
    }

    async fn list_tenant_entities(&mut self, tenant_id: Uuid) -> StoreResult<Vec<Entity>> {
        Ok(self.staged.tenant_entities(tenant_id))
    }

    async fn insert_entity(&mut self, entity: &Entity) -> StoreResult<()> {
        if self.staged.entities.contains_key(&entity.entity_id) {
            return Err(constraint_violation("entities_pkey", entity.entity_id));
        }
        match entity.parent_entity_id {
            Some(parent_id) => {
                if !self.staged.entities.contains_key(&parent_id) {
                    return Err(constraint_violation("entities_parent_entity_id_fkey", parent_id));
                }
            }
            None => {
                let tenant_has_root = self
                    .staged
                    .entities
                    .values()
                    .any(|e| e.tenant_id == entity.tenant_id && e.is_root());
                if tenant_has_root {
                    return Err(constraint_violation("entities_single_root_idx", entity.tenant_id));
                }
            }
        }
        self.staged.entities.insert(entity.entity_id, entity.clone());
        Ok(())
    }

    async fn update_entity_position(
        &mut self,
        update: &PathUpdate,
        updated_utc: DateTime<Utc>,
    ) -> StoreResult<()> {
        if update.hierarchy_path.last() != Some(&update.entity_id) {
            return Err(constraint_violation("entities_path_ends_with_self", update.entity_id));
        }
        if usize::try_from(update.entity_level).ok() != Some(update.hierarchy_path.len()) {
            return Err(constraint_violation("entities_level_matches_path", update.entity_id));
        }
        let entity = self.entity_mut(update.entity_id)?;
        entity.parent_entity_id = update.parent_entity_id;
        entity.hierarchy_path = update.hierarchy_path.clone();
        entity.entity_level = update.entity_level;
        entity.updated_utc = updated_utc;
        Ok(())
    }

    async fn rename_entity(
        &mut self,
        entity_id: Uuid,
        entity_name: &str,
        updated_utc: DateTime<Utc>,
    ) -> StoreResult<()> {
        let entity = self.entity_mut(entity_id)?;
        entity.entity_name = entity_name.to_string();
        entity.updated_utc = updated_utc;
        Ok(())
    }

    async fn touch_entity(
        &mut self,
        entity_id: Uuid,
        updated_utc: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.entity_mut(entity_id)?.updated_utc = updated_utc;
        Ok(())
    }

    async fn delete_entity(&mut self, entity_id: Uuid) -> StoreResult<()> {
        if self
            .staged
            .entities
            .values()
            .any(|e| e.parent_entity_id == Some(entity_id))
        {
            return Err(constraint_violation("entities_parent_entity_id_fkey", entity_id));
        }
        if self
            .staged
            .assignments
            .values()
            .any(|a| a.entity_id == entity_id)
        {
            return Err(constraint_violation("assignments_entity_id_fkey", entity_id));
        }
        self.staged
            .entities
            .remove(&entity_id)
            .map(|_| ())
            .ok_or(HierarchyError::EntityNotFound(entity_id))
    }

    async fn delete_assignments_for_entities(&mut self, entity_ids: &[Uuid]) -> StoreResult<u64> {
        let before = self.staged.assignments.len();
        self.staged
            .assignments
            .retain(|_, a| !entity_ids.contains(&a.entity_id));
        let removed = before - self.staged.assignments.len();

        // ON DELETE SET NULL on the supersedes link.
        let remaining: HashSet<Uuid> = self.staged.assignments.keys().copied().collect();
        for assignment in self.staged.assignments.values_mut() {
            if assignment
                .supersedes_assignment_id
                .is_some_and(|previous| !remaining.contains(&previous))
            {
                assignment.supersedes_assignment_id = None;
            }
        }
        Ok(removed as u64)
    }

    async fn get_assignment(&mut self, assignment_id: Uuid) -> StoreResult<Option<Assignment>> {
        Ok(self.staged.assignments.get(&assignment_id).cloned())
    }

    async fn find_active_assignment(
        &mut self,
        tenant_id: Uuid,
        user_id: Uuid,
        entity_id: Uuid,
        assignment_type: AssignmentType,
    ) -> StoreResult<Option<Assignment>> {
        Ok(self
            .staged
            .assignments
            .values()
            .find(|a| a.tenant_id == tenant_id && a.grants(user_id, entity_id, assignment_type))
            .cloned())
    }

    async fn insert_assignment(&mut self, assignment: &Assignment) -> StoreResult<()> {
        if !self.staged.entities.contains_key(&assignment.entity_id) {
            return Err(constraint_violation(
                "assignments_entity_id_fkey",
                assignment.entity_id,
            ));
        }
        if assignment.is_active
            && self.staged.assignments.values().any(|a| {
                a.tenant_id == assignment.tenant_id
                    && a.grants(assignment.user_id, assignment.entity_id, assignment.assignment_type)
            })
        {
            return Err(constraint_violation(
                "assignments_active_unique_idx",
                assignment.assignment_id,
            ));
        }
        self.staged
            .assignments
            .insert(assignment.assignment_id, assignment.clone());
        Ok(())
    }

    async fn revoke_assignment(
        &mut self,
        assignment_id: Uuid,
        revoked_utc: DateTime<Utc>,
    ) -> StoreResult<()> {
        let assignment = self
            .staged
            .assignments
            .get_mut(&assignment_id)
            .ok_or(HierarchyError::AssignmentNotFound(assignment_id))?;
        assignment.is_active = false;
        assignment.revoked_utc = Some(revoked_utc);
        Ok(())
    }

    async fn bump_scope_generation(&mut self, tenant_id: Uuid) -> StoreResult<i64> {
        let generation = self.staged.scope_generations.entry(tenant_id).or_insert(0);
        *generation += 1;
        Ok(*generation)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            _writer, state, staged,
        } = *self;
        *state.write().await = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{empty_attributes, EntityType};

    fn root(tenant_id: Uuid) -> Entity {
        Entity::new_root(tenant_id, EntityType::Organization, "Root".into(), empty_attributes())
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_is_discarded() {
        let store = MemoryHierarchyStore::new();
        let tenant_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.insert_entity(&root(tenant_id)).await.unwrap();
        drop(tx);

        assert_eq!(store.entity_count().await, 0);
    }

    #[tokio::test]
    async fn test_readers_see_committed_state_only() {
        let store = MemoryHierarchyStore::new();
        let tenant_id = Uuid::new_v4();
        let entity = root(tenant_id);

        let mut tx = store.begin().await.unwrap();
        tx.insert_entity(&entity).await.unwrap();
        assert!(store.get_entity(entity.entity_id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(store.get_entity(entity.entity_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scope_generation_advances_only_on_commit() {
        let store = MemoryHierarchyStore::new();
        let tenant_id = Uuid::new_v4();
        assert_eq!(store.scope_generation(tenant_id).await.unwrap(), 0);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.bump_scope_generation(tenant_id).await.unwrap(), 1);
        drop(tx);
        assert_eq!(store.scope_generation(tenant_id).await.unwrap(), 0);

        let mut tx = store.begin().await.unwrap();
        tx.bump_scope_generation(tenant_id).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.scope_generation(tenant_id).await.unwrap(), 1);
        assert_eq!(store.scope_generation(Uuid::new_v4()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_writer_times_out() {
        let store = MemoryHierarchyStore::with_lock_timeout(Duration::from_millis(20));
        let _held = store.begin().await.unwrap();

        let result = store.begin().await;
        assert!(matches!(result, Err(HierarchyError::LockTimeout)));
    }

    #[tokio::test]
    async fn test_single_root_and_restrict_constraints() {
        let store = MemoryHierarchyStore::new();
        let tenant_id = Uuid::new_v4();
        let first = root(tenant_id);
        let child = Entity::new_child(&first, EntityType::Location, "Site".into(), empty_attributes());

        let mut tx = store.begin().await.unwrap();
        tx.insert_entity(&first).await.unwrap();
        tx.insert_entity(&child).await.unwrap();
        assert!(tx.insert_entity(&root(tenant_id)).await.is_err());
        assert!(tx.delete_entity(first.entity_id).await.is_err());

        let assignment = Assignment::new(
            tenant_id,
            Uuid::new_v4(),
            child.entity_id,
            AssignmentType::LocationAssignment,
            None,
        );
        tx.insert_assignment(&assignment).await.unwrap();
        assert!(tx.delete_entity(child.entity_id).await.is_err());

        assert_eq!(tx.delete_assignments_for_entities(&[child.entity_id]).await.unwrap(), 1);
        tx.delete_entity(child.entity_id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.entity_count().await, 1);
        assert_eq!(store.assignment_count().await, 0);
    }
}
