//! Nested tree view of a tenant's entities.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::Entity;

/// Tree node with children for hierarchical response.
#[derive(Debug, Clone, Serialize)]
pub struct EntityTreeNode {
    #[serde(flatten)]
    pub entity: Entity,
    pub children: Vec<EntityTreeNode>,
}

impl EntityTreeNode {
    /// Number of nodes in this subtree, self included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(EntityTreeNode::size).sum::<usize>()
    }
}

/// Build a tree structure from a flat list of entities.
///
/// Entities whose parent is not in the list (filtered out by scope, or an
/// orphan) become top-level nodes. So does one member of every parent cycle,
/// after the regular top-level nodes, so corrupted rows stay visible. Siblings
/// are ordered by name.
pub fn build_entity_tree(entities: Vec<Entity>) -> Vec<EntityTreeNode> {
    let present: HashSet<Uuid> = entities.iter().map(|e| e.entity_id).collect();

    let mut children_map: HashMap<Uuid, Vec<Entity>> = HashMap::new();
    let mut top_level: Vec<Entity> = Vec::new();

    for entity in entities {
        match entity.parent_entity_id {
            Some(parent_id) if present.contains(&parent_id) => {
                children_map.entry(parent_id).or_default().push(entity);
            }
            _ => top_level.push(entity),
        }
    }

    fn build_subtree(
        entity: Entity,
        children_map: &mut HashMap<Uuid, Vec<Entity>>,
    ) -> EntityTreeNode {
        let mut children = children_map.remove(&entity.entity_id).unwrap_or_default();
        sort_siblings(&mut children);

        EntityTreeNode {
            children: children
                .into_iter()
                .map(|child| build_subtree(child, children_map))
                .collect(),
            entity,
        }
    }

    sort_siblings(&mut top_level);
    let mut roots: Vec<EntityTreeNode> = top_level
        .into_iter()
        .map(|entity| build_subtree(entity, &mut children_map))
        .collect();

    // Anything left is only reachable through a parent cycle.
    while let Some(entity) = take_stranded(&mut children_map) {
        tracing::warn!(
            entity_id = %entity.entity_id,
            parent_entity_id = ?entity.parent_entity_id,
            "Entity sits on a parent cycle; listing it as a top-level node"
        );
        roots.push(build_subtree(entity, &mut children_map));
    }
    roots
}

/// Remove and return the first remaining entity in sibling order.
fn take_stranded(children_map: &mut HashMap<Uuid, Vec<Entity>>) -> Option<Entity> {
    let (parent_id, index) = children_map
        .iter()
        .flat_map(|(parent_id, children)| {
            children
                .iter()
                .enumerate()
                .map(move |(index, entity)| (*parent_id, index, entity))
        })
        .min_by(|(_, _, a), (_, _, b)| sibling_order(a, b))
        .map(|(parent_id, index, _)| (parent_id, index))?;

    let siblings = children_map.get_mut(&parent_id)?;
    let entity = siblings.remove(index);
    if siblings.is_empty() {
        children_map.remove(&parent_id);
    }
    Some(entity)
}

fn sibling_order(a: &Entity, b: &Entity) -> Ordering {
    a.entity_level
        .cmp(&b.entity_level)
        .then_with(|| a.entity_name.cmp(&b.entity_name))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

fn sort_siblings(entities: &mut [Entity]) {
    entities.sort_by(sibling_order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{empty_attributes, EntityType};

    #[test]
    fn test_builds_nested_tree() {
        let root = Entity::new_root(
            Uuid::new_v4(),
            EntityType::Organization,
            "Root".into(),
            empty_attributes(),
        );
        let west = Entity::new_child(&root, EntityType::Organization, "West".into(), empty_attributes());
        let east = Entity::new_child(&root, EntityType::Organization, "East".into(), empty_attributes());
        let depot = Entity::new_child(&west, EntityType::Location, "Depot".into(), empty_attributes());

        let tree = build_entity_tree(vec![depot.clone(), west.clone(), root.clone(), east.clone()]);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].entity.entity_id, root.entity_id);
        assert_eq!(tree[0].size(), 4);
        let names: Vec<_> = tree[0].children.iter().map(|c| c.entity.entity_name.as_str()).collect();
        assert_eq!(names, vec!["East", "West"]);
        assert_eq!(tree[0].children[1].children[0].entity.entity_id, depot.entity_id);
    }

    #[test]
    fn test_missing_parent_becomes_top_level() {
        let root = Entity::new_root(
            Uuid::new_v4(),
            EntityType::Organization,
            "Root".into(),
            empty_attributes(),
        );
        let child = Entity::new_child(&root, EntityType::Organization, "Child".into(), empty_attributes());

        let tree = build_entity_tree(vec![child.clone()]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].entity.entity_id, child.entity_id);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn test_parent_cycle_is_surfaced_after_regular_roots() {
        let root = Entity::new_root(
            Uuid::new_v4(),
            EntityType::Organization,
            "Root".into(),
            empty_attributes(),
        );
        let mut a = Entity::new_child(&root, EntityType::Organization, "A".into(), empty_attributes());
        let mut b = Entity::new_child(&root, EntityType::Organization, "B".into(), empty_attributes());
        a.parent_entity_id = Some(b.entity_id);
        b.parent_entity_id = Some(a.entity_id);

        let tree = build_entity_tree(vec![b.clone(), root.clone(), a.clone()]);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].entity.entity_id, root.entity_id);
        assert_eq!(tree[1].entity.entity_id, a.entity_id);
        assert_eq!(tree[1].children.len(), 1);
        assert_eq!(tree[1].children[0].entity.entity_id, b.entity_id);
        assert!(tree[1].children[0].children.is_empty());
        assert_eq!(tree.iter().map(EntityTreeNode::size).sum::<usize>(), 3);
    }
}
