//! Entity model - organizations and locations in a tenant hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Organization,
    Location,
}

impl EntityType {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Location => "location",
        }
    }

    /// Parse the database representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "organization" => Some(Self::Organization),
            "location" => Some(Self::Location),
            _ => None,
        }
    }

    /// Only organizations may have children.
    pub fn can_parent(&self) -> bool {
        matches!(self, Self::Organization)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node of a tenant's hierarchy.
///
/// `hierarchy_path` and `entity_level` are derived state owned by the
/// hierarchy manager: the path lists every ancestor from the root down to and
/// including the entity itself, and the level is the path length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: Uuid,
    pub tenant_id: Uuid,
    pub entity_type: EntityType,
    pub parent_entity_id: Option<Uuid>,
    pub entity_level: i32,
    pub hierarchy_path: Vec<Uuid>,
    pub entity_name: String,
    pub attributes: serde_json::Value,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Entity {
    /// Create a tenant root.
    pub fn new_root(
        tenant_id: Uuid,
        entity_type: EntityType,
        entity_name: String,
        attributes: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let entity_id = Uuid::new_v4();
        Self {
            entity_id,
            tenant_id,
            entity_type,
            parent_entity_id: None,
            entity_level: 1,
            hierarchy_path: vec![entity_id],
            entity_name,
            attributes,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Create a child positioned directly under `parent`.
    pub fn new_child(
        parent: &Entity,
        entity_type: EntityType,
        entity_name: String,
        attributes: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let entity_id = Uuid::new_v4();
        let hierarchy_path = extend_path(&parent.hierarchy_path, entity_id);
        Self {
            entity_id,
            tenant_id: parent.tenant_id,
            entity_type,
            parent_entity_id: Some(parent.entity_id),
            entity_level: path_level(&hierarchy_path),
            hierarchy_path,
            entity_name,
            attributes,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Check if this is a root node.
    pub fn is_root(&self) -> bool {
        self.parent_entity_id.is_none()
    }

    /// Ancestors from the root down to the parent, excluding self.
    pub fn ancestor_ids(&self) -> &[Uuid] {
        match self.hierarchy_path.split_last() {
            Some((_, ancestors)) => ancestors,
            None => &[],
        }
    }

    /// Whether `self` is a strict ancestor of `other` (path prefix check).
    pub fn is_ancestor_of(&self, other: &Entity) -> bool {
        self.tenant_id == other.tenant_id
            && other.hierarchy_path.len() > self.hierarchy_path.len()
            && other.hierarchy_path.starts_with(&self.hierarchy_path)
    }

    /// Whether `ancestor_id` appears above this entity in its path.
    pub fn has_ancestor(&self, ancestor_id: Uuid) -> bool {
        self.ancestor_ids().contains(&ancestor_id)
    }

    /// Whether the entity is `entity_id` itself or one of its descendants.
    pub fn is_within(&self, entity_id: Uuid) -> bool {
        self.hierarchy_path.contains(&entity_id)
    }

    /// Path this entity gets when the subtree rooted at `moved_id` is
    /// re-attached below `new_prefix`. Returns `None` if the entity is not in
    /// that subtree.
    pub fn rebased_path(&self, moved_id: Uuid, new_prefix: &[Uuid]) -> Option<Vec<Uuid>> {
        let offset = self.hierarchy_path.iter().position(|id| *id == moved_id)?;
        let mut path = Vec::with_capacity(new_prefix.len() + self.hierarchy_path.len() - offset);
        path.extend_from_slice(new_prefix);
        path.extend_from_slice(&self.hierarchy_path[offset..]);
        Some(path)
    }
}

/// Append `entity_id` to a parent path.
pub fn extend_path(parent_path: &[Uuid], entity_id: Uuid) -> Vec<Uuid> {
    let mut path = Vec::with_capacity(parent_path.len() + 1);
    path.extend_from_slice(parent_path);
    path.push(entity_id);
    path
}

/// Level for a path; root = 1.
pub fn path_level(path: &[Uuid]) -> i32 {
    i32::try_from(path.len()).unwrap_or(i32::MAX)
}

/// Input for creating a new entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntity {
    pub tenant_id: Uuid,
    pub parent_entity_id: Option<Uuid>,
    pub entity_type: EntityType,
    pub entity_name: String,
    #[serde(default = "empty_attributes")]
    pub attributes: serde_json::Value,
}

pub fn empty_attributes() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// New position of one entity after a move or rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathUpdate {
    pub entity_id: Uuid,
    pub parent_entity_id: Option<Uuid>,
    pub hierarchy_path: Vec<Uuid>,
    pub entity_level: i32,
}

/// Options for deleting an entity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DeleteOptions {
    #[serde(default)]
    pub cascade: bool,
}

/// What a delete removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// Removed entities, leaf-first.
    pub deleted_entity_ids: Vec<Uuid>,
    pub removed_assignment_count: u64,
}

/// Result of a full path rebuild for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub tenant_id: Uuid,
    pub updated_count: usize,
    /// Entities not reachable from any root. Reported, never deleted.
    pub orphans: Vec<Uuid>,
}
