//! Domain models for hierarchy-service.

mod assignment;
mod entity;
mod scope;
mod tree;

pub use assignment::{Assignment, AssignmentType, CreateAssignment, SupersedeAssignment};
pub use entity::{
    empty_attributes, extend_path, path_level, CreateEntity, DeleteOptions, DeleteOutcome, Entity,
    EntityType, PathUpdate, RebuildReport,
};
pub use scope::{AccessScope, TenantRole};
pub use tree::{build_entity_tree, EntityTreeNode};
