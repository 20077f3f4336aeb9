//! Services for hierarchy-service.

pub mod assignments;
pub mod cache;
pub mod database;
pub mod error;
pub mod filter;
pub mod hierarchy;
pub mod memory;
pub mod metrics;
pub mod roles;
pub mod scope;
pub mod store;

pub use assignments::AssignmentService;
pub use cache::ScopeCache;
pub use database::PgHierarchyStore;
pub use error::{HierarchyError, HierarchyResult, InvalidParentReason};
pub use filter::{filter_by_scope, scope_predicate, QueryFilter, ScopePredicate, ScopedRow};
pub use hierarchy::{plan_rebuild, plan_subtree_move, HierarchyManager, RebuildPlan};
pub use memory::MemoryHierarchyStore;
pub use metrics::{get_metrics, init_metrics};
pub use roles::{RoleProvider, StaticRoleProvider};
pub use scope::ScopeResolver;
pub use store::{HierarchyStore, StoreTransaction};
