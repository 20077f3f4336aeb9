use axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::AssignmentType;

/// PostgreSQL `lock_not_available`, raised when `lock_timeout` expires.
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";

pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Why a parent was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidParentReason {
    /// Parent does not exist.
    NotFound,
    /// Parent belongs to another tenant.
    DifferentTenant,
    /// Locations cannot have children.
    LocationParent,
    /// Locations must be attached to an organization.
    LocationWithoutParent,
}

impl std::fmt::Display for InvalidParentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidParentReason::NotFound => write!(f, "parent entity does not exist"),
            InvalidParentReason::DifferentTenant => {
                write!(f, "parent entity belongs to a different tenant")
            }
            InvalidParentReason::LocationParent => write!(f, "a location cannot be a parent"),
            InvalidParentReason::LocationWithoutParent => {
                write!(f, "a location must be attached to an organization")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("Invalid parent: {reason}")]
    InvalidParent {
        parent_entity_id: Option<Uuid>,
        reason: InvalidParentReason,
    },

    #[error("Moving {entity_id} under {new_parent_entity_id} would make it its own ancestor")]
    CycleDetected {
        entity_id: Uuid,
        new_parent_entity_id: Uuid,
    },

    #[error("Entity belongs to tenant {entity_tenant_id} but target belongs to tenant {target_tenant_id}")]
    CrossTenant {
        entity_tenant_id: Uuid,
        target_tenant_id: Uuid,
    },

    #[error("Entity {entity_id} has {descendant_count} descendant(s); delete with cascade to remove them")]
    HasChildren {
        entity_id: Uuid,
        descendant_count: usize,
    },

    #[error("Tenant {tenant_id} already has root entity {root_entity_id}")]
    RootAlreadyExists { tenant_id: Uuid, root_entity_id: Uuid },

    #[error("Tenant context is missing")]
    MissingTenantContext,

    #[error("Timed out waiting for the hierarchy lock; retry the request")]
    LockTimeout,

    #[error("Entity {0} not found")]
    EntityNotFound(Uuid),

    #[error("Assignment {0} not found")]
    AssignmentNotFound(Uuid),

    #[error("Assignment {0} is no longer active")]
    AssignmentInactive(Uuid),

    #[error("User {user_id} already holds an active {assignment_type} assignment on {entity_id}")]
    DuplicateAssignment {
        user_id: Uuid,
        entity_id: Uuid,
        assignment_type: AssignmentType,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HierarchyError {
    /// Stable machine-readable code naming the violated rule.
    pub fn code(&self) -> &'static str {
        match self {
            HierarchyError::InvalidParent { .. } => "invalid_parent",
            HierarchyError::CycleDetected { .. } => "cycle_detected",
            HierarchyError::CrossTenant { .. } => "cross_tenant",
            HierarchyError::HasChildren { .. } => "has_children",
            HierarchyError::RootAlreadyExists { .. } => "root_already_exists",
            HierarchyError::MissingTenantContext => "missing_tenant_context",
            HierarchyError::LockTimeout => "lock_timeout",
            HierarchyError::EntityNotFound(_) => "entity_not_found",
            HierarchyError::AssignmentNotFound(_) => "assignment_not_found",
            HierarchyError::AssignmentInactive(_) => "assignment_inactive",
            HierarchyError::DuplicateAssignment { .. } => "duplicate_assignment",
            HierarchyError::InvalidInput(_) => "invalid_input",
            HierarchyError::Database(_) => "database_error",
            HierarchyError::Internal(_) => "internal_error",
        }
    }

    /// The caller may retry with backoff. The engine never retries itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HierarchyError::LockTimeout)
    }

    /// A request the engine refused because it breaks a hierarchy or
    /// assignment rule, as opposed to an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            HierarchyError::Database(_)
                | HierarchyError::Internal(_)
                | HierarchyError::MissingTenantContext
        )
    }
}

impl From<sqlx::Error> for HierarchyError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some(PG_LOCK_NOT_AVAILABLE) {
                return HierarchyError::LockTimeout;
            }
        }
        HierarchyError::Database(err)
    }
}

impl From<HierarchyError> for AppError {
    fn from(err: HierarchyError) -> Self {
        let code = err.code();
        match err {
            HierarchyError::InvalidParent { .. }
            | HierarchyError::CrossTenant { .. }
            | HierarchyError::InvalidInput(_) => {
                AppError::rejected(StatusCode::BAD_REQUEST, code, err.to_string())
            }
            HierarchyError::CycleDetected { .. }
            | HierarchyError::HasChildren { .. }
            | HierarchyError::RootAlreadyExists { .. }
            | HierarchyError::AssignmentInactive(_)
            | HierarchyError::DuplicateAssignment { .. }
            | HierarchyError::LockTimeout => {
                AppError::rejected(StatusCode::CONFLICT, code, err.to_string())
            }
            HierarchyError::EntityNotFound(_) | HierarchyError::AssignmentNotFound(_) => {
                AppError::rejected(StatusCode::NOT_FOUND, code, err.to_string())
            }
            HierarchyError::MissingTenantContext => {
                tracing::error!("Request reached the hierarchy engine without a tenant context");
                AppError::InternalError(anyhow::anyhow!(err))
            }
            HierarchyError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            HierarchyError::Internal(e) => AppError::InternalError(e),
        }
    }
}
