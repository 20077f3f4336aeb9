//! Assignment handlers.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::ActorContext;
use crate::models::{Assignment, AssignmentType, CreateAssignment, SupersedeAssignment};
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CreateAssignmentRequest {
    pub user_id: Uuid,
    pub entity_id: Uuid,
    pub assignment_type: AssignmentType,
}

#[derive(Debug, Deserialize)]
pub struct ListAssignmentsQuery {
    #[serde(default = "default_active_only")]
    pub active_only: bool,
}

fn default_active_only() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct AssignmentListResponse {
    pub assignments: Vec<Assignment>,
    pub total: usize,
}

/// Load an assignment the caller administers.
async fn load_administered(
    state: &AppState,
    actor: &ActorContext,
    assignment_id: Uuid,
) -> Result<Assignment, AppError> {
    let assignment = state.assignments.get_assignment(assignment_id).await?;
    actor.require_admin_of(assignment.tenant_id)?;
    Ok(assignment)
}

/// Grant a user direct access to an entity of the caller's tenant.
///
/// POST /assignments
pub async fn create_assignment(
    State(state): State<AppState>,
    actor: ActorContext,
    Json(req): Json<CreateAssignmentRequest>,
) -> Result<(StatusCode, Json<Assignment>), AppError> {
    let tenant_id = actor.require_tenant()?;
    actor.require_admin_of(tenant_id)?;

    let assignment = state
        .assignments
        .create_assignment(
            CreateAssignment {
                tenant_id,
                user_id: req.user_id,
                entity_id: req.entity_id,
                assignment_type: req.assignment_type,
            },
            actor.user_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// POST /assignments/:assignment_id/revoke
pub async fn revoke_assignment(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(assignment_id): Path<Uuid>,
) -> Result<Json<Assignment>, AppError> {
    load_administered(&state, &actor, assignment_id).await?;

    let assignment = state
        .assignments
        .revoke_assignment(assignment_id, actor.user_id)
        .await?;
    Ok(Json(assignment))
}

/// Replace an assignment; the response is the new record.
///
/// POST /assignments/:assignment_id/supersede
pub async fn supersede_assignment(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(assignment_id): Path<Uuid>,
    Json(req): Json<SupersedeAssignment>,
) -> Result<(StatusCode, Json<Assignment>), AppError> {
    load_administered(&state, &actor, assignment_id).await?;

    let successor = state
        .assignments
        .supersede_assignment(assignment_id, req, actor.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(successor)))
}

/// A user's assignments. Admins may list anyone in their tenant; other
/// callers only themselves.
///
/// GET /tenants/:tenant_id/users/:user_id/assignments
pub async fn list_user_assignments(
    State(state): State<AppState>,
    actor: ActorContext,
    Path((tenant_id, user_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ListAssignmentsQuery>,
) -> Result<Json<AssignmentListResponse>, AppError> {
    actor.require_same_tenant(tenant_id)?;
    if actor.user_id != user_id {
        actor.require_admin_of(tenant_id)?;
    }

    let assignments = state
        .assignments
        .list_user_assignments(tenant_id, user_id, query.active_only)
        .await?;
    Ok(Json(AssignmentListResponse {
        total: assignments.len(),
        assignments,
    }))
}
