//! Scope handlers: what the caller may see.

use axum::extract::{Json, Path, State};
use serde::Serialize;
use uuid::Uuid;

use crate::middleware::ActorContext;
use crate::models::AccessScope;
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Serialize)]
pub struct AccessCheckResponse {
    pub entity_id: Uuid,
    pub can_access: bool,
}

/// The caller's resolved scope in their tenant.
///
/// GET /scope
pub async fn get_scope(
    State(state): State<AppState>,
    actor: ActorContext,
) -> Result<Json<AccessScope>, AppError> {
    let scope = state
        .scopes
        .resolve_scope(&actor, actor.user_id, actor.tenant_id)
        .await?;
    Ok(Json(scope))
}

/// Whether the caller may access an entity of their own tenant. Unknown
/// entities are reported as not accessible.
///
/// GET /scope/entities/:entity_id
pub async fn check_access(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(entity_id): Path<Uuid>,
) -> Result<Json<AccessCheckResponse>, AppError> {
    let can_access = match state.store.get_entity(entity_id).await? {
        None => {
            actor.require_tenant()?;
            false
        }
        Some(entity) => {
            actor.require_same_tenant(entity.tenant_id)?;
            state
                .query_filter
                .can_access(&actor, actor.user_id, entity_id)
                .await?
        }
    };
    Ok(Json(AccessCheckResponse {
        entity_id,
        can_access,
    }))
}
