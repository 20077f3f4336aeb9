//! Entity handlers: hierarchy mutations and scope-filtered reads.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::ActorContext;
use crate::models::{
    empty_attributes, CreateEntity, DeleteOptions, DeleteOutcome, Entity, EntityTreeNode,
    EntityType, RebuildReport,
};
use crate::AppState;
use service_core::error::AppError;

// ============================================================================
// Request DTOs
// ============================================================================

/// Request to create an entity in the caller's tenant.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateEntityRequest {
    pub parent_entity_id: Option<Uuid>,
    pub entity_type: EntityType,
    #[validate(length(min = 1, max = 255))]
    pub entity_name: String,
    #[serde(default = "empty_attributes")]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RenameEntityRequest {
    #[validate(length(min = 1, max = 255))]
    pub entity_name: String,
}

/// `null` or an absent parent promotes the entity to tenant root.
#[derive(Debug, Deserialize)]
pub struct MoveEntityRequest {
    #[serde(default)]
    pub new_parent_entity_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct EntityListResponse {
    pub entities: Vec<Entity>,
    pub total: usize,
}

impl From<Vec<Entity>> for EntityListResponse {
    fn from(entities: Vec<Entity>) -> Self {
        Self {
            total: entities.len(),
            entities,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EntityTreeResponse {
    pub tenant_id: Uuid,
    pub roots: Vec<EntityTreeNode>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Load an entity the caller can see. Invisible entities look missing.
async fn load_visible(state: &AppState, actor: &ActorContext, entity_id: Uuid) -> Result<Entity, AppError> {
    let entity = state.hierarchy.get_entity(entity_id).await?;
    actor.require_same_tenant(entity.tenant_id)?;

    if !state
        .query_filter
        .can_access(actor, actor.user_id, entity_id)
        .await?
    {
        return Err(AppError::NotFound(anyhow::anyhow!("Entity {} not found", entity_id)));
    }
    Ok(entity)
}

/// Load an entity the caller administers.
async fn load_administered(
    state: &AppState,
    actor: &ActorContext,
    entity_id: Uuid,
) -> Result<Entity, AppError> {
    let entity = state.hierarchy.get_entity(entity_id).await?;
    actor.require_admin_of(entity.tenant_id)?;
    Ok(entity)
}

// ============================================================================
// Handlers
// ============================================================================

/// Create an organization or location.
///
/// POST /entities
pub async fn create_entity(
    State(state): State<AppState>,
    actor: ActorContext,
    Json(req): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<Entity>), AppError> {
    req.validate()?;
    let tenant_id = actor.require_tenant()?;
    actor.require_admin_of(tenant_id)?;

    let entity = state
        .hierarchy
        .create_entity(
            CreateEntity {
                tenant_id,
                parent_entity_id: req.parent_entity_id,
                entity_type: req.entity_type,
                entity_name: req.entity_name,
                attributes: req.attributes,
            },
            actor.user_id,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(entity)))
}

/// GET /entities/:entity_id
pub async fn get_entity(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(entity_id): Path<Uuid>,
) -> Result<Json<Entity>, AppError> {
    Ok(Json(load_visible(&state, &actor, entity_id).await?))
}

/// Rename an entity.
///
/// PATCH /entities/:entity_id
pub async fn rename_entity(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(entity_id): Path<Uuid>,
    Json(req): Json<RenameEntityRequest>,
) -> Result<Json<Entity>, AppError> {
    req.validate()?;
    load_administered(&state, &actor, entity_id).await?;

    let entity = state
        .hierarchy
        .rename_entity(entity_id, &req.entity_name, actor.user_id)
        .await?;
    Ok(Json(entity))
}

/// Move an entity with its subtree.
///
/// POST /entities/:entity_id/move
pub async fn move_entity(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(entity_id): Path<Uuid>,
    Json(req): Json<MoveEntityRequest>,
) -> Result<Json<Entity>, AppError> {
    load_administered(&state, &actor, entity_id).await?;

    let entity = state
        .hierarchy
        .move_entity(entity_id, req.new_parent_entity_id, actor.user_id)
        .await?;
    Ok(Json(entity))
}

/// Delete an entity; `?cascade=true` removes its subtree too.
///
/// DELETE /entities/:entity_id
pub async fn delete_entity(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(entity_id): Path<Uuid>,
    Query(options): Query<DeleteOptions>,
) -> Result<Json<DeleteOutcome>, AppError> {
    load_administered(&state, &actor, entity_id).await?;

    let outcome = state
        .hierarchy
        .delete_entity(entity_id, actor.user_id, options)
        .await?;
    Ok(Json(outcome))
}

/// Breadcrumb, root first.
///
/// GET /entities/:entity_id/ancestors
pub async fn list_ancestors(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(entity_id): Path<Uuid>,
) -> Result<Json<EntityListResponse>, AppError> {
    load_visible(&state, &actor, entity_id).await?;

    let ancestors = state.hierarchy.list_ancestors(entity_id).await?;
    let visible = state
        .query_filter
        .filter_rows(&actor, actor.user_id, actor.tenant_id, ancestors)
        .await?;
    Ok(Json(visible.into()))
}

/// GET /entities/:entity_id/descendants
pub async fn list_descendants(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(entity_id): Path<Uuid>,
) -> Result<Json<EntityListResponse>, AppError> {
    load_visible(&state, &actor, entity_id).await?;

    let descendants = state.hierarchy.list_descendants(entity_id).await?;
    let visible = state
        .query_filter
        .filter_rows(&actor, actor.user_id, actor.tenant_id, descendants)
        .await?;
    Ok(Json(visible.into()))
}

/// Entities of a tenant the caller may see.
///
/// GET /tenants/:tenant_id/entities
pub async fn list_tenant_entities(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<EntityListResponse>, AppError> {
    actor.require_same_tenant(tenant_id)?;

    let entities = state
        .query_filter
        .visible_entities(&actor, actor.user_id, Some(tenant_id))
        .await?;
    Ok(Json(entities.into()))
}

/// Nested tree filtered by the caller's scope.
///
/// GET /tenants/:tenant_id/tree
pub async fn get_tenant_tree(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<EntityTreeResponse>, AppError> {
    actor.require_same_tenant(tenant_id)?;

    let roots = state
        .query_filter
        .hierarchy_tree(&actor, tenant_id, Some(actor.user_id))
        .await?;
    Ok(Json(EntityTreeResponse { tenant_id, roots }))
}

/// Recompute all paths of a tenant.
///
/// POST /tenants/:tenant_id/rebuild
pub async fn rebuild_tenant_paths(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<RebuildReport>, AppError> {
    actor.require_admin_of(tenant_id)?;

    let report = state.hierarchy.rebuild_all_hierarchy_paths(tenant_id).await?;
    Ok(Json(report))
}
