//! hierarchy-service: tenant entity hierarchy and access-scope engine.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::middleware::actor_context_middleware;
use crate::services::{
    AssignmentService, HierarchyManager, HierarchyStore, QueryFilter, ScopeCache, ScopeResolver,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn HierarchyStore>,
    pub hierarchy: HierarchyManager,
    pub assignments: AssignmentService,
    pub scopes: ScopeResolver,
    pub query_filter: QueryFilter,
}

impl AppState {
    /// Wire every engine component to one store and one scope cache.
    pub fn new(store: Arc<dyn HierarchyStore>, cache: Arc<ScopeCache>) -> Self {
        let scopes = ScopeResolver::new(store.clone(), cache.clone());
        Self {
            hierarchy: HierarchyManager::new(store.clone(), cache.clone()),
            assignments: AssignmentService::new(store.clone(), cache),
            query_filter: QueryFilter::new(store.clone(), scopes.clone()),
            scopes,
            store,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/entities", post(handlers::entity::create_entity))
        .route(
            "/entities/:entity_id",
            get(handlers::entity::get_entity)
                .patch(handlers::entity::rename_entity)
                .delete(handlers::entity::delete_entity),
        )
        .route("/entities/:entity_id/move", post(handlers::entity::move_entity))
        .route(
            "/entities/:entity_id/ancestors",
            get(handlers::entity::list_ancestors),
        )
        .route(
            "/entities/:entity_id/descendants",
            get(handlers::entity::list_descendants),
        )
        .route(
            "/tenants/:tenant_id/entities",
            get(handlers::entity::list_tenant_entities),
        )
        .route("/tenants/:tenant_id/tree", get(handlers::entity::get_tenant_tree))
        .route(
            "/tenants/:tenant_id/rebuild",
            post(handlers::entity::rebuild_tenant_paths),
        )
        .route(
            "/tenants/:tenant_id/users/:user_id/assignments",
            get(handlers::assignment::list_user_assignments),
        )
        .route("/assignments", post(handlers::assignment::create_assignment))
        .route(
            "/assignments/:assignment_id/revoke",
            post(handlers::assignment::revoke_assignment),
        )
        .route(
            "/assignments/:assignment_id/supersede",
            post(handlers::assignment::supersede_assignment),
        )
        .route("/scope", get(handlers::scope::get_scope))
        .route(
            "/scope/entities/:entity_id",
            get(handlers::scope::check_access),
        )
        .layer(from_fn(actor_context_middleware));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        .merge(api_routes)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
