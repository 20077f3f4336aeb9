//! Actor context middleware.
//!
//! The upstream gateway authenticates the caller and forwards who they are in
//! trusted headers:
//! - `x-user-id`: the actor (required)
//! - `x-tenant-id`: the tenant the request runs in
//! - `x-user-roles`: comma-separated tenant roles, e.g. `tenant_admin`

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::TenantRole;
use crate::services::{HierarchyError, RoleProvider};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Authenticated actor of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub roles: Vec<TenantRole>,
}

impl ActorContext {
    pub fn new(user_id: Uuid, tenant_id: Option<Uuid>, roles: Vec<TenantRole>) -> Self {
        Self {
            user_id,
            tenant_id,
            roles,
        }
    }

    /// Parse the gateway headers. Unknown role names are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let user_id = header_uuid(headers, USER_ID_HEADER)?.ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
        })?;
        let tenant_id = header_uuid(headers, TENANT_ID_HEADER)?;

        let roles = headers
            .get(USER_ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|raw| raw.split(',').filter_map(TenantRole::parse).collect())
            .unwrap_or_default();

        Ok(Self::new(user_id, tenant_id, roles))
    }

    /// Tenant of the request, or `MissingTenantContext`.
    pub fn require_tenant(&self) -> Result<Uuid, HierarchyError> {
        self.tenant_id.ok_or(HierarchyError::MissingTenantContext)
    }

    pub fn is_tenant_admin_of(&self, tenant_id: Uuid) -> bool {
        self.tenant_id == Some(tenant_id) && self.roles.contains(&TenantRole::TenantAdmin)
    }

    /// Mutations are reserved to admins of the tenant that owns the target.
    pub fn require_admin_of(&self, tenant_id: Uuid) -> Result<(), AppError> {
        if self.is_tenant_admin_of(tenant_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Tenant admin role required for tenant {}",
                tenant_id
            )))
        }
    }

    /// Reads of another tenant are refused outright.
    pub fn require_same_tenant(&self, tenant_id: Uuid) -> Result<(), AppError> {
        match self.tenant_id {
            Some(own) if own == tenant_id => Ok(()),
            Some(_) => Err(AppError::Forbidden(anyhow::anyhow!(
                "Tenant {} is outside the caller's tenant",
                tenant_id
            ))),
            None => Err(HierarchyError::MissingTenantContext.into()),
        }
    }
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, AppError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid {} header", name))),
    }
}

/// Roles carried by the request apply only to its own actor and tenant.
#[async_trait]
impl RoleProvider for ActorContext {
    async fn roles_for(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<TenantRole>, HierarchyError> {
        if self.user_id == user_id && self.tenant_id == Some(tenant_id) {
            Ok(self.roles.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

/// Middleware that parses the actor headers into request extensions.
pub async fn actor_context_middleware(mut request: Request, next: Next) -> Response {
    match ActorContext::from_headers(request.headers()) {
        Ok(actor) => {
            tracing::debug!(
                user_id = %actor.user_id,
                tenant_id = ?actor.tenant_id,
                "Actor context extracted"
            );
            request.extensions_mut().insert(actor);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ActorContext>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Actor context not found")))
    }
}
