mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{sample_tree, TestHarness};
use hierarchy_service::build_router;
use hierarchy_service::middleware::actor::{TENANT_ID_HEADER, USER_ID_HEADER, USER_ROLES_HEADER};
use hierarchy_service::models::AssignmentType;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

struct Caller {
    user_id: Uuid,
    tenant_id: Option<Uuid>,
    roles: &'static str,
}

impl Caller {
    fn admin(harness: &TestHarness) -> Self {
        Self {
            user_id: harness.admin_id,
            tenant_id: Some(harness.tenant_id),
            roles: "tenant_admin",
        }
    }

    fn member(harness: &TestHarness, user_id: Uuid) -> Self {
        Self {
            user_id,
            tenant_id: Some(harness.tenant_id),
            roles: "member",
        }
    }
}

async fn send(
    app: &Router,
    caller: Option<&Caller>,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder
            .header(USER_ID_HEADER, caller.user_id.to_string())
            .header(USER_ROLES_HEADER, caller.roles);
        if let Some(tenant_id) = caller.tenant_id {
            builder = builder.header(TENANT_ID_HEADER, tenant_id.to_string());
        }
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_needs_no_actor() {
    let harness = TestHarness::new();
    let app = build_router(harness.state.clone());

    let (status, body) = send(&app, None, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "hierarchy-service");

    let (status, _) = send(&app, None, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_actor_is_unauthorized() {
    let harness = TestHarness::new();
    let app = build_router(harness.state.clone());

    let (status, _) = send(&app, None, "GET", "/scope", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_builds_and_moves_entities() {
    let harness = TestHarness::new();
    let app = build_router(harness.state.clone());
    let admin = Caller::admin(&harness);

    let (status, root) = send(
        &app,
        Some(&admin),
        "POST",
        "/entities",
        Some(json!({ "entity_type": "organization", "entity_name": "Acme" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let root_id = root["entity_id"].as_str().unwrap().to_string();

    let (status, west) = send(
        &app,
        Some(&admin),
        "POST",
        "/entities",
        Some(json!({ "parent_entity_id": root_id, "entity_type": "organization", "entity_name": "West" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(west["entity_level"], 2);
    let west_id = west["entity_id"].as_str().unwrap().to_string();

    let (status, site) = send(
        &app,
        Some(&admin),
        "POST",
        "/entities",
        Some(json!({ "parent_entity_id": west_id, "entity_type": "location", "entity_name": "Depot" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let site_id = site["entity_id"].as_str().unwrap().to_string();

    // A second root is a conflict with a machine-readable code.
    let (status, body) = send(
        &app,
        Some(&admin),
        "POST",
        "/entities",
        Some(json!({ "entity_type": "organization", "entity_name": "Other" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "root_already_exists");

    // Nothing may sit below a location.
    let (status, body) = send(
        &app,
        Some(&admin),
        "POST",
        &format!("/entities/{west_id}/move"),
        Some(json!({ "new_parent_entity_id": site_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_parent");

    let (status, body) = send(
        &app,
        Some(&admin),
        "POST",
        &format!("/entities/{root_id}/move"),
        Some(json!({ "new_parent_entity_id": west_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "cycle_detected");

    let (status, tree) = send(
        &app,
        Some(&admin),
        "GET",
        &format!("/tenants/{}/tree", harness.tenant_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tree["roots"][0]["entity_name"], "Acme");
    assert_eq!(tree["roots"][0]["children"][0]["children"][0]["entity_name"], "Depot");
}

#[tokio::test]
async fn test_invalid_payload_is_unprocessable() {
    let harness = TestHarness::new();
    let app = build_router(harness.state.clone());

    let (status, body) = send(
        &app,
        Some(&Caller::admin(&harness)),
        "POST",
        "/entities",
        Some(json!({ "entity_type": "organization", "entity_name": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_members_cannot_mutate() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let app = build_router(harness.state.clone());
    let member = Caller::member(&harness, Uuid::new_v4());

    let (status, _) = send(
        &app,
        Some(&member),
        "PATCH",
        &format!("/entities/{}", tree.a.entity_id),
        Some(json!({ "entity_name": "Mine now" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        Some(&member),
        "POST",
        "/assignments",
        Some(json!({
            "user_id": member.user_id,
            "entity_id": tree.a.entity_id,
            "assignment_type": "membership"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_member_reads_are_scoped() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let user = Uuid::new_v4();
    harness.assign(user, &tree.a, AssignmentType::Membership).await;
    let app = build_router(harness.state.clone());
    let member = Caller::member(&harness, user);

    let (status, body) = send(
        &app,
        Some(&member),
        "GET",
        &format!("/tenants/{}/entities", harness.tenant_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 4);

    let (status, _) = send(
        &app,
        Some(&member),
        "GET",
        &format!("/entities/{}", tree.b.entity_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        Some(&member),
        "GET",
        &format!("/scope/entities/{}", tree.c.entity_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can_access"], true);

    let (status, body) = send(&app, Some(&member), "GET", "/scope", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "scoped");
    assert_eq!(body["context"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        Some(&member),
        "GET",
        &format!("/entities/{}/ancestors", tree.c.entity_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_other_tenant_is_forbidden() {
    let harness = TestHarness::new();
    sample_tree(&harness).await;
    let app = build_router(harness.state.clone());
    let outsider = Caller {
        user_id: Uuid::new_v4(),
        tenant_id: Some(Uuid::new_v4()),
        roles: "tenant_admin",
    };

    let (status, _) = send(
        &app,
        Some(&outsider),
        "GET",
        &format!("/tenants/{}/entities", harness.tenant_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_access_check_stays_within_callers_tenant() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let user = Uuid::new_v4();
    harness.assign(user, &tree.a, AssignmentType::Membership).await;
    let app = build_router(harness.state.clone());

    let elsewhere = Caller {
        user_id: user,
        tenant_id: Some(Uuid::new_v4()),
        roles: "member",
    };
    let (status, _) = send(
        &app,
        Some(&elsewhere),
        "GET",
        &format!("/scope/entities/{}", tree.c.entity_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let member = Caller::member(&harness, user);
    let (status, body) = send(
        &app,
        Some(&member),
        "GET",
        &format!("/scope/entities/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can_access"], false);
}

#[tokio::test]
async fn test_missing_tenant_is_an_internal_error() {
    let harness = TestHarness::new();
    let app = build_router(harness.state.clone());
    let caller = Caller {
        user_id: Uuid::new_v4(),
        tenant_id: None,
        roles: "member",
    };

    let (status, _) = send(&app, Some(&caller), "GET", "/scope", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_assignment_lifecycle_over_http() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let app = build_router(harness.state.clone());
    let admin = Caller::admin(&harness);
    let user = Uuid::new_v4();

    let (status, created) = send(
        &app,
        Some(&admin),
        "POST",
        "/assignments",
        Some(json!({
            "user_id": user,
            "entity_id": tree.l1.entity_id,
            "assignment_type": "location_assignment"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let assignment_id = created["assignment_id"].as_str().unwrap().to_string();

    let (status, successor) = send(
        &app,
        Some(&admin),
        "POST",
        &format!("/assignments/{assignment_id}/supersede"),
        Some(json!({ "entity_id": tree.l2.entity_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(successor["supersedes_assignment_id"], assignment_id.as_str());

    let (status, body) = send(
        &app,
        Some(&admin),
        "POST",
        &format!("/assignments/{assignment_id}/revoke"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "assignment_inactive");

    // Users may list their own assignments, including history.
    let member = Caller::member(&harness, user);
    let (status, body) = send(
        &app,
        Some(&member),
        "GET",
        &format!(
            "/tenants/{}/users/{}/assignments?active_only=false",
            harness.tenant_id, user
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, _) = send(
        &app,
        Some(&Caller::member(&harness, Uuid::new_v4())),
        "GET",
        &format!("/tenants/{}/users/{}/assignments", harness.tenant_id, user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cascade_delete_over_http() {
    let harness = TestHarness::new();
    let tree = sample_tree(&harness).await;
    let app = build_router(harness.state.clone());
    let admin = Caller::admin(&harness);

    let (status, body) = send(
        &app,
        Some(&admin),
        "DELETE",
        &format!("/entities/{}", tree.b.entity_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "has_children");

    let (status, body) = send(
        &app,
        Some(&admin),
        "DELETE",
        &format!("/entities/{}?cascade=true", tree.b.entity_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_entity_ids"].as_array().unwrap().len(), 2);
    assert_eq!(harness.store.entity_count().await, 4);
}
