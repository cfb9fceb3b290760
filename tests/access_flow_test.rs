//! End-to-end access checks against an on-disk identity store

use admin_portal::auth::hash_password;
use admin_portal::identity::NewUser;
use admin_portal::session::SESSION_DATA_COOKIE;
use admin_portal::{
    AppState, AuthConfig, IdentityProvider, PolicyTable, PortalServer, Role, ServerConfig,
    SqliteIdentityStore,
};
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const PASSWORD: &str = "secure-password-123";

struct Portal {
    _dir: TempDir,
    store: Arc<SqliteIdentityStore>,
    app: Router,
}

fn portal() -> Portal {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteIdentityStore::open(&dir.path().join("portal.db")).unwrap());
    let provider: Arc<dyn IdentityProvider> = store.clone();
    let state = AppState::new(
        provider,
        PolicyTable::default(),
        AuthConfig {
            secret: "integration-secret-at-least-32-chars".to_string(),
            secure_cookies: false,
            session_ttl: Duration::days(7),
            cookie_cache_ttl: Duration::minutes(5),
            trust_proxy_headers: false,
        },
    );
    let app = PortalServer::new(ServerConfig::default(), state).build_router();
    Portal {
        _dir: dir,
        store,
        app,
    }
}

async fn seed(portal: &Portal, name: &str, email: &str, role: Role) -> String {
    portal
        .store
        .create_user(NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: hash_password(PASSWORD).unwrap(),
            role,
            email_verified: true,
        })
        .await
        .unwrap()
        .id
}

/// Sign in over HTTP and return the `Cookie` header value to replay
async fn sign_in(portal: &Portal, email: &str) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/sign-in/email")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "email": email, "password": PASSWORD }).to_string(),
        ))
        .unwrap();
    let response = portal.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

async fn rpc(portal: &Portal, procedure: &str, cookie: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/rpc/{}", procedure))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, cookie)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = portal.app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn page(portal: &Portal, uri: &str, cookie: &str) -> Response {
    let request = Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    portal.app.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn test_admin_signs_in_and_lists_users() {
    let portal = portal();
    seed(&portal, "Root", "root@example.com", Role::Admin).await;
    seed(&portal, "Jane", "jane@example.com", Role::Visitor).await;

    let cookie = sign_in(&portal, "root@example.com").await;
    assert!(cookie.contains(SESSION_DATA_COOKIE));

    let (status, json) = rpc(&portal, "admin/getUsers", &cookie, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);

    let (status, json) = rpc(&portal, "auth/me", &cookie, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["role"], "admin");
}

#[tokio::test]
async fn test_visitor_is_forbidden_from_admin_procedures() {
    let portal = portal();
    seed(&portal, "Jane", "jane@example.com", Role::Visitor).await;

    let cookie = sign_in(&portal, "jane@example.com").await;
    let (status, json) = rpc(&portal, "admin/getUsers", &cookie, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "FORBIDDEN");

    let (status, json) = rpc(&portal, "admin/getUsers", "", json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_downgrade_takes_effect_on_next_procedure_call() {
    let portal = portal();
    let root_id = seed(&portal, "Root", "root@example.com", Role::Admin).await;
    let cookie = sign_in(&portal, "root@example.com").await;

    portal
        .store
        .update_user_role(&root_id, Role::Visitor)
        .await
        .unwrap();

    // Procedures read the store, not the cookie cache
    let (status, json) = rpc(&portal, "admin/getUsers", &cookie, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "FORBIDDEN");

    // The edge still trusts the cached admin role, the page itself does not
    let response = page(&portal, "/dashboard/manage-users", &cookie).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_expired_ban_is_swept_on_next_request() {
    let portal = portal();
    seed(&portal, "Root", "root@example.com", Role::Admin).await;
    let spammer = seed(&portal, "Spammer", "spam@example.com", Role::Visitor).await;
    let cookie = sign_in(&portal, "root@example.com").await;

    portal
        .store
        .ban_user(&spammer, Some("spamming"), Some(Utc::now() - Duration::minutes(1)))
        .await
        .unwrap();
    assert!(portal.store.get_user(&spammer).await.unwrap().unwrap().banned);

    let (status, _) = rpc(&portal, "admin/getUsers", &cookie, json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let user = portal.store.get_user(&spammer).await.unwrap().unwrap();
    assert!(!user.banned);
    assert!(user.ban_reason.is_none());
    assert!(user.ban_expires.is_none());
}

#[tokio::test]
async fn test_search_and_role_filter_combine() {
    let portal = portal();
    seed(&portal, "Root", "root@example.com", Role::Admin).await;
    seed(&portal, "Jane Admin", "jane.admin@example.com", Role::Admin).await;
    seed(&portal, "Jane Visitor", "jane@example.com", Role::Visitor).await;
    seed(&portal, "Bob", "bob@example.com", Role::Admin).await;
    let cookie = sign_in(&portal, "root@example.com").await;

    let (status, json) = rpc(
        &portal,
        "admin/getUsers",
        &cookie,
        json!({ "searchValue": "jane", "roleFilter": "admin" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["users"][0]["email"], "jane.admin@example.com");

    let (status, json) = rpc(
        &portal,
        "admin/getUsers",
        &cookie,
        json!({ "roleFilter": "superuser" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_admin_cannot_ban_self_over_rpc() {
    let portal = portal();
    let root_id = seed(&portal, "Root", "root@example.com", Role::Admin).await;
    let cookie = sign_in(&portal, "root@example.com").await;

    let (status, json) = rpc(
        &portal,
        "admin/banUser",
        &cookie,
        json!({ "userId": root_id, "banReason": "testing" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "You cannot ban yourself");
    assert!(!portal.store.get_user(&root_id).await.unwrap().unwrap().banned);
}

#[tokio::test]
async fn test_visitor_updates_own_profile_but_not_others() {
    let portal = portal();
    let jane = seed(&portal, "Jane", "jane@example.com", Role::Visitor).await;
    let bob = seed(&portal, "Bob", "bob@example.com", Role::Visitor).await;
    let cookie = sign_in(&portal, "jane@example.com").await;

    let (status, json) =
        rpc(&portal, "auth/updateName", &cookie, json!({ "name": "Jane Doe" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["id"], jane);
    assert_eq!(json["user"]["name"], "Jane Doe");

    let (status, _) = rpc(
        &portal,
        "admin/updateUser",
        &cookie,
        json!({ "userId": bob, "name": "Hijacked" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(portal.store.get_user(&bob).await.unwrap().unwrap().name, "Bob");

    let response = page(&portal, "/dashboard/account", &cookie).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(html.to_vec()).unwrap();
    assert!(html.contains("Jane Doe"));
    assert!(html.contains("(current)"));
}
