//! API Routes
//!
//! Route definitions and the security layering around them.

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use salonbook_auth::{Permission, PermissionLayer, RateLimitGroup};

use crate::config::ApiSettings;
use crate::handlers;
use crate::state::AppState;

/// Build the full application router
pub fn create_router(state: Arc<AppState>, api: &ApiSettings) -> Router {
    let security = state.security.clone();

    let public = security.public(
        Router::new()
            .route("/api/v1/auth/login", post(handlers::login))
            .route("/api/v1/auth/refresh", post(handlers::refresh)),
        RateLimitGroup::Auth,
    );

    let protected = security.protect(account_routes().merge(admin_routes()));

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .merge(public)
        .merge(protected)
        .layer(cors_layer(&api.cors_origins));

    if api.enable_tracing {
        app = app.layer(TraceLayer::new_for_http());
    }

    app.with_state(state)
}

/// Session routes for any authenticated principal
fn account_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/auth/logout", post(handlers::logout))
        .route("/api/v1/auth/logout-all", post(handlers::logout_all))
        .route("/api/v1/auth/me", get(handlers::me))
}

/// Admin routes, each group behind its own permission requirement
fn admin_routes() -> Router<Arc<AppState>> {
    let view = Router::new()
        .route("/api/v1/admin/users/:id", get(handlers::get_principal))
        .route_layer(PermissionLayer::new(Permission::single("users.view")));

    let manage = Router::new()
        .route(
            "/api/v1/admin/users/:id/revoke-sessions",
            post(handlers::revoke_principal_sessions),
        )
        .route_layer(PermissionLayer::new(Permission::single("users.manage")));

    let tokens = Router::new()
        .route("/api/v1/admin/tokens/:jti/revoke", post(handlers::revoke_token))
        .route_layer(PermissionLayer::new(Permission::any_of([
            "tokens.revoke",
            "users.manage",
        ])));

    view.merge(manage).merge(tokens)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use salonbook_auth::{
        AuthConfig, InMemoryPrincipalRepository, MemoryAuditSink, Principal, Role, SecurityStack,
    };
    use salonbook_store::{ManualClock, MemoryStore};

    const START: i64 = 1_700_000_000;

    struct Harness {
        app: Router,
        audit: MemoryAuditSink,
        clock: Arc<ManualClock>,
    }

    async fn harness() -> Harness {
        let mut config = AuthConfig::default();
        config.jwt.private_key = Some(
            include_str!("../../../crates/salonbook-auth/fixtures/ed25519_private.pem").to_string(),
        );
        config.jwt.public_key = Some(
            include_str!("../../../crates/salonbook-auth/fixtures/ed25519_public.pem").to_string(),
        );
        config.password.memory_cost = 1024;
        config.password.time_cost = 1;

        let clock = Arc::new(ManualClock::new(START));
        let principals = InMemoryPrincipalRepository::new();
        let audit = MemoryAuditSink::new();
        let security = SecurityStack::new(
            &config,
            Arc::new(MemoryStore::with_clock(clock.clone())),
            Arc::new(principals.clone()),
            Arc::new(audit.clone()),
            clock.clone(),
        )
        .unwrap();

        let hash = security.passwords.hash_password("Braids2024").unwrap();
        principals
            .insert_with_password(Principal::new(1, "client@salon.test", Role::Client), hash.clone())
            .await;
        principals
            .insert_with_password(
                Principal::new(2, "owner@salon.test", Role::Admin)
                    .with_permissions(["users.view", "users.manage"]),
                hash,
            )
            .await;

        let state = Arc::new(AppState::new(security, None));
        Harness {
            app: create_router(state, &ApiSettings::default()),
            audit,
            clock,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login(app: &Router, email: &str) -> Value {
        let (status, body) = call(
            app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": email, "password": "Braids2024" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    #[tokio::test]
    async fn test_health_on_memory_backends() {
        let h = harness().await;
        let (status, body) = call(&h.app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backend"], "memory");
    }

    #[tokio::test]
    async fn test_login_and_me() {
        let h = harness().await;
        let tokens = login(&h.app, "client@salon.test").await;
        assert_eq!(tokens["token_type"], "Bearer");
        assert_eq!(tokens["expires_in"], 3600);

        let access = tokens["access_token"].as_str().unwrap();
        let (status, me) = call(&h.app, "GET", "/api/v1/auth/me", Some(access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["principal"]["id"], 1);
        assert_eq!(me["token"]["subject"], 1);
    }

    #[tokio::test]
    async fn test_bad_password_is_unauthorized() {
        let h = harness().await;
        let (status, body) = call(
            &h.app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "client@salon.test", "password": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "error");
        assert_eq!(body["errors"]["credentials"][0], "Invalid credentials");
    }

    #[tokio::test]
    async fn test_login_attempts_are_audited_without_password() {
        let h = harness().await;
        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "client@salon.test", "password": "Guess1234" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let tokens = login(&h.app, "client@salon.test").await;

        let records = h.audit.records().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.path == "/api/v1/auth/login" && r.user_id.is_none()));
        assert_eq!(records[0].status_code, 401);
        assert_eq!(records[0].new_data, Some(json!({ "email": "client@salon.test" })));
        assert_eq!(records[1].status_code, 200);

        let persisted = serde_json::to_string(&records).unwrap();
        assert!(!persisted.contains("Guess1234"));
        assert!(!persisted.contains("Braids2024"));
        assert!(!persisted.contains(tokens["access_token"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_old_token_dies() {
        let h = harness().await;
        let tokens = login(&h.app, "client@salon.test").await;
        let refresh = tokens["refresh_token"].as_str().unwrap();

        let (status, body) = call(
            &h.app,
            "POST",
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rotated"], true);
        assert_ne!(body["refresh_token"].as_str().unwrap(), refresh);

        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_revokes_access_and_refresh() {
        let h = harness().await;
        let tokens = login(&h.app, "client@salon.test").await;
        let access = tokens["access_token"].as_str().unwrap();
        let refresh = tokens["refresh_token"].as_str().unwrap();

        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/auth/logout",
            Some(access),
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&h.app, "GET", "/api/v1/auth/me", Some(access), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Token has been revoked");

        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // The logout body carried a refresh token; it must not reach the audit log
        let records = h.audit.records().await;
        let logout = records.iter().find(|r| r.path == "/api/v1/auth/logout").unwrap();
        assert!(logout.new_data.as_ref().map_or(true, |d| d.get("refresh_token").is_none()));
    }

    #[tokio::test]
    async fn test_logout_all_rejects_tokens_issued_before() {
        let h = harness().await;
        let first = login(&h.app, "client@salon.test").await;
        let access = first["access_token"].as_str().unwrap();

        h.clock.advance(1);
        let (status, _) = call(&h.app, "POST", "/api/v1/auth/logout-all", Some(access), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&h.app, "GET", "/api/v1/auth/me", Some(access), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Same second as the logout-all
        let second = login(&h.app, "client@salon.test").await;
        let access = second["access_token"].as_str().unwrap();
        let (status, _) = call(&h.app, "GET", "/api/v1/auth/me", Some(access), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_routes_require_permission() {
        let h = harness().await;
        let client = login(&h.app, "client@salon.test").await;
        let client_token = client["access_token"].as_str().unwrap();

        let (status, body) = call(&h.app, "GET", "/api/v1/admin/users/2", Some(client_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["errors"]["permission"][1], "Required permission(s): users.view");

        let owner = login(&h.app, "owner@salon.test").await;
        let owner_token = owner["access_token"].as_str().unwrap();

        let (status, body) = call(&h.app, "GET", "/api/v1/admin/users/1", Some(owner_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "client@salon.test");

        let (status, _) = call(&h.app, "GET", "/api/v1/admin/users/99", Some(owner_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_revoke_sessions_is_audited() {
        let h = harness().await;
        let client = login(&h.app, "client@salon.test").await;
        let client_token = client["access_token"].as_str().unwrap();
        let owner = login(&h.app, "owner@salon.test").await;
        let owner_token = owner["access_token"].as_str().unwrap();

        // Forbidden attempt is recorded as an authorization failure
        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/admin/users/2/revoke-sessions",
            Some(client_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        h.clock.advance(1);
        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/admin/users/1/revoke-sessions",
            Some(owner_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&h.app, "GET", "/api/v1/auth/me", Some(client_token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let records = h.audit.records().await;
        let denied = records
            .iter()
            .find(|r| r.status_code == 403)
            .unwrap();
        assert_eq!(denied.action.as_str(), "AUTHORIZATION_FAILED");
        assert_eq!(denied.user_id, Some(1));

        let revoked = records
            .iter()
            .find(|r| r.status_code == 204 && r.path.ends_with("revoke-sessions"))
            .unwrap();
        assert_eq!(revoked.resource_table.as_deref(), Some("users"));
        assert_eq!(revoked.resource_id.as_deref(), Some("1"));
        assert_eq!(revoked.user_id, Some(2));
    }

    #[tokio::test]
    async fn test_admin_revoke_token_accepts_either_permission() {
        let h = harness().await;
        let client = login(&h.app, "client@salon.test").await;
        let client_token = client["access_token"].as_str().unwrap();
        let me = call(&h.app, "GET", "/api/v1/auth/me", Some(client_token), None).await.1;
        let jti = me["token"]["token_id"].as_str().unwrap().to_string();

        let owner = login(&h.app, "owner@salon.test").await;
        let owner_token = owner["access_token"].as_str().unwrap();

        let uri = format!("/api/v1/admin/tokens/{}/revoke", jti);
        let (status, _) = call(&h.app, "POST", &uri, Some(owner_token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&h.app, "GET", "/api/v1/auth/me", Some(client_token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Token has been revoked");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let h = harness().await;
        let (status, body) = call(&h.app, "GET", "/api/v1/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Authorization header not found");
    }

    #[tokio::test]
    async fn test_login_is_rate_limited() {
        let h = harness().await;
        let attempt = json!({ "email": "client@salon.test", "password": "wrong" });

        for _ in 0..5 {
            let (status, _) = call(&h.app, "POST", "/api/v1/auth/login", None, Some(attempt.clone())).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        let (status, body) = call(&h.app, "POST", "/api/v1/auth/login", None, Some(attempt)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "rate_limit_exceeded");
        assert_eq!(body["retry_after"], 60);
    }
}
