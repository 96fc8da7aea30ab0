//! Request handlers
//!
//! Session endpoints (login, refresh, logout) and the small admin surface
//! for inspecting principals and revoking their tokens.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use salonbook_auth::{
    AuditScope, CurrentPrincipal, CurrentToken, LoginRequest, Principal, PrincipalId,
    RefreshTokenRequest, TokenContext, TokenResponse,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// =============================================================================
// DTOs
// =============================================================================

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    #[serde(flatten)]
    pub tokens: TokenResponse,
    /// False when rotation is disabled and the presented refresh token stays valid
    pub rotated: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    /// Also revoke this refresh token
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub principal: Principal,
    pub token: TokenContext,
}

// =============================================================================
// Health
// =============================================================================

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let Some(db) = state.db.as_ref() else {
        return (StatusCode::OK, Json(json!({ "status": "ok", "backend": "memory" })));
    };

    let health = db.health_check().await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let label = if health.healthy { "ok" } else { "degraded" };

    (
        status,
        Json(json!({
            "status": label,
            "postgres": health.postgres,
            "redis": health.redis,
        })),
    )
}

// =============================================================================
// Session
// =============================================================================

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let (_, pair) = state
        .security
        .login(&request.email, &request.password)
        .await?;

    let now = state.security.tokens.now();
    Ok(Json(TokenResponse::new(&pair.access, &pair.refresh, now)))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshTokenRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let refreshed = state.security.tokens.refresh(&request.refresh_token).await?;

    let now = state.security.tokens.now();
    Ok(Json(RefreshResponse {
        tokens: TokenResponse::new(&refreshed.access, &refreshed.refresh, now),
        rotated: refreshed.rotated,
    }))
}

/// Revoke the presented access token and, optionally, a refresh token
pub async fn logout(
    State(state): State<Arc<AppState>>,
    CurrentToken(token): CurrentToken,
    body: Option<Json<LogoutRequest>>,
) -> ApiResult<StatusCode> {
    let tokens = &state.security.tokens;

    let remaining = (token.expires_at - tokens.now()).max(0) as u64;
    let ttl = Duration::from_secs(remaining) + tokens.config().blacklist_grace_period;
    tokens.revoke(&token.token_id, Some(ttl)).await?;

    if let Some(refresh_token) = body.and_then(|Json(req)| req.refresh_token) {
        tokens.revoke_refresh_token(&refresh_token).await?;
    }

    tracing::info!(principal_id = token.subject, jti = %token.token_id, "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke every token issued to the caller so far
pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> ApiResult<StatusCode> {
    state
        .security
        .tokens
        .revoke_all_for_principal(principal.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(
    CurrentPrincipal(principal): CurrentPrincipal,
    CurrentToken(token): CurrentToken,
) -> Json<MeResponse> {
    Json(MeResponse { principal, token })
}

// =============================================================================
// Admin
// =============================================================================

pub async fn get_principal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PrincipalId>,
) -> ApiResult<Json<Principal>> {
    state
        .security
        .principals
        .find_by_id(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("User"))
}

pub async fn revoke_principal_sessions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PrincipalId>,
    audit: AuditScope,
) -> ApiResult<StatusCode> {
    let principal = state
        .security
        .principals
        .find_by_id(id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    audit.describe("users", Some(principal.id.to_string()), None);
    state
        .security
        .tokens
        .revoke_all_for_principal(principal.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Path(jti): Path<String>,
    audit: AuditScope,
) -> ApiResult<StatusCode> {
    audit.describe("tokens", Some(jti.clone()), None);
    state.security.tokens.revoke(&jti, None).await?;
    Ok(StatusCode::NO_CONTENT)
}
