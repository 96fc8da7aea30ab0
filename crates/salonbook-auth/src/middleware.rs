//! Authentication gate for Axum
//!
//! Per-request state machine:
//! - no `Authorization` header: 401
//! - header without the configured scheme: 401
//! - token fails to decode: 401 naming the failure
//! - subject not found: 401
//! - principal inactive: 403
//! - otherwise the [`Principal`] and its [`TokenContext`] are attached to the
//!   request extensions and the request continues
//!
//! No error escapes the gate; dependency failures become a 401
//! "Token validation failed".

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::error::{validation_failure, AuthError, AuthResult};
use crate::jwt::TokenService;
use crate::principal::PrincipalRepository;
use crate::types::{Principal, TokenContext};

/// Authentication middleware layer
#[derive(Clone)]
pub struct AuthLayer {
    tokens: Arc<TokenService>,
    principals: Arc<dyn PrincipalRepository>,
}

impl AuthLayer {
    /// Create a new authentication layer
    pub fn new(tokens: Arc<TokenService>, principals: Arc<dyn PrincipalRepository>) -> Self {
        Self { tokens, principals }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            tokens: self.tokens.clone(),
            principals: self.principals.clone(),
        }
    }
}

/// Authentication middleware service
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    tokens: Arc<TokenService>,
    principals: Arc<dyn PrincipalRepository>,
}

impl<S> Service<Request> for AuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let tokens = self.tokens.clone();
        let principals = self.principals.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let outcome = authenticate(&tokens, principals.as_ref(), req.headers()).await;
            match outcome {
                Ok((principal, context)) => {
                    tracing::debug!(
                        principal_id = principal.id,
                        jti = %context.token_id,
                        "Request authenticated"
                    );
                    req.extensions_mut().insert(principal);
                    req.extensions_mut().insert(context);
                    inner.call(req).await
                }
                Err(err) => {
                    tracing::debug!(
                        path = %req.uri().path(),
                        error_code = err.error_code(),
                        "Authentication rejected"
                    );
                    Ok(err.into_response())
                }
            }
        })
    }
}

/// Run the authentication state machine over request headers
pub async fn authenticate(
    tokens: &TokenService,
    principals: &dyn PrincipalRepository,
    headers: &HeaderMap,
) -> AuthResult<(Principal, TokenContext)> {
    let scheme = || AuthError::InvalidAuthorizationScheme {
        scheme: tokens.config().bearer_scheme.clone(),
    };

    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthorizationHeader)?
        .to_str()
        .map_err(|_| scheme())?;
    let token = tokens.extract_bearer(Some(header)).ok_or_else(scheme)?;

    let claims = tokens
        .decode_access(token)
        .await
        .map_err(validation_failure)?;
    let context = TokenContext::from_claims(&claims)?;

    let principal = principals
        .find_by_id(context.subject)
        .await
        .map_err(validation_failure)?
        .ok_or(AuthError::PrincipalNotFound)?;

    if !principal.is_active {
        return Err(AuthError::AccountInactive);
    }

    Ok((principal, context))
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extractor for the authenticated principal. Returns 401 if absent.
pub struct CurrentPrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or_else(|| AuthError::Unauthenticated.into_response())
    }
}

/// Extractor for the verified claims of the presented access token
pub struct CurrentToken(pub TokenContext);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentToken
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TokenContext>()
            .cloned()
            .map(CurrentToken)
            .ok_or_else(|| AuthError::Unauthenticated.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::error::ErrorResponse;
    use crate::jwt::CustomClaims;
    use crate::principal::InMemoryPrincipalRepository;
    use crate::types::Role;
    use axum::{body::Body, routing::get, Router};
    use salonbook_store::{ManualClock, MemoryStore};
    use tower::ServiceExt;

    async fn setup() -> (Router, Arc<TokenService>, InMemoryPrincipalRepository) {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let principals = InMemoryPrincipalRepository::new();
        principals
            .insert(Principal::new(5, "stylist@salon.test", Role::Stylist))
            .await;
        let repo: Arc<dyn PrincipalRepository> = Arc::new(principals.clone());

        let tokens = Arc::new(
            TokenService::new(
                JwtConfig {
                    private_key: Some(include_str!("../fixtures/ed25519_private.pem").to_string()),
                    public_key: Some(include_str!("../fixtures/ed25519_public.pem").to_string()),
                    ..JwtConfig::default()
                },
                Arc::new(MemoryStore::with_clock(clock.clone())),
                repo.clone(),
                clock,
            )
            .unwrap(),
        );

        let app = Router::new()
            .route(
                "/me",
                get(|CurrentPrincipal(p): CurrentPrincipal, CurrentToken(t): CurrentToken| async move {
                    format!("{}:{}", p.id, t.role)
                }),
            )
            .layer(AuthLayer::new(tokens.clone(), repo));

        (app, tokens, principals)
    }

    fn request(authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/me");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body(res: Response) -> ErrorResponse {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_header() {
        let (app, _, _) = setup().await;
        let res = app.oneshot(request(None)).await.unwrap();

        assert_eq!(res.status(), 401);
        let body = body(res).await;
        assert_eq!(body.status, "error");
        assert_eq!(body.message, "Authorization header not found");
        assert!(body.errors.contains_key("auth"));
    }

    #[tokio::test]
    async fn test_wrong_scheme() {
        let (app, _, _) = setup().await;
        let res = app.oneshot(request(Some("Basic Zm9vOmJhcg=="))).await.unwrap();

        assert_eq!(res.status(), 401);
        assert!(body(res).await.message.contains("Bearer {token}"));
    }

    #[tokio::test]
    async fn test_valid_token_attaches_principal() {
        let (app, tokens, _) = setup().await;
        let issued = tokens
            .issue_access_token(&Principal::new(5, "stylist@salon.test", Role::Stylist), CustomClaims::new())
            .unwrap();

        let res = app
            .oneshot(request(Some(&format!("bearer {}", issued.token))))
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"5:stylist");
    }

    #[tokio::test]
    async fn test_decode_failure_message() {
        let (app, _, _) = setup().await;
        let res = app.oneshot(request(Some("Bearer nonsense"))).await.unwrap();

        assert_eq!(res.status(), 401);
        assert_eq!(body(res).await.message, "Token is malformed");
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_a_bearer_credential() {
        let (app, tokens, _) = setup().await;
        let pair = tokens
            .issue_token_pair(&Principal::new(5, "stylist@salon.test", Role::Stylist))
            .await
            .unwrap();

        let res = app
            .oneshot(request(Some(&format!("Bearer {}", pair.refresh.token))))
            .await
            .unwrap();
        assert_eq!(res.status(), 401);
        assert_eq!(body(res).await.message, "Invalid token type");
    }

    #[tokio::test]
    async fn test_missing_and_inactive_principal() {
        let (app, tokens, principals) = setup().await;
        let issued = tokens
            .issue_access_token(&Principal::new(5, "stylist@salon.test", Role::Stylist), CustomClaims::new())
            .unwrap();
        let header = format!("Bearer {}", issued.token);

        principals.set_active(5, false).await;
        let res = app.clone().oneshot(request(Some(&header))).await.unwrap();
        assert_eq!(res.status(), 403);
        assert_eq!(body(res).await.message, "User account is inactive");

        principals.remove(5).await;
        let res = app.oneshot(request(Some(&header))).await.unwrap();
        assert_eq!(res.status(), 401);
        assert_eq!(body(res).await.message, "User not found");
    }
}
