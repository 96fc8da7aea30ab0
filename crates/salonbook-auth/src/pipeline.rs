//! Request-security pipeline
//!
//! Builds every component from one [`AuthConfig`] and composes the layers in
//! a fixed order, outermost first:
//!
//! ```text
//! public routes:     RateLimit(group) -> Audit -> handler
//! protected routes:  RateLimit(api) -> Auth -> RateLimit(authenticated)
//!                    -> Audit -> Permission (route layer) -> handler
//! ```

use axum::Router;
use std::sync::Arc;

use salonbook_store::{Clock, KeyValueStore};

use crate::audit::{AuditLayer, AuditRecorder, AuditSink};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::jwt::TokenService;
use crate::middleware::AuthLayer;
use crate::password::PasswordService;
use crate::principal::PrincipalRepository;
use crate::rate_limit::{RateLimitGroup, RateLimitLayer, RateLimiter};
use crate::types::{Principal, TokenPair};

/// All request-security components, shared across workers
#[derive(Clone)]
pub struct SecurityStack {
    pub tokens: Arc<TokenService>,
    pub principals: Arc<dyn PrincipalRepository>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit: Arc<AuditRecorder>,
    pub passwords: Arc<PasswordService>,
}

impl SecurityStack {
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn KeyValueStore>,
        principals: Arc<dyn PrincipalRepository>,
        audit_sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        let tokens = TokenService::new(
            config.jwt.clone(),
            store.clone(),
            principals.clone(),
            clock.clone(),
        )?;

        Ok(Self {
            tokens: Arc::new(tokens),
            principals,
            rate_limiter: Arc::new(RateLimiter::new(store, config.rate_limit.clone(), clock)),
            audit: Arc::new(AuditRecorder::new(audit_sink, config.audit.clone())),
            passwords: Arc::new(PasswordService::new(config.password.clone())?),
        })
    }

    /// Replace the audit recorder (e.g. one with a snapshot source)
    pub fn with_audit_recorder(mut self, recorder: AuditRecorder) -> Self {
        self.audit = Arc::new(recorder);
        self
    }

    pub fn auth_layer(&self) -> AuthLayer {
        AuthLayer::new(self.tokens.clone(), self.principals.clone())
    }

    pub fn rate_limit(&self, group: RateLimitGroup) -> RateLimitLayer {
        RateLimitLayer::new(self.rate_limiter.clone(), group)
    }

    pub fn audit_layer(&self) -> AuditLayer {
        AuditLayer::new(self.audit.clone())
    }

    /// Routes reachable without a token, limited per (IP, route).
    /// Mutations are audited with no user.
    pub fn public<S>(&self, router: Router<S>, group: RateLimitGroup) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(self.audit_layer())
            .layer(self.rate_limit(group))
    }

    /// Routes behind the authentication gate
    pub fn protect<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(self.audit_layer())
            .layer(self.rate_limit(RateLimitGroup::Authenticated))
            .layer(self.auth_layer())
            .layer(self.rate_limit(RateLimitGroup::Api))
    }

    /// Verify credentials and issue a token pair
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<(Principal, TokenPair)> {
        let Some(credentials) = self.principals.find_credentials(email).await? else {
            self.passwords.dummy_verify(password);
            tracing::info!("Login failed: unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .passwords
            .verify_password(password, &credentials.password_hash)?
        {
            tracing::info!(principal_id = credentials.principal.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let principal = credentials.principal;
        if !principal.is_active {
            return Err(AuthError::AccountInactive);
        }

        let pair = self.tokens.issue_token_pair(&principal).await?;
        tracing::info!(principal_id = principal.id, "Login succeeded");
        Ok((principal, pair))
    }
}
