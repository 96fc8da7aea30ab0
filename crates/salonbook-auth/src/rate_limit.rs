//! Rate Limiting
//!
//! Fixed-window counters kept in the shared key-value store:
//! - One policy per route group (`auth`, `api`, `public`, `authenticated`)
//! - Per-principal keys for the authenticated group, per (IP, route) keys otherwise
//! - Atomic `INCR` with the window set on the first hit
//! - Fails open when the store is unreachable
//!
//! A burst straddling a window boundary can briefly admit close to twice the
//! nominal limit. That is inherent to fixed windows.

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use salonbook_store::{keys, Clock, KeyValueStore};

use crate::config::{RateLimitConfig, RatePolicy};
use crate::error::{AuthError, AuthResult};
use crate::types::{Principal, PrincipalId};

/// Route groups with their own quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitGroup {
    /// Login and refresh
    Auth,
    Api,
    Public,
    /// Keyed by principal; mount inside the authentication gate
    Authenticated,
}

impl RateLimitGroup {
    pub const ALL: [RateLimitGroup; 4] = [Self::Auth, Self::Api, Self::Public, Self::Authenticated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Api => "api",
            Self::Public => "public",
            Self::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for RateLimitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter state after an admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u64,
    /// Post-increment remaining requests, floored at 0
    pub remaining: u64,
    /// Unix timestamp when the window resets
    pub reset_at: i64,
}

impl RateLimitInfo {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("X-RateLimit-Limit", HeaderValue::from(self.limit));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(self.remaining));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(self.reset_at));
    }
}

/// Rate limiter over the shared key-value store
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, config, clock }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn policy(&self, group: RateLimitGroup) -> RatePolicy {
        self.config.policy(group)
    }

    /// Counter key for a request
    pub fn key(group: RateLimitGroup, principal: Option<PrincipalId>, ip: &str, path: &str) -> String {
        match (group, principal) {
            (RateLimitGroup::Authenticated, Some(id)) => {
                format!("{}{}:user:{}", keys::RATE_LIMIT, group, id)
            }
            _ => format!(
                "{}{}:ip:{}:route:{}",
                keys::RATE_LIMIT,
                group,
                ip,
                route_hash(path)
            ),
        }
    }

    /// Count one request against `key`.
    ///
    /// Returns `RateLimitExceeded` when over quota and `Store` when the
    /// counter store fails; callers decide whether to fail open.
    pub async fn hit(&self, key: &str, policy: RatePolicy) -> AuthResult<RateLimitInfo> {
        let now = self.clock.now();
        let window = policy.window.as_secs();

        let current = self
            .store
            .get(key)
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        if current >= policy.requests {
            let retry_after = self.window_remaining(key, policy).await?;
            return Err(AuthError::RateLimitExceeded {
                limit: policy.requests,
                retry_after,
                reset_at: now + retry_after as i64,
            });
        }

        let count = self.store.incr(key).await?;
        if count == 1 {
            self.store.expire(key, policy.window).await?;
        }
        let ttl = self.window_remaining(key, policy).await?;
        let count = u64::try_from(count).unwrap_or(0);

        // Lost a race with concurrent requests on the same key
        if count > policy.requests {
            return Err(AuthError::RateLimitExceeded {
                limit: policy.requests,
                retry_after: ttl,
                reset_at: now + ttl as i64,
            });
        }

        tracing::trace!(key = %key, count, window, "Rate limit hit");

        Ok(RateLimitInfo {
            limit: policy.requests,
            remaining: policy.requests.saturating_sub(count),
            reset_at: now + ttl as i64,
        })
    }

    /// Remaining window; re-arms the expiry on a counter that lost it
    async fn window_remaining(&self, key: &str, policy: RatePolicy) -> AuthResult<u64> {
        match self.store.ttl(key).await? {
            Some(ttl) => Ok(ttl),
            None => {
                self.store.expire(key, policy.window).await?;
                Ok(policy.window.as_secs())
            }
        }
    }

    /// Clear a counter
    pub async fn reset(&self, key: &str) -> AuthResult<()> {
        self.store.delete(key).await?;
        Ok(())
    }
}

/// First 16 hex chars of SHA-256 over the request path
pub fn route_hash(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

/// Middleware helper to extract client IP
pub fn extract_client_ip(headers: &HeaderMap, peer_addr: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    let forwarded_for = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    // Priority: CF > X-Real-IP > X-Forwarded-For > peer addr
    header("CF-Connecting-IP")
        .or_else(|| header("X-Real-IP"))
        .or(forwarded_for)
        .or_else(|| peer_addr.map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

// =============================================================================
// Middleware
// =============================================================================

/// Rate limiting layer for one route group
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    group: RateLimitGroup,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>, group: RateLimitGroup) -> Self {
        Self { limiter, group }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
            group: self.group,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    group: RateLimitGroup,
}

impl<S> Service<Request> for RateLimitMiddleware<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if !self.limiter.is_enabled() {
            return Box::pin(inner.call(req));
        }

        let limiter = self.limiter.clone();
        let group = self.group;
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = extract_client_ip(req.headers(), peer);
        let principal = req.extensions().get::<Principal>().map(|p| p.id);
        let key = RateLimiter::key(group, principal, &ip, req.uri().path());

        Box::pin(async move {
            match limiter.hit(&key, limiter.policy(group)).await {
                Ok(info) => {
                    let mut response = inner.call(req).await?;
                    info.apply_headers(response.headers_mut());
                    Ok(response)
                }
                Err(err @ AuthError::RateLimitExceeded { .. }) => {
                    tracing::warn!(group = %group, key = %key, ip = %ip, "Rate limit exceeded");
                    Ok(err.into_response())
                }
                Err(err) => {
                    tracing::error!(group = %group, key = %key, error = %err, "Rate limiter unavailable, allowing request");
                    inner.call(req).await
                }
            }
        })
    }
}
