//! Authorization gate
//!
//! Routes declare a [`Permission`] requirement once, at router build time.
//! Malformed permission lists fail there, not on the first request.
//! [`PermissionLayer`] evaluates the requirement against the principal the
//! authentication gate placed in the request extensions.

use axum::{
    extract::Request,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::error::{AuthError, AuthResult};
use crate::types::{Principal, Role};

/// Capability checks every principal type must answer
pub trait PermissionEvaluator {
    fn has_permission_to(&self, permission: &str) -> bool;

    fn is_super_admin(&self) -> bool;

    fn has_any_permission(&self, permissions: &[String]) -> bool {
        self.is_super_admin() || permissions.iter().any(|p| self.has_permission_to(p))
    }

    fn has_all_permissions(&self, permissions: &[String]) -> bool {
        self.is_super_admin() || permissions.iter().all(|p| self.has_permission_to(p))
    }
}

impl PermissionEvaluator for Principal {
    fn has_permission_to(&self, permission: &str) -> bool {
        self.is_super_admin() || self.permissions.contains(permission)
    }

    fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }
}

/// How a multi-permission list combines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    #[default]
    Any,
    All,
}

impl std::str::FromStr for PermissionMode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "any" => Ok(Self::Any),
            "all" => Ok(Self::All),
            other => Err(AuthError::Config(format!("Unknown permission mode: {}", other))),
        }
    }
}

/// A route's declared permission requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Single(String),
    AnyOf(Vec<String>),
    AllOf(Vec<String>),
}

impl Permission {
    pub fn single(permission: impl Into<String>) -> Self {
        Self::Single(permission.into())
    }

    pub fn any_of<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyOf(permissions.into_iter().map(Into::into).collect())
    }

    pub fn all_of<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllOf(permissions.into_iter().map(Into::into).collect())
    }

    /// Parse a comma-separated declaration such as `"reservations.update, reservations.delete"`
    pub fn parse(declared: &str, mode: PermissionMode) -> AuthResult<Self> {
        let names: Vec<String> = declared.split(',').map(|p| p.trim().to_string()).collect();

        if names.iter().any(String::is_empty) {
            return Err(AuthError::Config(format!(
                "Invalid permission declaration: '{}'",
                declared
            )));
        }

        Ok(match (names.len(), mode) {
            (1, _) => Self::Single(names.into_iter().next().unwrap_or_default()),
            (_, PermissionMode::Any) => Self::AnyOf(names),
            (_, PermissionMode::All) => Self::AllOf(names),
        })
    }

    /// Permission names, in declaration order
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::Single(p) => vec![p.clone()],
            Self::AnyOf(ps) | Self::AllOf(ps) => ps.clone(),
        }
    }

    pub fn is_satisfied_by<E: PermissionEvaluator + ?Sized>(&self, evaluator: &E) -> bool {
        match self {
            Self::Single(p) => evaluator.has_permission_to(p),
            Self::AnyOf(ps) => evaluator.has_any_permission(ps),
            Self::AllOf(ps) => evaluator.has_all_permissions(ps),
        }
    }
}

/// Authorization decision for one request
pub fn authorize(principal: Option<&Principal>, requirement: Option<&Permission>) -> AuthResult<()> {
    let principal = principal.ok_or(AuthError::Unauthenticated)?;

    if principal.is_super_admin() {
        return Ok(());
    }

    match requirement {
        None => Ok(()),
        Some(required) if required.is_satisfied_by(principal) => Ok(()),
        Some(required) => Err(AuthError::Forbidden {
            required: required.names(),
        }),
    }
}

/// Layer enforcing a permission requirement
#[derive(Clone, Default)]
pub struct PermissionLayer {
    requirement: Option<Arc<Permission>>,
}

impl PermissionLayer {
    pub fn new(requirement: Permission) -> Self {
        Self {
            requirement: Some(Arc::new(requirement)),
        }
    }

    /// Authentication alone suffices
    pub fn authenticated() -> Self {
        Self { requirement: None }
    }

    /// Build from a comma-separated declaration and mode, failing at startup if malformed
    pub fn parse(declared: &str, mode: PermissionMode) -> AuthResult<Self> {
        Permission::parse(declared, mode).map(Self::new)
    }
}

impl<S> Layer<S> for PermissionLayer {
    type Service = PermissionMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PermissionMiddleware {
            inner,
            requirement: self.requirement.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PermissionMiddleware<S> {
    inner: S,
    requirement: Option<Arc<Permission>>,
}

impl<S> Service<Request> for PermissionMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let principal = req.extensions().get::<Principal>();

        match authorize(principal, self.requirement.as_deref()) {
            Ok(()) => Box::pin(self.inner.call(req)),
            Err(err) => {
                tracing::warn!(
                    principal_id = principal.map(|p| p.id),
                    path = %req.uri().path(),
                    error = %err,
                    "Permission check failed"
                );
                Box::pin(async move { Ok(err.into_response()) })
            }
        }
    }
}
