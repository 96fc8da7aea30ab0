//! Core authentication types
//!
//! Shared types used across the token service, gates and audit recorder.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::AuthError;

/// Stable principal identifier (user primary key)
pub type PrincipalId = i64;

// =============================================================================
// Principal Types
// =============================================================================

/// An authenticated actor, read from the principal repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    pub role: Role,
    /// Inactive principals are rejected even with a valid token
    pub is_active: bool,
    /// Granted permission names
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn new(id: PrincipalId, email: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            email: email.into(),
            role,
            is_active: true,
            permissions: HashSet::new(),
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Platform roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Books appointments
    Client,
    /// Provides services
    Stylist,
    Admin,
    /// Bypasses every permission check
    SuperAdmin,
}

impl Default for Role {
    fn default() -> Self {
        Self::Client
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Stylist => "stylist",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "stylist" => Ok(Self::Stylist),
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            other => Err(AuthError::Internal(format!("Unknown role: {}", other))),
        }
    }
}

// =============================================================================
// Token Types
// =============================================================================

/// Token type claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims structure (flat shape; custom claims sit beside the registered ones)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Subject (principal ID)
    pub sub: String,
    /// JWT ID, the revocation handle
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub role: Role,
    #[serde(flatten)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl TokenClaims {
    /// Subject parsed back into a principal ID
    pub fn principal_id(&self) -> Result<PrincipalId, AuthError> {
        self.sub
            .parse()
            .map_err(|_| AuthError::TokenMalformed("subject is not a principal id".to_string()))
    }
}

/// A freshly signed token with its claims
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    pub fn expires_at(&self) -> i64 {
        self.claims.exp
    }

    pub fn jti(&self) -> &str {
        &self.claims.jti
    }
}

/// Access + refresh token pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Result of a refresh: a new access token and the refresh token to keep using
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access: IssuedToken,
    /// The new refresh token when rotated, otherwise the presented one
    pub refresh: IssuedToken,
    pub rotated: bool,
}

/// Wire format for issued tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

impl TokenResponse {
    pub fn new(access: &IssuedToken, refresh: &IssuedToken, now: i64) -> Self {
        Self {
            access_token: access.token.clone(),
            refresh_token: refresh.token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: (access.expires_at() - now).max(0),
            access_expires_at: access.expires_at(),
            refresh_expires_at: refresh.expires_at(),
        }
    }
}

/// Refresh-token registry entry stored under `refresh_token:{jti}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRegistryEntry {
    pub user_id: PrincipalId,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Claims injected into the request context by the authentication gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenContext {
    pub subject: PrincipalId,
    pub role: Role,
    pub token_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl TokenContext {
    pub fn from_claims(claims: &TokenClaims) -> Result<Self, AuthError> {
        Ok(Self {
            subject: claims.principal_id()?,
            role: claims.role,
            token_id: claims.jti.clone(),
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }
}

// =============================================================================
// Login Request Types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}
