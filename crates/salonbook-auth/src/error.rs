//! Authentication error types
//!
//! Every rejection path in the request-security layer is one of these
//! variants. Errors are designed to be:
//! - Distinguishable by kind for logging and tests
//! - Rendered with one uniform JSON shape for clients
//! - Convertible to HTTP status codes

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use salonbook_store::DbError;

/// Result type alias for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Human text attached to every permission rejection
pub const PERMISSION_DENIED_TEXT: &str = "You do not have permission to perform this action.";

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    // =========================================================================
    // Header Errors
    // =========================================================================
    #[error("Authorization header not found")]
    MissingAuthorizationHeader,

    #[error("Invalid authorization format. Expected: {scheme} {{token}}")]
    InvalidAuthorizationScheme { scheme: String },

    // =========================================================================
    // Token Errors
    // =========================================================================
    #[error("Token has expired")]
    TokenExpired,

    #[error("Token signature could not be verified")]
    TokenSignatureInvalid,

    #[error("Token is not yet valid")]
    TokenNotYetValid,

    #[error("Token has been revoked")]
    TokenRevoked,

    /// Any other structural failure (bad encoding, wrong issuer/audience, missing claims)
    #[error("Token is malformed")]
    TokenMalformed(String),

    /// Refresh token presented where an access token is required
    #[error("Invalid token type")]
    InvalidTokenType,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Validity could not be established because a dependency failed
    #[error("Token validation failed")]
    TokenValidationFailed,

    /// Refresh token is not in the registry: never issued here, expired, or already rotated
    #[error("Refresh token not found or already used")]
    RefreshTokenNotFound,

    // =========================================================================
    // Principal Errors
    // =========================================================================
    #[error("User not found")]
    PrincipalNotFound,

    #[error("User account is inactive")]
    AccountInactive,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Password does not meet requirements: {0}")]
    WeakPassword(String),

    #[error("Password hashing failed")]
    PasswordHashingFailed,

    // =========================================================================
    // Permission Errors
    // =========================================================================
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Forbidden")]
    Forbidden { required: Vec<String> },

    // =========================================================================
    // Rate Limiting Errors
    // =========================================================================
    #[error("Too many requests. Please try again in {retry_after} seconds.")]
    RateLimitExceeded {
        limit: u64,
        /// Seconds until the window resets
        retry_after: u64,
        /// Unix timestamp of the window reset
        reset_at: i64,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Key-value store or database failure
    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error")]
    Internal(String),
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::WeakPassword(_) => 400,

            // 401 Unauthorized
            Self::MissingAuthorizationHeader
            | Self::InvalidAuthorizationScheme { .. }
            | Self::TokenExpired
            | Self::TokenSignatureInvalid
            | Self::TokenNotYetValid
            | Self::TokenRevoked
            | Self::TokenMalformed(_)
            | Self::InvalidTokenType
            | Self::InvalidRefreshToken
            | Self::TokenValidationFailed
            | Self::RefreshTokenNotFound
            | Self::PrincipalNotFound
            | Self::InvalidCredentials
            | Self::Unauthenticated => 401,

            // 403 Forbidden
            Self::AccountInactive | Self::Forbidden { .. } => 403,

            // 429 Too Many Requests
            Self::RateLimitExceeded { .. } => 429,

            // 500 Internal Server Error
            Self::Store(_) | Self::Config(_) | Self::PasswordHashingFailed | Self::Internal(_) => 500,
        }
    }

    /// Machine-readable error code (safe to expose)
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingAuthorizationHeader => "MISSING_AUTHORIZATION",
            Self::InvalidAuthorizationScheme { .. } => "INVALID_AUTHORIZATION_SCHEME",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenSignatureInvalid => "TOKEN_SIGNATURE_INVALID",
            Self::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::TokenMalformed(_) => "TOKEN_MALFORMED",
            Self::InvalidTokenType => "INVALID_TOKEN_TYPE",
            Self::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            Self::TokenValidationFailed => "TOKEN_VALIDATION_FAILED",
            Self::RefreshTokenNotFound => "REFRESH_TOKEN_NOT_FOUND",
            Self::PrincipalNotFound => "USER_NOT_FOUND",
            Self::AccountInactive => "ACCOUNT_INACTIVE",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::WeakPassword(_) => "WEAK_PASSWORD",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Store(_)
            | Self::Config(_)
            | Self::PasswordHashingFailed
            | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Credential failures: retrying after re-authentication may succeed
    pub fn is_credential_error(&self) -> bool {
        self.status_code() == 401
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Safe message for clients (doesn't leak internal details)
    pub fn client_message(&self) -> String {
        match self {
            Self::Store(_) | Self::Internal(_) | Self::Config(_) | Self::PasswordHashingFailed => {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Logical category used as the key of the `errors` map
    pub fn category(&self) -> &'static str {
        match self {
            Self::Forbidden { .. } => "permission",
            Self::RateLimitExceeded { .. } => "rate_limit",
            Self::WeakPassword(_) | Self::InvalidCredentials => "credentials",
            _ => "auth",
        }
    }
}

/// A dependency failure cannot prove a token valid; report it as a credential failure
pub(crate) fn validation_failure(err: AuthError) -> AuthError {
    if err.is_server_error() {
        tracing::error!(error = %err, "Token validation dependency failed");
        AuthError::TokenValidationFailed
    } else {
        err
    }
}

impl From<DbError> for AuthError {
    fn from(err: DbError) -> Self {
        Self::Store(err.to_string())
    }
}

// =============================================================================
// Response Bodies
// =============================================================================

/// Uniform rejection body: `{status:"error", message, errors:{<category>:[..]}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, category: &str, details: Vec<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(category.to_string(), details);
        Self {
            status: "error".to_string(),
            message: message.into(),
            errors,
        }
    }
}

impl From<&AuthError> for ErrorResponse {
    fn from(error: &AuthError) -> Self {
        match error {
            AuthError::Forbidden { required } => Self::new(
                "Forbidden",
                error.category(),
                vec![
                    PERMISSION_DENIED_TEXT.to_string(),
                    format!("Required permission(s): {}", required.join(", ")),
                ],
            ),
            _ => {
                let message = error.client_message();
                Self::new(message.clone(), error.category(), vec![message])
            }
        }
    }
}

/// Rate-limit rejection body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub message: String,
    pub error: String,
    pub retry_after: u64,
    pub reset_at: i64,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.is_server_error() {
            tracing::error!(error = %self, "Request failed with internal error");
        }

        match self {
            AuthError::RateLimitExceeded {
                limit,
                retry_after,
                reset_at,
            } => {
                let body = RateLimitResponse {
                    message: format!(
                        "Too many requests. Please try again in {} seconds.",
                        retry_after
                    ),
                    error: "rate_limit_exceeded".to_string(),
                    retry_after,
                    reset_at,
                };
                let mut response = (status, Json(body)).into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
                headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u64));
                headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_at));
                response
            }
            other => (status, Json(ErrorResponse::from(&other))).into_response(),
        }
    }
}
