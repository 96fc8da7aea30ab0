//! SalonBook Request-Security Layer
//!
//! Token-based authentication and request-security middleware for the
//! SalonBook API:
//!
//! - **Token Service**: EdDSA/RSA/ECDSA-signed access + refresh tokens, revocation, rotation
//! - **Authentication Gate**: bearer extraction, principal lookup, request context
//! - **Authorization Gate**: per-route permission requirements (single / any / all)
//! - **Rate Limiting**: fixed-window counters per route group
//! - **Audit Trail**: append-only records of mutations and authorization failures
//! - **Password Security**: Argon2id hashing for the login endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Request Flow                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Request → RateLimit → AuthLayer → RateLimit(authenticated)  │
//! │              │            │                                  │
//! │              │            ▼                                  │
//! │              │      TokenService ──► KeyValueStore           │
//! │              │            │          (blacklist, registry)   │
//! │              ▼            ▼                                  │
//! │        KeyValueStore   Principal                             │
//! │        (counters)         │                                  │
//! │                           ▼                                  │
//! │               AuditLayer → PermissionLayer → Handler         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All cross-request state lives in the shared [`salonbook_store::KeyValueStore`];
//! nothing here keeps mutable state between requests.

pub mod audit;
pub mod config;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod permission;
pub mod pipeline;
pub mod principal;
pub mod rate_limit;
pub mod types;

#[cfg(test)]
mod test_support;

pub use audit::{AuditLayer, AuditRecord, AuditRecorder, AuditScope, AuditSink, MemoryAuditSink, SnapshotSource};
pub use config::AuthConfig;
pub use error::{AuthError, AuthResult, ErrorResponse};
pub use jwt::{CustomClaims, TokenService};
pub use middleware::{AuthLayer, AuthMiddleware, CurrentPrincipal, CurrentToken};
pub use password::PasswordService;
pub use permission::{Permission, PermissionEvaluator, PermissionLayer, PermissionMode};
pub use pipeline::SecurityStack;
pub use principal::{InMemoryPrincipalRepository, PrincipalCredentials, PrincipalRepository};
pub use rate_limit::{RateLimitGroup, RateLimitLayer, RateLimiter};
pub use types::*;
