//! Key-value store abstraction
//!
//! The revocation store, refresh-token registry and rate-limit counters all
//! live behind this trait. Every method is a single-key operation; callers
//! rely on the backend's per-key atomicity and never hold locks themselves.

use async_trait::async_trait;
use std::time::Duration;

use crate::DbResult;

/// Key prefixes
pub mod keys {
    pub const BLACKLIST: &str = "blacklist:";
    pub const REFRESH_TOKEN: &str = "refresh_token:";
    pub const USER_TOKENS_REVOKED: &str = "user_tokens_revoked:";
    pub const RATE_LIMIT: &str = "rate_limit:";

    pub fn blacklist(jti: &str) -> String {
        format!("{}{}", BLACKLIST, jti)
    }

    pub fn refresh_token(jti: &str) -> String {
        format!("{}{}", REFRESH_TOKEN, jti)
    }

    pub fn user_tokens_revoked(principal_id: i64) -> String {
        format!("{}{}", USER_TOKENS_REVOKED, principal_id)
    }
}

/// TTL-capable key-value store with atomic single-key primitives
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a raw value
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    /// Set a value with expiration, overwriting any existing value
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()>;

    /// Set a value with expiration only if the key is absent.
    /// Returns `true` when this call created the key.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> DbResult<bool>;

    /// Atomically increment a counter, creating it at 1
    async fn incr(&self, key: &str) -> DbResult<i64>;

    /// Set expiration on an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> DbResult<bool>;

    /// Remaining lifetime in seconds (`None` if absent or persistent)
    async fn ttl(&self, key: &str) -> DbResult<Option<u64>>;

    async fn exists(&self, key: &str) -> DbResult<bool>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> DbResult<bool>;
}
