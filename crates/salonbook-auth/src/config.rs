//! Authentication configuration
//!
//! Centralized configuration for the token service, gates, rate limiter and
//! audit recorder, with the platform defaults baked into `Default`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AuthError, AuthResult};
use crate::rate_limit::RateLimitGroup;

/// Main authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token service configuration
    #[serde(default)]
    pub jwt: JwtConfig,
    /// Password hashing configuration
    #[serde(default)]
    pub password: PasswordConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Audit trail configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

/// JWT token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Signing algorithm (EdDSA, RS256, ES256)
    pub algorithm: String,
    /// PEM-encoded private key. Verification-only deployments leave this unset.
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    /// PEM-encoded public key
    pub public_key: Option<String>,
    /// Token issuer claim
    pub issuer: String,
    /// Token audience claim
    pub audience: String,
    /// Access token lifetime
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,
    /// Refresh token lifetime
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,
    /// Clock-skew tolerance applied to `exp` and `iat`/`nbf`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
    /// Track revocations (blacklist + refresh registry) in the key-value store
    pub blacklist_enabled: bool,
    /// Extra blacklist lifetime beyond the access token lifetime
    #[serde(with = "humantime_serde")]
    pub blacklist_grace_period: Duration,
    /// Issue a new refresh token on every refresh and invalidate the old one
    pub rotate_refresh_tokens: bool,
    /// Authorization header scheme
    pub bearer_scheme: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            algorithm: "EdDSA".to_string(),
            private_key: None,
            public_key: None,
            issuer: "salonbook".to_string(),
            audience: "salonbook-api".to_string(),
            access_token_lifetime: Duration::from_secs(60 * 60),
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
            leeway: Duration::from_secs(60),
            blacklist_enabled: true,
            blacklist_grace_period: Duration::from_secs(5 * 60),
            rotate_refresh_tokens: true,
            bearer_scheme: "Bearer".to_string(),
        }
    }
}

/// Password hashing configuration (Argon2id)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    pub parallelism: u32,
    /// Pepper (additional secret, optional)
    #[serde(skip_serializing)]
    pub pepper: Option<String>,
    pub min_password_length: usize,
    /// Upper bound keeps hashing cost bounded
    pub max_password_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 19456, // 19 MiB
            time_cost: 2,
            parallelism: 1,
            pepper: None,
            min_password_length: 8,
            max_password_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
        }
    }
}

/// Fixed-window quota for one rate-limit group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    /// Requests allowed per window
    pub requests: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RatePolicy {
    pub const fn new(requests: u64, window_secs: u64) -> Self {
        Self {
            requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Login / refresh endpoints
    pub auth: RatePolicy,
    pub api: RatePolicy,
    pub public: RatePolicy,
    /// Per-principal quota for authenticated routes
    pub authenticated: RatePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth: RatePolicy::new(5, 60),
            api: RatePolicy::new(100, 60),
            public: RatePolicy::new(100, 60),
            authenticated: RatePolicy::new(1000, 3600),
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self, group: RateLimitGroup) -> RatePolicy {
        match group {
            RateLimitGroup::Auth => self.auth,
            RateLimitGroup::Api => self.api,
            RateLimitGroup::Public => self.public,
            RateLimitGroup::Authenticated => self.authenticated,
        }
    }
}

/// Audit trail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Path prefixes that are never recorded
    pub excluded_paths: Vec<String>,
    /// Consumed by the external retention job
    pub retention_days: u32,
    /// Largest request body buffered for the `new_data` payload
    pub max_body_bytes: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            excluded_paths: vec!["/health".to_string(), "/metrics".to_string()],
            retention_days: 90,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl AuthConfig {
    /// Create configuration from environment variables, on top of the defaults
    pub fn from_env() -> AuthResult<Self> {
        let mut config = Self::default();
        let jwt = &mut config.jwt;

        if let Some(algorithm) = env_string("JWT_ALGORITHM") {
            jwt.algorithm = algorithm;
        }
        jwt.private_key = env_key("JWT_PRIVATE_KEY", "JWT_PRIVATE_KEY_PATH")?;
        jwt.public_key = env_key("JWT_PUBLIC_KEY", "JWT_PUBLIC_KEY_PATH")?;
        if let Some(issuer) = env_string("JWT_ISSUER") {
            jwt.issuer = issuer;
        }
        if let Some(audience) = env_string("JWT_AUDIENCE") {
            jwt.audience = audience;
        }
        if let Some(secs) = env_parse::<u64>("JWT_TTL")? {
            jwt.access_token_lifetime = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("JWT_REFRESH_TTL")? {
            jwt.refresh_token_lifetime = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("JWT_LEEWAY")? {
            jwt.leeway = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_parse::<bool>("JWT_BLACKLIST_ENABLED")? {
            jwt.blacklist_enabled = enabled;
        }
        if let Some(secs) = env_parse::<u64>("JWT_BLACKLIST_GRACE_PERIOD")? {
            jwt.blacklist_grace_period = Duration::from_secs(secs);
        }
        if let Some(rotate) = env_parse::<bool>("JWT_REFRESH_ROTATION")? {
            jwt.rotate_refresh_tokens = rotate;
        }
        if let Some(scheme) = env_string("JWT_BEARER_SCHEME") {
            jwt.bearer_scheme = scheme;
        }

        if let Some(pepper) = env_string("PASSWORD_PEPPER") {
            config.password.pepper = Some(pepper);
        }

        if let Some(enabled) = env_parse::<bool>("RATE_LIMIT_ENABLED")? {
            config.rate_limit.enabled = enabled;
        }

        if let Some(enabled) = env_parse::<bool>("AUDIT_LOG_ENABLED")? {
            config.audit.enabled = enabled;
        }
        if let Some(paths) = env_string("AUDIT_LOG_EXCLUDED_PATHS") {
            config.audit.excluded_paths = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(days) = env_parse::<u32>("AUDIT_LOG_RETENTION_DAYS")? {
            config.audit.retention_days = days;
        }

        Ok(config)
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.jwt.algorithm.as_str(), "EdDSA" | "RS256" | "ES256") {
            errors.push(format!("Unsupported JWT algorithm: {}", self.jwt.algorithm));
        }
        if self.jwt.public_key.is_none() {
            errors.push("JWT public key must be set".to_string());
        }
        if self.jwt.leeway >= self.jwt.access_token_lifetime {
            errors.push("JWT leeway must be shorter than the access token lifetime".to_string());
        }
        if self.jwt.refresh_token_lifetime < self.jwt.access_token_lifetime {
            errors.push("Refresh token lifetime must not be shorter than access token lifetime".to_string());
        }
        if self.jwt.bearer_scheme.trim().is_empty() {
            errors.push("Bearer scheme must not be empty".to_string());
        }

        for group in RateLimitGroup::ALL {
            let policy = self.rate_limit.policy(group);
            if policy.requests == 0 || policy.window.is_zero() {
                errors.push(format!("Rate limit policy for '{}' must allow requests in a non-empty window", group));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> AuthResult<Option<T>> {
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AuthError::Config(format!("{} has an invalid value", name))),
        None => Ok(None),
    }
}

/// Inline PEM wins over a path to a PEM file
fn env_key(inline: &str, path: &str) -> AuthResult<Option<String>> {
    if let Some(pem) = env_string(inline) {
        return Ok(Some(pem.replace("\\n", "\n")));
    }
    match env_string(path) {
        Some(path) => std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| AuthError::Config(format!("Cannot read key file {}: {}", path, e))),
        None => Ok(None),
    }
}
