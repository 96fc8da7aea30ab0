//! JWT Token Service
//!
//! Sole authority for bearer tokens:
//! - Asymmetric signing (EdDSA by default), so verifiers never hold the signing key
//! - Access and refresh tokens with a flat claim shape
//! - Revocation through the key-value store (`blacklist:{jti}`)
//! - Refresh-token registry (`refresh_token:{jti}`) with at-most-once rotation
//! - Per-principal "revoke everything issued so far" markers
//!
//! Expiry and not-before checks use the injected [`Clock`] with a symmetric
//! leeway, rather than the library's wall-clock checks.
//!
//! Store failures during verification, refresh and revocation surface as
//! [`AuthError::TokenValidationFailed`] (401), never as a 500.

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use salonbook_store::{keys, Clock, KeyValueStore};

use crate::config::JwtConfig;
use crate::error::{validation_failure, AuthError, AuthResult};
use crate::principal::PrincipalRepository;
use crate::types::{
    IssuedToken, Principal, PrincipalId, RefreshRegistryEntry, RefreshedTokens, TokenClaims,
    TokenPair, TokenType,
};

/// Claim names owned by the service; custom claims may not shadow them
const RESERVED_CLAIMS: [&str; 9] = ["iss", "aud", "iat", "nbf", "exp", "sub", "jti", "type", "role"];

/// Custom claims attached to an access token
pub type CustomClaims = serde_json::Map<String, serde_json::Value>;

/// Token service
#[derive(Clone)]
pub struct TokenService {
    config: JwtConfig,
    algorithm: Algorithm,
    /// Absent on verification-only instances
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    validation: Validation,
    store: Arc<dyn KeyValueStore>,
    principals: Arc<dyn PrincipalRepository>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Create a token service from configuration
    pub fn new(
        config: JwtConfig,
        store: Arc<dyn KeyValueStore>,
        principals: Arc<dyn PrincipalRepository>,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        let algorithm = parse_algorithm(&config.algorithm)?;

        let public_key = config
            .public_key
            .as_deref()
            .ok_or_else(|| AuthError::Config("JWT public key must be set".to_string()))?;
        let decoding_key = decoding_key(algorithm, public_key)?;

        let encoding_key = match config.private_key.as_deref() {
            Some(pem) => Some(encoding_key(algorithm, pem)?),
            None => {
                tracing::info!("No JWT private key configured, token service is verification-only");
                None
            }
        };

        let mut validation = Validation::new(algorithm);
        // exp/nbf are checked against the injected clock
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss", "aud"]);

        Ok(Self {
            config,
            algorithm,
            encoding_key,
            decoding_key,
            validation,
            store,
            principals,
            clock,
        })
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Current time as seen by the service
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn can_issue(&self) -> bool {
        self.encoding_key.is_some()
    }

    // =========================================================================
    // Issuance
    // =========================================================================

    /// Issue an access token, optionally carrying custom claims
    pub fn issue_access_token(
        &self,
        principal: &Principal,
        custom: CustomClaims,
    ) -> AuthResult<IssuedToken> {
        let token = self.sign(
            principal,
            TokenType::Access,
            self.config.access_token_lifetime,
            custom,
        )?;
        tracing::debug!(principal_id = principal.id, jti = %token.jti(), "Issued access token");
        Ok(token)
    }

    /// Issue a refresh token and record it in the registry
    pub async fn issue_refresh_token(&self, principal: &Principal) -> AuthResult<IssuedToken> {
        let token = self.sign(
            principal,
            TokenType::Refresh,
            self.config.refresh_token_lifetime,
            CustomClaims::new(),
        )?;

        if self.config.blacklist_enabled {
            let entry = RefreshRegistryEntry {
                user_id: principal.id,
                issued_at: token.claims.iat,
                expires_at: token.claims.exp,
            };
            let value = serde_json::to_string(&entry)
                .map_err(|e| AuthError::Internal(format!("Failed to encode registry entry: {}", e)))?;
            self.store
                .set_ex(
                    &keys::refresh_token(token.jti()),
                    &value,
                    self.config.refresh_token_lifetime,
                )
                .await?;
        }

        tracing::debug!(principal_id = principal.id, jti = %token.jti(), "Issued refresh token");
        Ok(token)
    }

    /// Issue an access + refresh token pair
    pub async fn issue_token_pair(&self, principal: &Principal) -> AuthResult<TokenPair> {
        let access = self.issue_access_token(principal, CustomClaims::new())?;
        let refresh = self.issue_refresh_token(principal).await?;
        Ok(TokenPair { access, refresh })
    }

    fn sign(
        &self,
        principal: &Principal,
        token_type: TokenType,
        lifetime: Duration,
        mut custom: CustomClaims,
    ) -> AuthResult<IssuedToken> {
        let key = self.encoding_key.as_ref().ok_or_else(|| {
            AuthError::Config("Token service has no private key and cannot issue tokens".to_string())
        })?;

        for name in RESERVED_CLAIMS {
            custom.remove(name);
        }

        let now = self.clock.now();
        let claims = TokenClaims {
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now,
            nbf: now,
            exp: now + secs(lifetime),
            sub: principal.id.to_string(),
            jti: Uuid::new_v4().to_string(),
            token_type,
            role: principal.role,
            custom,
        };

        let token = encode(&Header::new(self.algorithm), &claims, key)
            .map_err(|e| AuthError::Internal(format!("Failed to encode token: {}", e)))?;

        Ok(IssuedToken { token, claims })
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Decode and fully verify a token of either type
    pub async fn decode(&self, token: &str) -> AuthResult<TokenClaims> {
        let claims = self.verify_signed(token)?;

        if self.config.blacklist_enabled && self.is_revoked(&claims).await.map_err(validation_failure)? {
            return Err(AuthError::TokenRevoked);
        }

        Ok(claims)
    }

    /// Decode a token that must be an access token
    pub async fn decode_access(&self, token: &str) -> AuthResult<TokenClaims> {
        let claims = self.decode(token).await?;
        if claims.token_type != TokenType::Access {
            return Err(AuthError::InvalidTokenType);
        }
        Ok(claims)
    }

    /// Resolve a token to its principal; any failure yields `None`
    pub async fn validate(&self, token: &str) -> Option<Principal> {
        let claims = match self.decode(token).await {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "Token validation failed");
                return None;
            }
        };

        let id = claims.principal_id().ok()?;
        match self.principals.find_by_id(id).await {
            Ok(principal) => principal,
            Err(err) => {
                tracing::warn!(principal_id = id, error = %err, "Principal lookup failed");
                None
            }
        }
    }

    /// Signature, issuer/audience and temporal checks. No store access.
    fn verify_signed(&self, token: &str) -> AuthResult<TokenClaims> {
        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(map_jwt_error)?
            .claims;

        let now = self.clock.now();
        let leeway = secs(self.config.leeway);

        if claims.exp + leeway < now {
            return Err(AuthError::TokenExpired);
        }
        if claims.iat - leeway > now || claims.nbf - leeway > now {
            return Err(AuthError::TokenNotYetValid);
        }

        Ok(claims)
    }

    async fn is_revoked(&self, claims: &TokenClaims) -> AuthResult<bool> {
        if self.store.exists(&keys::blacklist(&claims.jti)).await? {
            return Ok(true);
        }

        let id = claims.principal_id()?;
        let marker = self.store.get(&keys::user_tokens_revoked(id)).await?;

        // Strictly before the marker; a token issued in the marker's second survives.
        // An unreadable marker revokes everything.
        Ok(match marker {
            Some(raw) => raw.parse::<i64>().map_or(true, |revoked_at| claims.iat < revoked_at),
            None => false,
        })
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Exchange a refresh token for a new access token (and a new refresh
    /// token when rotation is enabled)
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<RefreshedTokens> {
        self.exchange(refresh_token).await.map_err(validation_failure)
    }

    async fn exchange(&self, refresh_token: &str) -> AuthResult<RefreshedTokens> {
        let claims = self.decode(refresh_token).await?;
        if claims.token_type != TokenType::Refresh {
            return Err(AuthError::InvalidRefreshToken);
        }
        let principal_id = claims.principal_id()?;
        let registry_key = keys::refresh_token(&claims.jti);

        if self.config.blacklist_enabled {
            let entry = self
                .store
                .get(&registry_key)
                .await?
                .ok_or(AuthError::RefreshTokenNotFound)?;
            let entry: RefreshRegistryEntry =
                serde_json::from_str(&entry).map_err(|_| AuthError::InvalidRefreshToken)?;
            if entry.user_id != principal_id {
                return Err(AuthError::InvalidRefreshToken);
            }
        }

        let principal = self
            .principals
            .find_by_id(principal_id)
            .await?
            .ok_or(AuthError::PrincipalNotFound)?;
        if !principal.is_active {
            return Err(AuthError::AccountInactive);
        }

        if !self.config.rotate_refresh_tokens {
            let access = self.issue_access_token(&principal, CustomClaims::new())?;
            return Ok(RefreshedTokens {
                access,
                refresh: IssuedToken {
                    token: refresh_token.to_string(),
                    claims,
                },
                rotated: false,
            });
        }

        if self.config.blacklist_enabled {
            // Only one caller can create the blacklist entry; that caller owns the rotation
            let claimed = self
                .store
                .set_nx_ex(
                    &keys::blacklist(&claims.jti),
                    &self.clock.now().to_string(),
                    self.remaining_with_grace(claims.exp),
                )
                .await?;
            if !claimed {
                tracing::warn!(
                    principal_id,
                    jti = %claims.jti,
                    "Refresh token reused after rotation"
                );
                return Err(AuthError::RefreshTokenNotFound);
            }
            self.store.delete(&registry_key).await?;
        }

        let access = self.issue_access_token(&principal, CustomClaims::new())?;
        let refresh = self.issue_refresh_token(&principal).await?;

        tracing::info!(
            principal_id,
            old_jti = %claims.jti,
            new_jti = %refresh.jti(),
            "Rotated refresh token"
        );

        Ok(RefreshedTokens {
            access,
            refresh,
            rotated: true,
        })
    }

    // =========================================================================
    // Revocation
    // =========================================================================

    /// Blacklist a token ID. Revoking twice is not an error.
    pub async fn revoke(&self, jti: &str, ttl: Option<Duration>) -> AuthResult<()> {
        let ttl = ttl.unwrap_or(self.config.access_token_lifetime + self.config.blacklist_grace_period);
        self.store
            .set_ex(&keys::blacklist(jti), &self.clock.now().to_string(), ttl)
            .await
            .map_err(|e| validation_failure(e.into()))?;
        tracing::info!(jti = %jti, ttl_secs = ttl.as_secs(), "Revoked token");
        Ok(())
    }

    /// Revoke a presented refresh token and drop its registry entry.
    /// Expired or already revoked tokens are accepted silently.
    pub async fn revoke_refresh_token(&self, refresh_token: &str) -> AuthResult<()> {
        let claims = match self.verify_signed(refresh_token) {
            Ok(claims) => claims,
            Err(AuthError::TokenExpired) => return Ok(()),
            Err(err) => return Err(err),
        };
        if claims.token_type != TokenType::Refresh {
            return Err(AuthError::InvalidRefreshToken);
        }

        self.revoke(&claims.jti, Some(self.remaining_with_grace(claims.exp)))
            .await?;
        self.store
            .delete(&keys::refresh_token(&claims.jti))
            .await
            .map_err(|e| validation_failure(e.into()))?;
        Ok(())
    }

    /// Reject every token issued to the principal before the current second.
    /// Tokens issued later in the same second stay valid, so a fresh login
    /// right after "log out everywhere" works.
    pub async fn revoke_all_for_principal(&self, principal_id: PrincipalId) -> AuthResult<()> {
        let now = self.clock.now();
        self.store
            .set_ex(
                &keys::user_tokens_revoked(principal_id),
                &now.to_string(),
                self.config.refresh_token_lifetime,
            )
            .await
            .map_err(|e| validation_failure(e.into()))?;
        tracing::info!(principal_id, revoked_at = now, "Revoked all tokens for principal");
        Ok(())
    }

    /// Remaining lifetime of a token plus the blacklist grace period
    fn remaining_with_grace(&self, exp: i64) -> Duration {
        let remaining = (exp - self.clock.now()).max(0) as u64;
        Duration::from_secs(remaining) + self.config.blacklist_grace_period
    }

    // =========================================================================
    // Header Parsing
    // =========================================================================

    /// Extract the token from an `Authorization` header value using the configured scheme
    pub fn extract_bearer<'a>(&self, header: Option<&'a str>) -> Option<&'a str> {
        extract_bearer(header?, &self.config.bearer_scheme)
    }
}

/// Case-insensitive scheme match; returns the trimmed remainder
pub fn extract_bearer<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    let header = header.trim_start();
    let prefix = header.get(..scheme.len())?;
    if !prefix.eq_ignore_ascii_case(scheme) {
        return None;
    }

    let rest = &header[scheme.len()..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

fn parse_algorithm(name: &str) -> AuthResult<Algorithm> {
    match name {
        "EdDSA" => Ok(Algorithm::EdDSA),
        "RS256" => Ok(Algorithm::RS256),
        "ES256" => Ok(Algorithm::ES256),
        other => Err(AuthError::Config(format!("Unsupported JWT algorithm: {}", other))),
    }
}

fn encoding_key(algorithm: Algorithm, pem: &str) -> AuthResult<EncodingKey> {
    let key = match algorithm {
        Algorithm::EdDSA => EncodingKey::from_ed_pem(pem.as_bytes()),
        Algorithm::ES256 => EncodingKey::from_ec_pem(pem.as_bytes()),
        _ => EncodingKey::from_rsa_pem(pem.as_bytes()),
    };
    key.map_err(|e| AuthError::Config(format!("Invalid JWT private key: {}", e)))
}

fn decoding_key(algorithm: Algorithm, pem: &str) -> AuthResult<DecodingKey> {
    let key = match algorithm {
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem.as_bytes()),
        Algorithm::ES256 => DecodingKey::from_ec_pem(pem.as_bytes()),
        _ => DecodingKey::from_rsa_pem(pem.as_bytes()),
    };
    key.map_err(|e| AuthError::Config(format!("Invalid JWT public key: {}", e)))
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::TokenSignatureInvalid,
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        _ => AuthError::TokenMalformed(err.to_string()),
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
