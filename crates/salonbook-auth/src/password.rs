//! Password Service
//!
//! Argon2id hashing and constant-time verification for the login endpoint.
//! An optional pepper is appended before hashing and held in zeroizing buffers.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};
use zeroize::Zeroizing;

use crate::config::PasswordConfig;
use crate::error::{AuthError, AuthResult};

/// Password service for hashing and verification
#[derive(Clone)]
pub struct PasswordService {
    config: PasswordConfig,
    /// Verified against when the account is unknown, so both paths cost the same
    dummy_hash: String,
}

impl PasswordService {
    pub fn new(config: PasswordConfig) -> AuthResult<Self> {
        let mut service = Self {
            config,
            dummy_hash: String::new(),
        };
        service.dummy_hash = service.hash_unchecked("salonbook-dummy-password")?;
        Ok(service)
    }

    fn argon2(&self) -> AuthResult<Argon2<'static>> {
        let params = Params::new(
            self.config.memory_cost,
            self.config.time_cost,
            self.config.parallelism,
            None,
        )
        .map_err(|e| AuthError::Config(format!("Invalid Argon2 params: {}", e)))?;

        Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
    }

    fn peppered(&self, password: &str) -> Zeroizing<String> {
        match self.config.pepper {
            Some(ref pepper) => Zeroizing::new(format!("{}{}", password, pepper)),
            None => Zeroizing::new(password.to_string()),
        }
    }

    /// Hash a password after checking its strength
    pub fn hash_password(&self, password: &str) -> AuthResult<String> {
        self.validate_password_strength(password)?;
        self.hash_unchecked(password)
    }

    fn hash_unchecked(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(self.peppered(password).as_bytes(), &salt)
            .map_err(|_| AuthError::PasswordHashingFailed)?;
        Ok(hash.to_string())
    }

    /// Verify a password against a stored hash
    pub fn verify_password(&self, password: &str, hash: &str) -> AuthResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|_| AuthError::Internal("Stored password hash is unreadable".to_string()))?;

        // Parameters come from the hash itself
        match Argon2::default().verify_password(self.peppered(password).as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(_) => Err(AuthError::PasswordHashingFailed),
        }
    }

    /// Burn one verification for an unknown account
    pub fn dummy_verify(&self, password: &str) {
        let _ = self.verify_password(password, &self.dummy_hash);
    }

    /// Validate password strength
    pub fn validate_password_strength(&self, password: &str) -> AuthResult<()> {
        let mut errors = Vec::new();
        let length = password.chars().count();

        if length < self.config.min_password_length {
            errors.push(format!(
                "Password must be at least {} characters",
                self.config.min_password_length
            ));
        }
        if length > self.config.max_password_length {
            errors.push(format!(
                "Password must be at most {} characters",
                self.config.max_password_length
            ));
        }
        if self.config.require_uppercase && !password.chars().any(char::is_uppercase) {
            errors.push("Password must contain at least one uppercase letter".to_string());
        }
        if self.config.require_lowercase && !password.chars().any(char::is_lowercase) {
            errors.push("Password must contain at least one lowercase letter".to_string());
        }
        if self.config.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push("Password must contain at least one digit".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AuthError::WeakPassword(errors.join("; ")))
        }
    }

    /// Whether a stored hash was produced with different cost parameters
    pub fn needs_rehash(&self, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return true;
        };
        match Params::try_from(&parsed) {
            Ok(params) => {
                params.m_cost() != self.config.memory_cost
                    || params.t_cost() != self.config.time_cost
                    || params.p_cost() != self.config.parallelism
            }
            Err(_) => true,
        }
    }
}
