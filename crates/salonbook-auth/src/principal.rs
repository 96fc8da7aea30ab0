//! Principal lookup capability
//!
//! The auth core never writes principals; it only reads them through
//! [`PrincipalRepository`]. The Postgres repository from `salonbook-store`
//! and an in-memory map both satisfy it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use salonbook_store::{DbPrincipal, PrincipalRepo};

use crate::error::AuthResult;
use crate::types::{Principal, PrincipalId};

/// A principal together with its stored password hash (login only)
#[derive(Debug, Clone)]
pub struct PrincipalCredentials {
    pub principal: Principal,
    pub password_hash: String,
}

/// Read-only principal lookup
#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    async fn find_by_id(&self, id: PrincipalId) -> AuthResult<Option<Principal>>;

    async fn find_credentials(&self, email: &str) -> AuthResult<Option<PrincipalCredentials>>;
}

impl TryFrom<DbPrincipal> for PrincipalCredentials {
    type Error = crate::error::AuthError;

    fn try_from(row: DbPrincipal) -> Result<Self, Self::Error> {
        let principal = Principal {
            id: row.user.id,
            email: row.user.email,
            role: row.user.role.parse()?,
            is_active: row.user.is_active,
            permissions: row.permissions.into_iter().collect(),
        };
        Ok(Self {
            principal,
            password_hash: row.user.password_hash,
        })
    }
}

#[async_trait]
impl PrincipalRepository for PrincipalRepo {
    async fn find_by_id(&self, id: PrincipalId) -> AuthResult<Option<Principal>> {
        match PrincipalRepo::find_by_id(self, id).await? {
            Some(row) => Ok(Some(PrincipalCredentials::try_from(row)?.principal)),
            None => Ok(None),
        }
    }

    async fn find_credentials(&self, email: &str) -> AuthResult<Option<PrincipalCredentials>> {
        self.find_by_email(email)
            .await?
            .map(PrincipalCredentials::try_from)
            .transpose()
    }
}

/// In-memory principal map for tests and local development
#[derive(Clone, Default)]
pub struct InMemoryPrincipalRepository {
    principals: Arc<RwLock<HashMap<PrincipalId, PrincipalCredentials>>>,
}

impl InMemoryPrincipalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a principal (password hash left empty)
    pub async fn insert(&self, principal: Principal) {
        self.insert_with_password(principal, String::new()).await;
    }

    pub async fn insert_with_password(&self, principal: Principal, password_hash: String) {
        let mut principals = self.principals.write().await;
        principals.insert(
            principal.id,
            PrincipalCredentials {
                principal,
                password_hash,
            },
        );
    }

    pub async fn remove(&self, id: PrincipalId) {
        self.principals.write().await.remove(&id);
    }

    pub async fn set_active(&self, id: PrincipalId, active: bool) {
        if let Some(entry) = self.principals.write().await.get_mut(&id) {
            entry.principal.is_active = active;
        }
    }
}

#[async_trait]
impl PrincipalRepository for InMemoryPrincipalRepository {
    async fn find_by_id(&self, id: PrincipalId) -> AuthResult<Option<Principal>> {
        let principals = self.principals.read().await;
        Ok(principals.get(&id).map(|c| c.principal.clone()))
    }

    async fn find_credentials(&self, email: &str) -> AuthResult<Option<PrincipalCredentials>> {
        let principals = self.principals.read().await;
        Ok(principals
            .values()
            .find(|c| c.principal.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use chrono::Utc;
    use salonbook_store::DbUser;

    #[tokio::test]
    async fn test_in_memory_lookup() {
        let repo = InMemoryPrincipalRepository::new();
        repo.insert(Principal::new(7, "ada@salon.test", Role::Stylist)).await;

        let found = repo.find_by_id(7).await.unwrap().unwrap();
        assert_eq!(found.role, Role::Stylist);
        assert!(repo.find_by_id(8).await.unwrap().is_none());

        let creds = repo.find_credentials("ADA@salon.test").await.unwrap();
        assert_eq!(creds.unwrap().principal.id, 7);

        repo.set_active(7, false).await;
        assert!(!repo.find_by_id(7).await.unwrap().unwrap().is_active);
    }

    #[test]
    fn test_row_conversion() {
        let row = DbPrincipal {
            user: DbUser {
                id: 3,
                email: "owner@salon.test".to_string(),
                password_hash: "$argon2id$...".to_string(),
                role: "admin".to_string(),
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            permissions: vec!["reservations.view".to_string()],
        };

        let creds = PrincipalCredentials::try_from(row).unwrap();
        assert_eq!(creds.principal.role, Role::Admin);
        assert!(creds.principal.permissions.contains("reservations.view"));
    }
}
