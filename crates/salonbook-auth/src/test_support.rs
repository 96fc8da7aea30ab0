//! Failing collaborators for dependency-outage tests

use async_trait::async_trait;
use std::time::Duration;

use salonbook_store::{DbError, DbResult, KeyValueStore};

use crate::error::{AuthError, AuthResult};
use crate::principal::{PrincipalCredentials, PrincipalRepository};
use crate::types::{Principal, PrincipalId};

fn refused() -> DbError {
    DbError::Redis("connection refused".to_string())
}

/// Store whose every call fails
pub struct UnreachableStore;

#[async_trait]
impl KeyValueStore for UnreachableStore {
    async fn get(&self, _: &str) -> DbResult<Option<String>> {
        Err(refused())
    }
    async fn set_ex(&self, _: &str, _: &str, _: Duration) -> DbResult<()> {
        Err(refused())
    }
    async fn set_nx_ex(&self, _: &str, _: &str, _: Duration) -> DbResult<bool> {
        Err(refused())
    }
    async fn incr(&self, _: &str) -> DbResult<i64> {
        Err(refused())
    }
    async fn expire(&self, _: &str, _: Duration) -> DbResult<bool> {
        Err(refused())
    }
    async fn ttl(&self, _: &str) -> DbResult<Option<u64>> {
        Err(refused())
    }
    async fn exists(&self, _: &str) -> DbResult<bool> {
        Err(refused())
    }
    async fn delete(&self, _: &str) -> DbResult<bool> {
        Err(refused())
    }
}

/// Principal repository whose database is down
pub struct UnreachablePrincipals;

#[async_trait]
impl PrincipalRepository for UnreachablePrincipals {
    async fn find_by_id(&self, _: PrincipalId) -> AuthResult<Option<Principal>> {
        Err(AuthError::Store("pool timed out".to_string()))
    }

    async fn find_credentials(&self, _: &str) -> AuthResult<Option<PrincipalCredentials>> {
        Err(AuthError::Store("pool timed out".to_string()))
    }
}
