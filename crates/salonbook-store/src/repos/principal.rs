//! Principal repository (users + granted permissions)

use sqlx::PgPool;

use crate::{DbPrincipal, DbResult, DbUser};

/// Read-only access to user principals; user management lives elsewhere
#[derive(Clone)]
pub struct PrincipalRepo {
    pool: PgPool,
}

impl PrincipalRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a principal by ID
    pub async fn find_by_id(&self, id: i64) -> DbResult<Option<DbPrincipal>> {
        let user = sqlx::query_as::<_, DbUser>(
            r#"
            SELECT id, email, password_hash, role, is_active, created_at, updated_at
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        self.with_permissions(user).await
    }

    /// Find a principal by email (login)
    pub async fn find_by_email(&self, email: &str) -> DbResult<Option<DbPrincipal>> {
        let user = sqlx::query_as::<_, DbUser>(
            r#"
            SELECT id, email, password_hash, role, is_active, created_at, updated_at
            FROM users
            WHERE lower(email) = lower($1) AND deleted_at IS NULL
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        self.with_permissions(user).await
    }

    async fn with_permissions(&self, user: Option<DbUser>) -> DbResult<Option<DbPrincipal>> {
        let Some(user) = user else {
            return Ok(None);
        };

        let permissions: Vec<String> = sqlx::query_scalar(
            "SELECT permission FROM user_permissions WHERE user_id = $1 ORDER BY permission",
        )
        .bind(user.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(DbPrincipal { user, permissions }))
    }
}
