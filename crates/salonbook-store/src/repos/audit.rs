//! Audit log repository (append-only)

use sqlx::PgPool;

use crate::{DbAuditLog, DbResult, NewAuditLog};

pub struct AuditRepo {
    pool: PgPool,
}

impl AuditRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &NewAuditLog) -> DbResult<DbAuditLog> {
        let log = sqlx::query_as::<_, DbAuditLog>(
            r#"
            INSERT INTO audit_logs (
                user_id, action, resource_table, resource_id, old_data, new_data,
                ip_address, user_agent, method, path, status_code, duration_ms,
                metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_table)
        .bind(&entry.resource_id)
        .bind(&entry.old_data)
        .bind(&entry.new_data)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(entry.status_code)
        .bind(entry.duration_ms)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(log)
    }

    pub async fn list_recent(&self, limit: i64) -> DbResult<Vec<DbAuditLog>> {
        let logs = sqlx::query_as::<_, DbAuditLog>(
            "SELECT * FROM audit_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    pub async fn list_by_user(&self, user_id: i64, limit: i64) -> DbResult<Vec<DbAuditLog>> {
        let logs = sqlx::query_as::<_, DbAuditLog>(
            "SELECT * FROM audit_logs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    /// Retention cleanup, driven by an external scheduled job
    pub async fn delete_older_than(&self, days: u32) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM audit_logs WHERE created_at < now() - make_interval(days => $1)",
        )
        .bind(days as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
