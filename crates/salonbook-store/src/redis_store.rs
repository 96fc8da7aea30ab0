//! Redis-backed key-value store

use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Connection, Pool as RedisPool};
use std::time::Duration;

use crate::{DbError, DbResult, KeyValueStore};

/// [`KeyValueStore`] over a pooled Redis connection
#[derive(Clone)]
pub struct RedisStore {
    pool: RedisPool,
}

impl RedisStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> DbResult<Connection> {
        self.pool.get().await.map_err(|e| DbError::Redis(e.to_string()))
    }
}

/// Redis rejects `EX 0`; a sub-second TTL still needs to expire.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> DbResult<bool> {
        let mut conn = self.conn().await?;

        // SET NX EX is a single atomic command
        let result: Option<String> = deadpool_redis::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn incr(&self, key: &str) -> DbResult<i64> {
        let mut conn = self.conn().await?;
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> DbResult<bool> {
        let mut conn = self.conn().await?;
        let applied: bool = conn.expire(key, ttl_secs(ttl) as i64).await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> DbResult<Option<u64>> {
        let mut conn = self.conn().await?;
        // -2 = missing key, -1 = no expiry
        let remaining: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(remaining).ok())
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn delete(&self, key: &str) -> DbResult<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }
}
