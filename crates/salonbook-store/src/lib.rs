//! SalonBook Persistence Layer
//!
//! Storage backends for the SalonBook request-security core.
//!
//! # Architecture
//!
//! - **Redis**: Token blacklist, refresh-token registry, rate-limit counters
//! - **PostgreSQL**: Principal records (users + permissions) and the audit log
//! - **In-process**: [`MemoryStore`] for tests and single-node development
//!
//! Everything the auth core shares across requests goes through the
//! [`KeyValueStore`] trait. Implementations only need single-key atomicity
//! (`INCR`, `SET NX EX`, `DEL`); no multi-key transactions are used.

pub mod clock;
pub mod config;
pub mod error;
pub mod kv;
pub mod memory;
pub mod models;
pub mod redis_store;
pub mod repos;

use deadpool_redis::{Config as RedisConfig, Pool as RedisPool, Runtime};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::info;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use kv::{keys, KeyValueStore};
pub use memory::MemoryStore;
pub use models::*;
pub use redis_store::RedisStore;
pub use repos::*;

/// Database connection pools
pub struct Database {
    /// PostgreSQL connection pool
    pub pg: PgPool,
    /// Redis connection pool
    pub redis: RedisPool,
}

impl Database {
    /// Connect to PostgreSQL and Redis
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.pg_max_connections)
            .min_connections(config.pg_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        info!("Connecting to Redis: {}", config.redis_url_masked());

        let redis_cfg = RedisConfig::from_url(&config.redis_url);
        let redis = redis_cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| DbError::Connection(format!("Redis: {}", e)))?;

        let mut conn = redis
            .get()
            .await
            .map_err(|e| DbError::Connection(format!("Redis pool: {}", e)))?;
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| DbError::Connection(format!("Redis ping: {}", e)))?;

        info!("Connected to Redis");

        Ok(Self { pg, redis })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    /// Health check for both backends
    pub async fn health_check(&self) -> HealthStatus {
        let pg_ok = sqlx::query("SELECT 1").fetch_one(&self.pg).await.is_ok();

        let redis_ok = async {
            let mut conn = self.redis.get().await.ok()?;
            let result: Result<String, _> = deadpool_redis::redis::cmd("PING")
                .query_async(&mut *conn)
                .await;
            result.ok()
        }
        .await
        .is_some();

        HealthStatus {
            postgres: pg_ok,
            redis: redis_ok,
            healthy: pg_ok && redis_ok,
        }
    }

    pub fn principal_repo(&self) -> PrincipalRepo {
        PrincipalRepo::new(self.pg.clone())
    }

    pub fn audit_repo(&self) -> AuditRepo {
        AuditRepo::new(self.pg.clone())
    }

    /// Redis-backed key-value store, shared by every auth component
    pub fn kv(&self) -> Arc<dyn KeyValueStore> {
        Arc::new(RedisStore::new(self.redis.clone()))
    }
}

/// Health status of database connections
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub postgres: bool,
    pub redis: bool,
    pub healthy: bool,
}
