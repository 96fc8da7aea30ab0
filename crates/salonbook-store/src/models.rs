//! Database row models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Principal Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbUser {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user row together with its granted permission names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPrincipal {
    pub user: DbUser,
    pub permissions: Vec<String>,
}

// ============================================================================
// Audit Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbAuditLog {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub resource_table: Option<String>,
    pub resource_id: Option<String>,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: i32,
    pub duration_ms: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditLog {
    pub user_id: Option<i64>,
    pub action: String,
    pub resource_table: Option<String>,
    pub resource_id: Option<String>,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: i32,
    pub duration_ms: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
