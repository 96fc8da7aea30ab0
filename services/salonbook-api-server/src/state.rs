//! Application state shared across handlers

use std::sync::Arc;

use salonbook_auth::SecurityStack;
use salonbook_store::Database;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Token service, gates, limiter and audit recorder
    pub security: SecurityStack,
    /// Absent when running on in-process backends
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(security: SecurityStack, db: Option<Arc<Database>>) -> Self {
        Self { security, db }
    }
}
