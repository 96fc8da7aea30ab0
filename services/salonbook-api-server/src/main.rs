//! SalonBook API Server
//!
//! Session endpoints for the SalonBook booking platform, served behind the
//! request-security stack (token gate, permission gate, rate limiter, audit).
//!
//! # Usage
//!
//! ```bash
//! # Start against PostgreSQL + Redis
//! JWT_PRIVATE_KEY="$(cat ed25519.pem)" JWT_PUBLIC_KEY="$(cat ed25519.pub.pem)" \
//!     salonbook-api-server
//!
//! # Single process, in-memory backends, seeded super admin
//! salonbook-api-server --dev-mode --dev-admin-email admin@salon.test --dev-admin-password Admin12345
//!
//! # Environment overrides
//! SALONBOOK__SERVER__PORT=8080 salonbook-api-server
//! ```

mod config;
mod error;
mod handlers;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use salonbook_auth::{
    AuthConfig, InMemoryPrincipalRepository, MemoryAuditSink, Principal, Role, SecurityStack,
};
use salonbook_store::{Database, DatabaseConfig, MemoryStore, SystemClock};

use crate::config::ServerConfig;
use crate::state::AppState;

// =============================================================================
// CLI Arguments
// =============================================================================

/// SalonBook API Server
#[derive(Parser, Debug)]
#[command(name = "salonbook-api-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "SALONBOOK_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "SALONBOOK_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SALONBOOK_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SALONBOOK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "SALONBOOK_LOG_FORMAT")]
    log_format: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Run on in-process backends instead of PostgreSQL + Redis
    #[arg(long, env = "SALONBOOK_DEV_MODE")]
    dev_mode: bool,

    /// Super admin seeded in dev mode
    #[arg(long, env = "SALONBOOK_DEV_ADMIN_EMAIL", requires = "dev_admin_password")]
    dev_admin_email: Option<String>,

    #[arg(long, env = "SALONBOOK_DEV_ADMIN_PASSWORD")]
    dev_admin_password: Option<String>,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    apply_overrides(&mut server_config, &args);

    init_logging(&server_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dev_mode = args.dev_mode,
        "Starting SalonBook API Server"
    );

    let auth_config = AuthConfig::from_env()?;
    if let Err(errors) = auth_config.validate() {
        for error in &errors {
            tracing::error!(error = %error, "Invalid auth configuration");
        }
        anyhow::bail!("Auth configuration is invalid: {}", errors.join("; "));
    }

    let state = if args.dev_mode {
        init_in_memory(&auth_config, &args).await?
    } else {
        init_database(&auth_config, &server_config).await?
    };

    let app = routes::create_router(Arc::new(state), &server_config.api);

    let addr = server_config.server.socket_addr()?;
    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

fn apply_overrides(config: &mut ServerConfig, args: &Args) {
    if let Some(ref host) = args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref url) = args.database_url {
        config.database.postgres_url = url.clone();
    }
    if let Some(ref url) = args.redis_url {
        config.database.redis_url = url.clone();
    }
    if let Some(ref level) = args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(ref format) = args.log_format {
        config.logging.format = format.clone();
    }
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => subscriber
            .with(fmt::layer().json().with_target(true))
            .try_init()?,
        _ => subscriber
            .with(fmt::layer().pretty().with_target(true))
            .try_init()?,
    }

    Ok(())
}

/// PostgreSQL + Redis backends
async fn init_database(auth: &AuthConfig, config: &ServerConfig) -> anyhow::Result<AppState> {
    let db_config = DatabaseConfig::from(&config.database);
    let db = Database::connect(&db_config).await?;

    if config.database.run_migrations {
        db.migrate().await?;
    }

    let health = db.health_check().await;
    if !health.healthy {
        anyhow::bail!(
            "Database health check failed (postgres: {}, redis: {})",
            health.postgres,
            health.redis
        );
    }

    let security = SecurityStack::new(
        auth,
        db.kv(),
        Arc::new(db.principal_repo()),
        Arc::new(db.audit_repo()),
        Arc::new(SystemClock),
    )?;

    tracing::info!("Security stack initialized on PostgreSQL + Redis");
    Ok(AppState::new(security, Some(Arc::new(db))))
}

/// In-process backends; state is lost on restart
async fn init_in_memory(auth: &AuthConfig, args: &Args) -> anyhow::Result<AppState> {
    tracing::warn!("Dev mode: using in-memory store, principals and audit log");

    let principals = InMemoryPrincipalRepository::new();
    let security = SecurityStack::new(
        auth,
        Arc::new(MemoryStore::new()),
        Arc::new(principals.clone()),
        Arc::new(MemoryAuditSink::new()),
        Arc::new(SystemClock),
    )?;

    if let (Some(email), Some(password)) = (&args.dev_admin_email, &args.dev_admin_password) {
        let hash = security.passwords.hash_password(password)?;
        principals
            .insert_with_password(Principal::new(1, email.as_str(), Role::SuperAdmin), hash)
            .await;
        tracing::info!(email = %email, "Seeded dev super admin");
    }

    Ok(AppState::new(security, None))
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, draining in-flight requests...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, draining in-flight requests...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["salonbook-api-server", "--port", "8080", "--dev-mode"]);
        assert_eq!(args.port, Some(8080));
        assert!(args.dev_mode);
    }

    #[test]
    fn test_dev_admin_needs_password() {
        let result = Args::try_parse_from([
            "salonbook-api-server",
            "--dev-admin-email",
            "admin@salon.test",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "salonbook-api-server",
            "--host",
            "127.0.0.1",
            "--log-format",
            "json",
            "--redis-url",
            "redis://cache:6379",
        ]);
        let mut config = ServerConfig::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.database.redis_url, "redis://cache:6379");
    }
}
