//! LexDesk API Gateway binary
//!
//! Wires configuration, telemetry and the store/adapter backends, then serves
//! the router until Ctrl+C or SIGTERM.

use anyhow::Context;
use lexdesk_common::{
    auth::LocalIdentityProvider,
    config::{AppConfig, DatabaseBackend},
    db::{DbPool, PgStore},
    errors::set_expose_internal_errors,
    extraction::create_extractor,
    metrics,
    ratelimit::create_rate_limiter,
    services::{ServiceSettings, Services},
    storage::create_blob_store,
    store::{MemoryStore, Store},
};
use lexdesk_gateway::{build_router, telemetry, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("loading configuration")?;
    config.validate().context("invalid configuration")?;

    // Initialize tracing
    telemetry::init_tracing(&config.observability)?;
    set_expose_internal_errors(config.server.expose_internal_errors);

    info!(
        environment = %config.environment,
        "Starting LexDesk API Gateway v{}",
        lexdesk_common::VERSION
    );
    if config.uses_default_secrets() {
        warn!("Running with the default JWT or URL signing secret; set APP__AUTH__JWT_SECRET and APP__STORAGE__SIGNING_SECRET");
    }

    let config = Arc::new(config);

    // Initialize metrics
    let metrics_handle = if config.observability.metrics_enabled {
        Some(telemetry::install_metrics_recorder()?)
    } else {
        None
    };
    metrics::register_metrics();

    let store: Arc<dyn Store> = match config.database.backend {
        DatabaseBackend::Postgres => {
            info!("Connecting to database...");
            let pool = DbPool::new(&config.database).await?;
            if config.database.run_migrations {
                pool.run_migrations().await?;
            }
            Arc::new(PgStore::new(pool))
        }
        DatabaseBackend::Memory => {
            warn!("Using the in-memory store; all data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    let blobs = create_blob_store(&config.storage)?;
    let extractor = create_extractor(&config.extraction)?;
    let identity = Arc::new(LocalIdentityProvider::new(
        store.clone(),
        &config.auth.jwt_secret,
        config.auth.jwt_expiration_secs,
        config.auth.reset_token_ttl_secs,
    ));
    let limiter = create_rate_limiter(&config.rate_limit, config.redis.url.as_deref()).await?;

    info!(
        store = store.backend_name(),
        extractor = extractor.name(),
        rate_limiter = limiter.backend_name(),
        "Backends ready"
    );

    let services = Services::new(store, blobs, extractor, identity, ServiceSettings::from_config(&config));

    // Create app state
    let state = AppState {
        config: config.clone(),
        services,
        limiter,
        metrics: metrics_handle,
    };

    // Build the router
    let app = build_router(state);

    // Start the server
    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("binding {}:{}", config.server.host, config.server.port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
