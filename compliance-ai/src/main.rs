//! compliance-ai - AI Processing Orchestration microservice
//!
//! Uploads framework documents to the AI service, supervises the job streams, persists the
//! processing state and relays progress to connected browser sessions.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use compliance_ai::bridge::{AiJobBridge, FsDocumentStorage};
use compliance_ai::AppState;
use compliance_common::config::ServiceConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    config.validate()?;

    info!("Starting compliance-ai (AI Processing Orchestration) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());
    info!("Document root: {}", config.storage_root.display());
    info!("AI service: {} (streams: {})", config.ai_base_url, config.resolved_ws_url());

    let db_pool = compliance_ai::db::init_database_pool(&config.database_path).await?;
    info!("Database connection established");

    let storage = Arc::new(FsDocumentStorage::new(config.storage_root.clone()));
    let bridge = AiJobBridge::new(
        &config.ai_base_url,
        &config.resolved_ws_url(),
        config.http_timeout(),
        storage,
    )?;

    let bind_address = config.bind_address.clone();
    let shutdown_timeout = config.shutdown_timeout();
    let state = AppState::new(db_pool, config, bridge);

    let cancel = CancellationToken::new();
    let poller = state.poller().spawn(cancel.clone());

    let bridge = Arc::clone(&state.bridge);
    let app = compliance_ai::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    cancel.cancel();
    let _ = poller.await;
    bridge.close_all(shutdown_timeout).await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
