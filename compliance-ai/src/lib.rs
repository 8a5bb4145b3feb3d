//! compliance-ai library interface
//!
//! AI processing orchestration and real-time notification service. Exposes the
//! components for the binary and for integration testing.

pub mod api;
pub mod bridge;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use compliance_common::config::ServiceConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bridge::AiJobBridge;
use crate::services::{ComparisonService, ProcessingService, ReconciliationPoller, RelayHub};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub config: Arc<ServiceConfig>,
    /// AI service client and monitor registry
    pub bridge: Arc<AiJobBridge>,
    /// Live notification sockets, one registry per relay
    pub hub: RelayHub,
    pub processing: ProcessingService,
    pub comparisons: ComparisonService,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: ServiceConfig, bridge: AiJobBridge) -> Self {
        let bridge = Arc::new(bridge);
        let hub = RelayHub::new();
        let processing = ProcessingService::new(db.clone(), Arc::clone(&bridge), hub.clone());
        let comparisons = ComparisonService::new(
            db.clone(),
            Arc::clone(&bridge),
            hub.clone(),
            &config.comparison_score_field,
        );

        Self {
            db,
            config: Arc::new(config),
            bridge,
            hub,
            processing,
            comparisons,
            startup_time: Utc::now(),
        }
    }

    /// Poller wired to this state's services and configured intervals
    pub fn poller(&self) -> ReconciliationPoller {
        ReconciliationPoller::new(
            self.db.clone(),
            self.processing.clone(),
            self.comparisons.clone(),
            self.config.poll_interval(),
            self.config.stale_after(),
        )
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::framework_routes())
        .merge(api::comparison_routes())
        .merge(api::ws_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
