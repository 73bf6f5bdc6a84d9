//! Local HTTP API over the pipeline.
//!
//! # Module Structure
//!
//! - `handlers` - HTTP route handlers
//! - `models` - API request/response types and error mapping

mod handlers;
mod models;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use strata_core::PipelineContext;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state for the server.
pub struct AppState {
    pub pipeline: Arc<PipelineContext>,
}

// =============================================================================
// Server Configuration
// =============================================================================

pub struct ServeConfig {
    pub host: IpAddr,
    pub port: u16,
}

// =============================================================================
// Server Entry Point
// =============================================================================

pub fn router(pipeline: Arc<PipelineContext>) -> Router {
    let state = Arc::new(AppState { pipeline });
    Router::new()
        .route("/api/scan", post(handlers::api_scan))
        .route("/api/scans", get(handlers::api_sessions))
        .route("/api/scan/{id}/interpret", post(handlers::api_interpret))
        .route("/api/scan/{id}/commit", post(handlers::api_commit))
        .route("/api/scan/{id}/status", get(handlers::api_status))
        .route("/api/scan/{id}/cancel", post(handlers::api_cancel))
        .route("/api/interpreters", get(handlers::api_interpreters))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

/// Serve the API until the process is stopped.
pub async fn start_server(
    pipeline: Arc<PipelineContext>,
    config: ServeConfig,
) -> color_eyre::Result<()> {
    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Serving the Strata API on http://{}", addr);
    println!("Strata API listening on http://{}", addr);
    println!("Press Ctrl+C to stop\n");

    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}
