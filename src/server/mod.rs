//! HTTP API: webhooks, build triggers, build output, project views and badges.

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderName, Method},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
pub use api::{AppState, SharedState};

/// Address the API listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Listen address from the `[api]` section, with optional overrides.
    pub fn from_config(config: &Config, host: Option<String>, port: Option<u16>) -> Self {
        Self {
            host: host.unwrap_or_else(|| config.api.host.clone()),
            port: port.unwrap_or(config.api.port),
        }
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::HEAD])
        .allow_headers([HeaderName::from_static(api::HEADER_API_SIGN)])
}

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router().layer(cors_layer()).with_state(state)
}

/// Start the API server and run until Ctrl+C, then abort running builds.
pub async fn start_server(config: Config, server: ServerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.default.base_dir).with_context(|| {
        format!(
            "Failed to create base directory {}",
            config.default.base_dir.display()
        )
    })?;

    let state = Arc::new(AppState::from_config(config));
    let app = build_router(state.clone());

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "API server listening");
    println!("docforge API running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.pool.shutdown().await;
    info!("API server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
