//! HTTP surface: one upload endpoint and a health probe.

use std::num::NonZeroU16;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::cli::CliOptions;
use crate::pipeline::Decorator;

mod decorate;

pub use decorate::DecorateResponse;

#[derive(Clone)]
pub(crate) struct AppState {
    decorator: Decorator,
    attempts: NonZeroU16,
    model_backend: String,
    image_backend: String,
}

impl AppState {
    fn new(cli: &CliOptions, decorator: Decorator) -> Self {
        Self {
            decorator,
            attempts: cli.pipeline_attempts,
            model_backend: cli.model_backend.to_string(),
            image_backend: cli.image_backend.to_string(),
        }
    }
}

/// Body of `GET /api/health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` when the process is serving
    pub status: String,
    /// Configured image backend
    pub image_backend: String,
    /// Configured text and vision client
    pub model_backend: String,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        image_backend: state.image_backend,
        model_backend: state.model_backend,
    })
}

fn create_router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/api/decorate",
            axum::routing::post(decorate::decorate_handler),
        )
        .route("/api/health", axum::routing::get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
}

/// Binds the listener and serves until ctrl-c.
pub async fn setup_server(cli: &CliOptions, decorator: Decorator) -> Result<(), anyhow::Error> {
    let app = create_router(cli.max_upload_bytes).with_state(AppState::new(cli, decorator));

    let addr = format!("{}:{}", cli.listen_address, cli.port);
    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", err);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
