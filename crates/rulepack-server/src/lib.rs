//! Rulepack registry server
//!
//! Serves the HTTP registry API that `HttpRegistryClient` talks to:
//! package search and lookup, authenticated multipart publishing and
//! content-addressed blob downloads.

use axum::{
    error_handling::HandleErrorLayer,
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::get,
    BoxError, Router,
};
use rulepack_registry::api::{HealthResponse, HEALTH_PATH};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub mod blobs;
pub mod config;
pub mod error;
pub mod repository;
pub mod routes;

use blobs::BlobStore;
use config::ServerConfig;
use error::{ApiError, Result};
use repository::PackageRepository;

/// Main application state
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn PackageRepository>,
    pub blobs: BlobStore,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, repository: Arc<dyn PackageRepository>) -> Self {
        Self {
            repository,
            blobs: BlobStore::new(&config.data_dir),
            config: Arc::new(config),
        }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout;
    let max_upload_bytes = state.config.max_upload_bytes;

    Router::new()
        .route(HEALTH_PATH, get(health_check))
        .merge(routes::packages::router())
        .merge(routes::blobs::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(request_timeout)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

async fn handle_middleware_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::Timeout
    } else {
        ApiError::Internal(err.to_string())
    }
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    state.repository.ping().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    }))
}
