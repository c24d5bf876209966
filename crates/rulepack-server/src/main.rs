//! Rulepack registry server binary

use anyhow::Context;
use rulepack_server::{
    config::ServerConfig, create_router, repository::InMemoryRepository, AppState,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "rulepack_server=info,tower_http=info".to_string()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(
        "Starting rulepack server on {} (data in {})",
        config.bind_address(),
        config.data_dir.display()
    );
    if config.tokens.is_empty() {
        warn!("RULEPACK_TOKENS is empty; every publish will be rejected");
    }

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let repository = Arc::new(InMemoryRepository::from_config(&config));
    let address = config.bind_address();
    let app = create_router(AppState::new(config, repository));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
