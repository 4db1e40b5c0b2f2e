use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use lgtm_core::Configuration;
use lgtm_server::config::Config;
use lgtm_server::webhook::webhook_router;
use lgtm_server::{AppState, FileCacheClient, GitHubClient};

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "lgtm-bot"
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting lgtm bot");

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    let bot_config = Configuration::load(&config.bot_config_path).with_context(|| {
        format!(
            "Failed to load bot configuration from {}",
            config.bot_config_path.display()
        )
    })?;
    info!(
        "Loaded {} bot config item(s) from {}",
        bot_config.config_items.len(),
        config.bot_config_path.display()
    );

    let github_client = GitHubClient::new(config.github_app_id, config.github_private_key);
    let file_cache = FileCacheClient::new(&config.file_cache_endpoint)?;

    let app_state = Arc::new(AppState {
        github_client: Arc::new(github_client),
        file_cache: Arc::new(file_cache),
        webhook_secret: config.github_webhook_secret,
        bot_config: Arc::new(bot_config),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
