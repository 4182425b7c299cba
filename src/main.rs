use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use commit_ingest::config::Config;
use commit_ingest::github::OctocrabClient;
use commit_ingest::ingest::Pipeline;
use commit_ingest::server::{AppState, build_router};
use commit_ingest::storage::SqliteStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env().context("loading configuration")?);
    init_tracing(&config);
    info!(
        environment = %config.environment,
        database = %config.database_url,
        api_base = %config.github_api_base,
        authenticated = config.github_token.is_some(),
        "Starting commit ingestion service"
    );

    let storage = SqliteStorage::connect(&config.database_url)
        .await
        .context("opening database")?;
    let remote = OctocrabClient::from_token(config.github_token.clone(), &config.github_api_base)
        .context("building GitHub client")?;
    let pipeline = Pipeline::start(config.clone(), Arc::new(storage), Arc::new(remote)).await;

    if let Some(repo) = config.default_repo.as_deref() {
        match pipeline.register_repository(repo).await {
            Ok(repository) => info!(repo = %repository.full_name, "Default repository registered"),
            Err(e) => warn!(repo, error = %e, "Failed to register default repository"),
        }
    }

    let app = build_router(AppState::new(pipeline.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    pipeline.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// JSON lines in production, human-readable output elsewhere.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "commit_ingest=info,tower_http=info".into());
    let (json, pretty) = if config.is_production() {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
