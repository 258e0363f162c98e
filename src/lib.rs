pub mod api;
pub mod db;
pub mod error;
pub mod metrics;
pub mod settings;
pub mod stream;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio::net::TcpListener;

use api::AppState;
use db::Database;
use metrics::StreamMetrics;
use settings::Settings;
use stream::StreamManager;

pub async fn run() -> Result<()> {
    // RUST_LOG wins; otherwise info and above.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("tempstream starting up...");

    let settings = Settings::load()?;
    serve(settings).await
}

/// Open the store, start the stream manager and serve until Ctrl-C.
pub async fn serve(settings: Settings) -> Result<()> {
    let database = Database::new(settings.database_path.clone())?;
    info!(
        "Reading store at {} holds {} readings",
        database.path().display(),
        database.count_readings().await?
    );

    let streams = StreamManager::new(
        Arc::new(database.clone()),
        settings.session_config(),
        StreamMetrics::new(),
    );
    let state = AppState::new(
        database,
        streams.clone(),
        settings.resolve_api_token(),
        settings.recent_limit,
    );

    let listener = TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;
    info!("Listening on {}", listener.local_addr()?);

    let shutdown_streams = streams.clone();
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {err}");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested, closing stream sessions");
            shutdown_streams.shutdown().await;
        })
        .await
        .context("HTTP server failed")?;

    // Sessions opened while connections drained.
    streams.shutdown().await;
    info!("tempstream stopped");
    Ok(())
}
