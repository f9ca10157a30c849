//! Trend pipeline service: HTTP API over the tiered acquisition chain, with
//! the background scheduler keeping cache and store warm.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::info;

use trend_pipeline::{api, init_tracing, metrics::Metrics, PipelineConfig, Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = PipelineConfig::load_default().context("loading pipeline config")?;
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;

    let metrics = Metrics::init(&config)?;
    let service = Service::bootstrap(config).await?;
    service.start_scheduler();

    let app = api::router(api::AppState::from_service(&service)).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    info!("draining, stopping scheduler");
    service.shutdown().await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = ?e, "ctrl-c handler failed; shutting down");
    }
}
