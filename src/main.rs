use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use image_studio::{
    backoff::{redact_key, BackoffClient, ReqwestTransport},
    config::StudioConfig,
    routes::{router, AppState},
    session::SessionController,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = StudioConfig::from_env().context("loading configuration")?;
    let endpoint = config.endpoint();
    tracing::info!("Using model endpoint: {}", redact_key(&endpoint));

    let client = BackoffClient::new(Arc::new(ReqwestTransport::new()));
    let state = AppState { session: SessionController::new(client, endpoint, config.max_attempts) };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
