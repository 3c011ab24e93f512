use anyhow::{Context, Result};
use likeness_core::{load_gallery, OnnxEmbeddingSource};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("likenessd starting");

    let config = Config::load().context("loading configuration")?;

    // Models are required; a missing reference directory only degrades the gallery.
    let mut source = OnnxEmbeddingSource::load(&config.model_dir, config.intra_threads)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;

    let reference_dir = config.reference_dir.clone();
    let (source, gallery) = tokio::task::spawn_blocking(move || {
        let gallery = load_gallery(&reference_dir, &mut source);
        (source, gallery)
    })
    .await
    .context("gallery loader panicked")?;
    let gallery = Arc::new(gallery);

    let engine = engine::spawn_engine(
        source,
        gallery.clone(),
        config.policy(),
        config.queue_depth,
    )?;
    let app = http::router(http::AppState::new(engine, gallery), config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "likenessd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("likenessd shutting down");
    Ok(())
}
