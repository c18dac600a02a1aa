use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use editstream_server::{build_router, config::Settings, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,editstream_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("🚀 Starting editstream server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded ({})", settings.server.environment);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState::from_settings(settings).context("failed to initialize edit backend")?;
    match &state.settings.upstream.base_url {
        Some(upstream) => info!("✅ Relay mode, upstream {}", upstream),
        None => info!(
            "✅ Local mode, planning={} image={}",
            state.settings.gemini.planning_model, state.settings.gemini.image_model
        ),
    }

    let app = build_router(Arc::new(state));

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
