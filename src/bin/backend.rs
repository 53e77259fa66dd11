use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use newtube_proxy::{
    aggregate::Aggregator,
    config::{self, DEFAULT_CONFIG_PATH},
    cursor_cache::CursorCache,
    routes::{self, AppState},
    upstream::YouTubeClient,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Paged aggregation proxy for the YouTube Data API")]
struct Args {
    /// Env-style config file (KEY=VALUE per line)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override the listen host
    #[arg(long)]
    host: Option<String>,
    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let settings = config::load_settings_from(&args.config)
        .with_context(|| format!("loading settings from {}", args.config.display()))?;

    let host = args.host.unwrap_or_else(|| settings.proxy_host.clone());
    let port = args.port.unwrap_or(settings.proxy_port);

    let cursors = Arc::new(CursorCache::new(settings.cursor_cache));
    let client = YouTubeClient::from_settings(&settings);
    let aggregator = Aggregator::new(Arc::new(client), cursors).with_page_size(settings.page_size);
    let state = AppState::new(aggregator).with_default_region(settings.default_region.clone());
    let app = routes::router(state);

    let addr = SocketAddr::new(
        host.parse()
            .with_context(|| format!("parsing listen host {host}"))?,
        port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        upstream = %settings.api_base,
        cursor_capacity = settings.cursor_cache.capacity,
        cursor_ttl_secs = settings.cursor_cache.ttl.as_secs(),
        "API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(%err, "failed to install Ctrl+C handler");
    }
}
