//! asset-fetch-cache server binary.
//!
//! Builds one process-wide coordinator from the configuration and serves it
//! over HTTP.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use prometheus::Registry;
use tokio::net::TcpListener;
use tracing::info;

use asset_fetch_cache::cache::CostCache;
use asset_fetch_cache::config::{Cli, Config};
use asset_fetch_cache::fetch::{AssetWeigher, CoordinatorOptions, FetchCoordinator, HttpSource};
use asset_fetch_cache::metrics::CacheMetrics;
use asset_fetch_cache::server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "asset_fetch_cache=debug,tower_http=debug"
    } else {
        "asset_fetch_cache=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("asset-fetch-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    info!(
        count_limit = config.cache.count_limit,
        total_cost_limit = config.cache.total_cost_limit,
        cancel_policy = ?config.cache.cancel_policy,
        fetch_timeout_secs = config.fetch.timeout_secs,
        max_body_bytes = config.fetch.max_body_bytes,
        "Configuration loaded"
    );

    // One cache for the whole process, shared through the coordinator.
    let registry = Registry::new();
    let metrics = CacheMetrics::register(&registry)?;
    let coordinator = FetchCoordinator::with_options(
        CostCache::from_config(&config.cache),
        AssetWeigher,
        CoordinatorOptions {
            cancel_policy: config.cache.cancel_policy,
            metrics: Some(metrics),
        },
    );
    let source = HttpSource::new(&config.fetch)?;

    let state = Arc::new(AppState {
        coordinator,
        source: Arc::new(source),
        registry,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
