use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use top100_cache::cache::CacheEngine;
use top100_cache::config::{Cli, Config, StoreBackend};
use top100_cache::metrics::CacheMetrics;
use top100_cache::provider::catalog::builtin_registry;
use top100_cache::provider::HttpFetcher;
use top100_cache::server::api::{build_router, AppState};
use top100_cache::store::{ChunkStore, MemoryStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pick up provider credentials from a local .env, if present.
    let _ = dotenvy::dotenv();

    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "top100_cache=debug,tower_http=debug"
    } else {
        "top100_cache=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.json_logs {
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

    info!("top100-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    info!(
        ttl_secs = config.cache.ttl_secs,
        max_chunk_size = config.cache.max_chunk_size,
        single_flight = config.cache.single_flight,
        backend = ?config.store.backend,
        "Configuration loaded"
    );

    // Open the chunk store.
    let store: Arc<dyn ChunkStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::open(&config.store.sqlite_path, &config.store.collection).await?,
        ),
    };

    // Build the provider registry and the upstream client.
    let registry = Arc::new(builtin_registry(&config.providers)?);
    info!(categories = ?registry.categories(), "Providers registered");

    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
        config.cache.upstream_timeout_secs,
    ))?);

    let engine = Arc::new(CacheEngine::new(
        registry,
        store,
        fetcher,
        CacheMetrics::new()?,
        &config.cache,
    ));

    // One-shot legacy layout cleanup; failures do not block startup.
    if config.maintenance.sweep_on_start {
        match engine
            .run_maintenance(&config.maintenance.legacy_single_chunk_keys)
            .await
        {
            Ok(report) => info!(
                keys = report.keys_scanned,
                deleted = report.deleted,
                "Maintenance sweep complete"
            ),
            Err(e) => warn!("Maintenance sweep failed: {e}"),
        }
    }

    // Build application state.
    let state = Arc::new(AppState {
        engine,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen;
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
