//! L2 Cache - A second-level cache over a remote key-value store
//!
//! Runs the cache engine with its background purge task behind a small
//! admin HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use l2_cache::store::{MemoryStore, RemoteStore};
use l2_cache::{create_router, spawn_purge_task, AppState, CacheEngine, Config};

/// Main entry point for the L2 cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect the remote store (Redis, or in-memory when unset)
/// 4. Start background purge task
/// 5. Serve the admin API until SIGINT/SIGTERM
/// 6. Close the store connection
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "l2_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting L2 Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: key_prefix={}, store_timeout={}ms, port={}, purge_interval={}s, allow_admin={}",
        config.key_prefix,
        config.store_timeout_ms,
        config.server_port,
        config.purge_interval,
        config.allow_admin
    );

    let store = connect_store(&config).await?;
    let engine = Arc::new(CacheEngine::from_config(store, &config));

    let purge_handle = if config.purge_interval > 0 {
        let handle = spawn_purge_task(engine.clone(), config.purge_interval);
        info!("Background purge task started");
        Some(handle)
    } else {
        warn!("Background purge disabled; expired entries stay until read");
        None
    };

    let app = create_router(AppState::new(engine.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(purge_handle))
        .await
        .context("server error")?;

    engine.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

#[cfg(feature = "redis")]
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn RemoteStore>> {
    match &config.redis_url {
        Some(url) => {
            let store = l2_cache::store::RedisStore::connect(url)
                .await
                .context("failed to connect to Redis")?;
            info!("Connected to Redis");
            Ok(Arc::new(store))
        }
        None => {
            info!("REDIS_URL not set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn RemoteStore>> {
    if config.redis_url.is_some() {
        anyhow::bail!("REDIS_URL is set but the redis feature is disabled");
    }
    info!("Using in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the purge task.
async fn shutdown_signal(purge_handle: Option<tokio::task::JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = purge_handle {
        handle.abort();
        warn!("Purge task aborted");
    }
}
