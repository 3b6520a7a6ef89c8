//! shardkv - A sharded, replicated key-value server
//!
//! Serves the store over HTTP, backed by one SQLite database per shard.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shardkv::api::create_router;
use shardkv::backend::{Backend, SqliteBackend};
use shardkv::{AppState, Config, ShardedStore, StoreConfig};

/// Main entry point for the shardkv server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Open master and replica databases
/// 4. Open the store, which pings every database and starts reclamation
/// 5. Start HTTP server on configured port
/// 6. On SIGINT/SIGTERM, drain the server and stop the store
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shardkv=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting shardkv server");

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    info!(
        "Configuration loaded: shards={}, expiry_time={:?}, purge_interval={:?}, op_timeout={:?}, port={}",
        config.masters.len(),
        config.expiry_time,
        config.purge_interval,
        config.op_timeout,
        config.server_port
    );

    let store = open_store(&config).await?;
    let state = AppState::new(store);
    let app = create_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.store.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Opens every configured database and assembles the store.
async fn open_store(config: &Config) -> anyhow::Result<ShardedStore> {
    let mut masters: Vec<Arc<dyn Backend>> = Vec::with_capacity(config.masters.len());
    for path in &config.masters {
        ensure_parent_dir(path)?;
        let backend = SqliteBackend::open(path)
            .with_context(|| format!("failed to open master {}", path.display()))?;
        masters.push(Arc::new(backend));
    }

    let mut store_config = StoreConfig::new(masters)
        .with_policy(config.expiry_policy()?)
        .with_op_timeout(Some(config.op_timeout));

    for (&index, paths) in &config.replicas {
        for path in paths {
            let backend = SqliteBackend::open_read_only(path)
                .with_context(|| format!("failed to open replica {}", path.display()))?;
            store_config = store_config.with_replica(index, Arc::new(backend));
        }
    }

    ShardedStore::open(store_config)
        .await
        .context("failed to open store")
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display())),
        _ => Ok(()),
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
