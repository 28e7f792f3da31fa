use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, Backend};
use services::{
    console_service::ConsoleService,
    hierarchy::HierarchyEngine,
    path_codec::PathCodec,
    refresher::spawn_refresher,
    stats::StatsAggregator,
    store::{MemoryStore, ObjectStore, SqliteStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args().context("invalid configuration")?;

    tracing::info!("Starting bucket console with config: {:?}", cfg);

    // --- Object store ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Memory => {
            if migrate {
                anyhow::bail!("--migrate requires the sqlite backend");
            }
            tracing::warn!("Using in-memory object store; contents are lost on exit");
            Arc::new(MemoryStore::new())
        }
        Backend::Sqlite => {
            let store = open_sqlite_store(&cfg).await?;
            if migrate {
                store.migrate().await.context("running migrations")?;
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(store)
        }
    };

    // --- Engines and console service ---
    let hierarchy = HierarchyEngine::new(
        store,
        PathCodec::new(cfg.delimiter),
        cfg.retry_policy(),
        cfg.list_page_size,
    );
    let stats = Arc::new(StatsAggregator::new(hierarchy, cfg.stats_policy()));
    let console = ConsoleService::new(stats.clone(), cfg.stats_refresh_on_mutation);

    let shutdown = CancellationToken::new();
    let refresher = cfg
        .refresh_interval()
        .map(|interval| spawn_refresher(stats, interval, shutdown.clone()));

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(console);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(handle) = refresher {
        if let Err(err) = handle.await {
            tracing::warn!("stats refresher ended abnormally: {}", err);
        }
    }
    tracing::info!("Server stopped");
    Ok(())
}

/// Open (creating directories as needed) the SQLite-backed store.
async fn open_sqlite_store(cfg: &AppConfig) -> Result<SqliteStore> {
    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)
            .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let in_memory = db_path.starts_with(":memory:");

    if !in_memory {
        let db_path_obj = Path::new(db_path);
        if let Some(parent) = db_path_obj.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
        // SQLx will not create the database file itself.
        if let Err(e) = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(db_path_obj)
        {
            tracing::warn!("Failed to open database file manually: {}", e);
        }
    }

    let db = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect(db_url)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    let store = SqliteStore::new(Arc::new(db), cfg.storage_dir.clone());
    if in_memory {
        // A private in-memory database starts without tables.
        store.migrate().await.context("initialising in-memory schema")?;
    }
    Ok(store)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!("failed to listen for ctrl-c: {}", err);
                shutdown.cancelled().await;
            }
        }
        _ = shutdown.cancelled() => {}
    }
    tracing::info!("Shutdown signal received");
}
