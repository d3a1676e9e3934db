//! Table pool server.
//!
//! Serves the HTTP API and runs the consolidation sweeper until Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Error;
use log::info;
use pico_args::Arguments;
use table_pool::{Database, MemoryStore, PgTableStore, Sweeper, TableEngine, TableStore};
use tokio::sync::watch;
use tp_server::{
    api,
    config::{ServerConfig, StorageBackend},
    logging, metrics,
};

const HELP: &str = "\
Run the table pool server

USAGE:
  tp_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:6969]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --memory                 Keep state in memory instead of PostgreSQL
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  USE_MEMORY_STORE         Same as --memory when true
  TELEGRAM_BOT_NAME        Bot that invite links point at
  SWEEP_INTERVAL_SECS      Seconds between sweeps [default: 300]
  SWEEP_STALE_SECS         Idle seconds before a table is swept [default: 600]
  METRICS_BIND             Prometheus listener (disabled when unset)
  SEED_POOL                Open one table per kind and fee at startup [default: true]
";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let use_memory = pargs.contains("--memory");
    let bind: Option<SocketAddr> = pargs.opt_value_from_str("--bind")?;
    let database_url: Option<String> = pargs.opt_value_from_str("--db-url")?;

    logging::init();

    let config = ServerConfig::from_env(bind, database_url, use_memory)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        info!("Metrics exported at http://{}/metrics", addr);
    }

    let (store, database): (Arc<dyn TableStore>, Option<Database>) = match config.storage {
        StorageBackend::Postgres => {
            info!("Connecting to database");
            let db = Database::new(&config.database)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
            db.migrate()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            info!("Database connected and migrated");

            let store: Arc<dyn TableStore> =
                Arc::new(PgTableStore::new(Arc::new(db.pool().clone())));
            (store, Some(db))
        }
        StorageBackend::Memory => {
            log::warn!("Using in-memory store; all state is lost on exit");
            let store: Arc<dyn TableStore> = Arc::new(MemoryStore::new());
            (store, None)
        }
    };

    let engine = TableEngine::new(store);

    if config.seed_pool {
        let created = engine.ensure_pool().await?;
        info!("Table pool ready ({} table(s) created)", created.len());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Sweeper::new(engine.clone(), config.sweeper);
    let sweeper_handle = tokio::spawn(sweeper.run_with(shutdown_rx, metrics::sweep_report));

    let app = api::create_router(api::AppState::new(
        engine,
        database.clone(),
        &config.bot_name,
    ));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.bind, e))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Shutting down server...");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_handle.await {
        log::error!("Sweeper task failed: {}", e);
    }
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
