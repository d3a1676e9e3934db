//! HTTP API for the table pool.
//!
//! # Endpoints
//!
//! ```text
//! GET  /health                           - Health check
//! POST /api/v1/tables                    - Create a table
//! GET  /api/v1/tables?kind=&status=      - List tables
//! GET  /api/v1/tables/{table_id}         - Table with seats and prizes
//! POST /api/v1/tables/{table_id}/join    - Take a seat
//! GET  /api/v1/tables/invite/{token}     - Resolve an invite link
//! ```
//!
//! Every response carries an `x-request-id` header. Errors are returned as
//! `{"error": "...", "code": "..."}`.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use table_pool::{MemoryStore, TableEngine};
//! use tp_server::api::{AppState, create_router};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TableEngine::new(Arc::new(MemoryStore::new()));
//! let state = AppState::new(engine, None, "TablePoolBot");
//!
//! let app = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:6969").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # CORS
//!
//! CORS is configured permissively. Put the server behind a proxy that
//! restricts origins in production.

pub mod request_id;
pub mod tables;
pub mod validation;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use table_pool::{Database, TableEngine, TableFilter, TableStatus};
use tower_http::cors::CorsLayer;

/// State shared by every handler
///
/// `database` is only present when the engine runs on PostgreSQL; the health
/// check pings it.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TableEngine>,
    pub database: Option<Database>,
    pub bot_name: Arc<str>,
}

impl AppState {
    pub fn new(engine: TableEngine, database: Option<Database>, bot_name: &str) -> Self {
        Self {
            engine: Arc::new(engine),
            database,
            bot_name: Arc::from(bot_name),
        }
    }
}

/// Build the router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", create_v1_router())
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route(
            "/tables",
            get(tables::list_tables).post(tables::create_table),
        )
        .route("/tables/{table_id}", get(tables::get_table))
        .route("/tables/{table_id}/join", post(tables::join_table))
        .route("/tables/invite/{token}", get(tables::get_table_by_invite))
}

/// Health check for monitoring and load balancers.
///
/// Returns `503 Service Unavailable` when the database or the store does not
/// answer.
///
/// ```bash
/// curl http://localhost:6969/health
/// # {"status":"healthy","storage":"postgres","database":true,"open_tables":6,...}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = match &state.database {
        Some(db) => db.health_check().await.is_ok(),
        None => true,
    };

    let open_tables = state
        .engine
        .list_tables(TableFilter {
            kind: None,
            status: Some(TableStatus::Open),
        })
        .await
        .map(|tables| tables.len())
        .ok();

    let healthy = db_healthy && open_tables.is_some();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": if state.database.is_some() { "postgres" } else { "memory" },
        "database": db_healthy,
        "open_tables": open_tables,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
