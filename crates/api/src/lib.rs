//! `api` crate: HTTP REST API over the workflow engine.
//!
//! Exposes:
//! ```text
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   POST   /api/v1/workflows/import
//!   GET    /api/v1/workflows/:id
//!   DELETE /api/v1/workflows/:id
//!   PUT    /api/v1/workflows/:id/definition
//!   PUT    /api/v1/workflows/:id/status
//!   POST   /api/v1/workflows/:id/execute
//!   GET    /api/v1/workflows/:id/executions
//!   GET    /api/v1/workflows/:id/export
//!   GET    /api/v1/executions/:id
//!   GET    /api/v1/executions/:id/logs
//!   POST   /api/v1/executions/:id/cancel
//!   POST   /api/v1/events
//!   *      /api/v1/webhook/:token
//!   GET    /api/v1/nodes
//! ```

mod error;
mod handlers;

use axum::routing::{any, get, post, put};
use axum::Router;
use engine::WorkflowEngine;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use handlers::{catalog, events, executions, webhooks, workflows};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
}

impl AppState {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/workflows", get(workflows::list).post(workflows::create))
        .route("/workflows/import", post(workflows::import))
        .route("/workflows/:id", get(workflows::get).delete(workflows::delete))
        .route("/workflows/:id/definition", put(workflows::update_definition))
        .route("/workflows/:id/status", put(workflows::set_status))
        .route("/workflows/:id/execute", post(workflows::execute))
        .route("/workflows/:id/executions", get(workflows::executions))
        .route("/workflows/:id/export", get(workflows::export))
        .route("/executions/:id", get(executions::get))
        .route("/executions/:id/logs", get(executions::logs))
        .route("/executions/:id/cancel", post(executions::cancel))
        .route("/events", post(events::ingest))
        .route("/webhook/:token", any(webhooks::handle))
        .route("/nodes", get(catalog::catalog));

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
