use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use db::models::{ExecutionLogRow, ExecutionRow};
use uuid::Uuid;

use crate::error::{db_status, engine_status};
use crate::AppState;

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ExecutionRow>, StatusCode> {
    state.engine.store().get_execution(id).await.map(Json).map_err(db_status)
}

pub async fn logs(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ExecutionLogRow>>, StatusCode> {
    // 404 for an unknown execution rather than an empty list.
    state.engine.store().get_execution(id).await.map_err(db_status)?;
    state
        .engine
        .store()
        .list_execution_logs(id)
        .await
        .map(Json)
        .map_err(db_status)
}

pub async fn cancel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    state.engine.store().get_execution(id).await.map_err(db_status)?;
    state.engine.cancel_execution(id).map_err(engine_status)?;
    Ok(StatusCode::ACCEPTED)
}
