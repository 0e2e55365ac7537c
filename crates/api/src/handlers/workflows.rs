use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use db::models::{ExecutionRow, WorkflowRow, WorkflowStatus};
use engine::{TriggeredBy, WorkflowDefinition, WorkflowExport};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{db_status, engine_status};
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowDto {
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub definition: Value,
}

#[derive(Deserialize)]
pub struct UpdateDefinitionDto {
    pub definition: Value,
}

#[derive(Deserialize)]
pub struct SetStatusDto {
    pub status: WorkflowStatus,
}

#[derive(Deserialize, Default)]
pub struct ExecuteWorkflowDto {
    #[serde(default)]
    pub input: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportWorkflowDto {
    pub user_id: Uuid,
    pub workflow: WorkflowExport,
}

fn parse_definition(value: &Value) -> Result<WorkflowDefinition, StatusCode> {
    if value.is_null() {
        return Ok(WorkflowDefinition::default());
    }
    WorkflowDefinition::from_value(value).map_err(engine_status)
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<WorkflowRow>>, StatusCode> {
    state
        .engine
        .store()
        .list_workflows()
        .await
        .map(Json)
        .map_err(db_status)
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowRow>, StatusCode> {
    state.engine.store().get_workflow(id).await.map(Json).map_err(db_status)
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowDto>,
) -> Result<(StatusCode, Json<WorkflowRow>), StatusCode> {
    let definition = parse_definition(&payload.definition)?;
    let row = state
        .engine
        .create_workflow(payload.user_id, payload.name, payload.description, definition)
        .await
        .map_err(engine_status)?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn delete(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    state.engine.delete_workflow(id).await.map_err(engine_status)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_definition(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateDefinitionDto>,
) -> Result<Json<WorkflowRow>, StatusCode> {
    let definition = parse_definition(&payload.definition)?;
    state
        .engine
        .update_definition(id, definition)
        .await
        .map(Json)
        .map_err(engine_status)
}

pub async fn set_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<SetStatusDto>,
) -> Result<Json<WorkflowRow>, StatusCode> {
    state
        .engine
        .set_status(id, payload.status)
        .await
        .map(Json)
        .map_err(engine_status)
}

/// Manual run. Responds once the execution exists; progress is streamed
/// through notifications and visible via the executions routes.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    payload: Option<Json<ExecuteWorkflowDto>>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let Json(payload) = payload.unwrap_or_default();
    let execution_id = state
        .engine
        .start(id, TriggeredBy::Manual, payload.input)
        .await
        .map_err(engine_status)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "executionId": execution_id }))))
}

pub async fn executions(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ExecutionRow>>, StatusCode> {
    state
        .engine
        .store()
        .list_executions(id)
        .await
        .map(Json)
        .map_err(db_status)
}

pub async fn export(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowExport>, StatusCode> {
    state.engine.export_workflow(id).await.map(Json).map_err(engine_status)
}

pub async fn import(
    State(state): State<AppState>,
    Json(payload): Json<ImportWorkflowDto>,
) -> Result<(StatusCode, Json<WorkflowRow>), StatusCode> {
    let row = state
        .engine
        .import_workflow(payload.user_id, payload.workflow)
        .await
        .map_err(engine_status)?;
    Ok((StatusCode::CREATED, Json(row)))
}
