//! Execution persistence.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{ExecutionPatch, ExecutionRow, NewExecution},
    DbError,
};

const COLUMNS: &str = "id, workflow_id, status, triggered_by, trigger_data, current_node_id, \
     variables, node_outputs, error_message, started_at, completed_at";

/// Create a new execution record in the requested status.
pub async fn create_execution(pool: &PgPool, new: NewExecution) -> Result<ExecutionRow, DbError> {
    let query = format!(
        "INSERT INTO workflow_executions \
             (id, workflow_id, status, triggered_by, trigger_data, variables, node_outputs, started_at) \
         VALUES ($1, $2, $3, $4, $5, '{{}}'::jsonb, '{{}}'::jsonb, $6) \
         RETURNING {COLUMNS}"
    );

    let row = sqlx::query_as::<_, ExecutionRow>(&query)
        .bind(Uuid::new_v4())
        .bind(new.workflow_id)
        .bind(new.status.as_str())
        .bind(new.triggered_by)
        .bind(new.trigger_data)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

    Ok(row)
}

pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<ExecutionRow, DbError> {
    let query = format!("SELECT {COLUMNS} FROM workflow_executions WHERE id = $1");
    sqlx::query_as::<_, ExecutionRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Executions of one workflow, newest first.
pub async fn list_executions(pool: &PgPool, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError> {
    let query = format!(
        "SELECT {COLUMNS} FROM workflow_executions WHERE workflow_id = $1 ORDER BY started_at DESC"
    );
    Ok(sqlx::query_as::<_, ExecutionRow>(&query)
        .bind(workflow_id)
        .fetch_all(pool)
        .await?)
}

/// Apply the non-`None` fields of `patch`.
pub async fn update_execution(pool: &PgPool, id: Uuid, patch: ExecutionPatch) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE workflow_executions SET \
             status = COALESCE($2, status), \
             trigger_data = COALESCE($3, trigger_data), \
             current_node_id = COALESCE($4, current_node_id), \
             variables = COALESCE($5, variables), \
             node_outputs = COALESCE($6, node_outputs), \
             error_message = COALESCE($7, error_message), \
             completed_at = COALESCE($8, completed_at) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(patch.status.map(|s| s.as_str()))
    .bind(patch.trigger_data)
    .bind(patch.current_node_id)
    .bind(patch.variables)
    .bind(patch.node_outputs)
    .bind(patch.error_message)
    .bind(patch.completed_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
