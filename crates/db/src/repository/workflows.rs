//! Workflow persistence.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{NewWorkflow, RuntimeUpdate, WorkflowRow, WorkflowStatus, WorkflowUpdate},
    DbError,
};

const COLUMNS: &str = "id, user_id, name, description, definition, status, trigger_type, \
     cron_expression, webhook_token, last_run_at, next_run_at, run_count, success_count, \
     failure_count, created_at, updated_at";

/// Insert a new workflow into the database.
pub async fn create_workflow(pool: &PgPool, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
    let now = Utc::now();
    let query = format!(
        "INSERT INTO workflows \
             (id, user_id, name, description, definition, status, trigger_type, cron_expression, \
              webhook_token, run_count, success_count, failure_count, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, 0, $10, $10) \
         RETURNING {COLUMNS}"
    );

    let row = sqlx::query_as::<_, WorkflowRow>(&query)
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.name)
        .bind(new.description)
        .bind(new.definition)
        .bind(new.status.as_str())
        .bind(new.trigger.trigger_type.map(|t| t.as_str()))
        .bind(new.trigger.cron_expression)
        .bind(new.trigger.webhook_token)
        .bind(now)
        .fetch_one(pool)
        .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let query = format!("SELECT {COLUMNS} FROM workflows WHERE id = $1");
    sqlx::query_as::<_, WorkflowRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Return all workflows ordered by creation time (newest first).
pub async fn list_workflows(pool: &PgPool) -> Result<Vec<WorkflowRow>, DbError> {
    let query = format!("SELECT {COLUMNS} FROM workflows ORDER BY created_at DESC");
    Ok(sqlx::query_as::<_, WorkflowRow>(&query).fetch_all(pool).await?)
}

pub async fn list_workflows_by_status(
    pool: &PgPool,
    status: WorkflowStatus,
) -> Result<Vec<WorkflowRow>, DbError> {
    let query = format!("SELECT {COLUMNS} FROM workflows WHERE status = $1 ORDER BY created_at ASC");
    Ok(sqlx::query_as::<_, WorkflowRow>(&query)
        .bind(status.as_str())
        .fetch_all(pool)
        .await?)
}

pub async fn find_by_webhook_token(pool: &PgPool, token: &str) -> Result<WorkflowRow, DbError> {
    let query = format!("SELECT {COLUMNS} FROM workflows WHERE webhook_token = $1");
    sqlx::query_as::<_, WorkflowRow>(&query)
        .bind(token)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Apply a partial update and return the new row.
pub async fn update_workflow(
    pool: &PgPool,
    id: Uuid,
    update: WorkflowUpdate,
) -> Result<WorkflowRow, DbError> {
    let set_trigger = update.trigger.is_some();
    let trigger = update.trigger.unwrap_or_default();
    let query = format!(
        "UPDATE workflows SET \
             name = COALESCE($2, name), \
             definition = COALESCE($3, definition), \
             status = COALESCE($4, status), \
             trigger_type = CASE WHEN $5 THEN $6 ELSE trigger_type END, \
             cron_expression = CASE WHEN $5 THEN $7 ELSE cron_expression END, \
             webhook_token = CASE WHEN $5 THEN $8 ELSE webhook_token END, \
             updated_at = $9 \
         WHERE id = $1 \
         RETURNING {COLUMNS}"
    );

    sqlx::query_as::<_, WorkflowRow>(&query)
        .bind(id)
        .bind(update.name)
        .bind(update.definition)
        .bind(update.status.map(|s| s.as_str()))
        .bind(set_trigger)
        .bind(trigger.trigger_type.map(|t| t.as_str()))
        .bind(trigger.cron_expression)
        .bind(trigger.webhook_token)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Permanently delete a workflow by its primary key.
///
/// Executions and logs go with it via `ON DELETE CASCADE`.
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// Apply run counters and schedule timestamps.
pub async fn update_runtime(pool: &PgPool, id: Uuid, update: RuntimeUpdate) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE workflows SET \
             last_run_at = COALESCE($2, last_run_at), \
             next_run_at = CASE WHEN $3 THEN NULL ELSE COALESCE($4, next_run_at) END, \
             run_count = run_count + $5, \
             success_count = success_count + $6, \
             failure_count = failure_count + $7 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(update.last_run_at)
    .bind(update.clear_next_run_at)
    .bind(update.next_run_at)
    .bind(i64::from(update.increment_runs))
    .bind(i64::from(update.increment_successes))
    .bind(i64::from(update.increment_failures))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
