//! Append-only execution log rows.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{ExecutionLogRow, NewExecutionLog},
    DbError,
};

/// Insert one node-invocation record.
pub async fn append_log(pool: &PgPool, entry: NewExecutionLog) -> Result<ExecutionLogRow, DbError> {
    let row = sqlx::query_as::<_, ExecutionLogRow>(
        "INSERT INTO execution_logs \
             (id, execution_id, node_id, node_name, node_type, level, message, input_data, \
              output_data, duration_ms, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING id, execution_id, node_id, node_name, node_type, level, message, input_data, \
                   output_data, duration_ms, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(entry.execution_id)
    .bind(entry.node_id)
    .bind(entry.node_name)
    .bind(entry.node_type)
    .bind(entry.level.as_str())
    .bind(entry.message)
    .bind(entry.input_data)
    .bind(entry.output_data)
    .bind(entry.duration_ms)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Logs of one execution in the order they were written.
pub async fn list_logs(pool: &PgPool, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
    Ok(sqlx::query_as::<_, ExecutionLogRow>(
        "SELECT id, execution_id, node_id, node_name, node_type, level, message, input_data, \
                output_data, duration_ms, created_at \
         FROM execution_logs WHERE execution_id = $1 ORDER BY seq ASC",
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?)
}
