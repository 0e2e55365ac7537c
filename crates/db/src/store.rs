//! The persistence contract the engine and HTTP layer depend on.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ExecutionLogRow, ExecutionPatch, ExecutionRow, NewExecution, NewExecutionLog, NewWorkflow,
    RuntimeUpdate, WorkflowRow, WorkflowStatus, WorkflowUpdate,
};
use crate::DbError;

/// Durable store for workflows, executions and execution logs.
///
/// Calls are independent; no transaction spans two of them. Callers must let
/// `create_execution` finish before appending logs for that execution.
#[async_trait]
pub trait Store: Send + Sync {
    // ----- workflows -----
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError>;
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;
    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError>;
    async fn list_workflows_by_status(&self, status: WorkflowStatus) -> Result<Vec<WorkflowRow>, DbError>;
    async fn find_workflow_by_webhook_token(&self, token: &str) -> Result<WorkflowRow, DbError>;
    async fn update_workflow(&self, id: Uuid, update: WorkflowUpdate) -> Result<WorkflowRow, DbError>;
    /// Removes the workflow together with its executions and their logs.
    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError>;
    async fn update_workflow_runtime(&self, id: Uuid, update: RuntimeUpdate) -> Result<(), DbError>;

    // ----- executions -----
    async fn create_execution(&self, new: NewExecution) -> Result<ExecutionRow, DbError>;
    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError>;
    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError>;
    async fn update_execution(&self, id: Uuid, patch: ExecutionPatch) -> Result<(), DbError>;

    // ----- execution_logs -----
    async fn append_execution_log(&self, entry: NewExecutionLog) -> Result<ExecutionLogRow, DbError>;
    async fn list_execution_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError>;
}
