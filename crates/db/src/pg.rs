//! Postgres-backed [`Store`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ExecutionLogRow, ExecutionPatch, ExecutionRow, NewExecution, NewExecutionLog, NewWorkflow,
    RuntimeUpdate, WorkflowRow, WorkflowStatus, WorkflowUpdate,
};
use crate::repository::{executions, logs, workflows};
use crate::{DbError, DbPool, Store};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        workflows::create_workflow(&self.pool, new).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        workflows::list_workflows(&self.pool).await
    }

    async fn list_workflows_by_status(&self, status: WorkflowStatus) -> Result<Vec<WorkflowRow>, DbError> {
        workflows::list_workflows_by_status(&self.pool, status).await
    }

    async fn find_workflow_by_webhook_token(&self, token: &str) -> Result<WorkflowRow, DbError> {
        workflows::find_by_webhook_token(&self.pool, token).await
    }

    async fn update_workflow(&self, id: Uuid, update: WorkflowUpdate) -> Result<WorkflowRow, DbError> {
        workflows::update_workflow(&self.pool, id, update).await
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        workflows::delete_workflow(&self.pool, id).await
    }

    async fn update_workflow_runtime(&self, id: Uuid, update: RuntimeUpdate) -> Result<(), DbError> {
        workflows::update_runtime(&self.pool, id, update).await
    }

    async fn create_execution(&self, new: NewExecution) -> Result<ExecutionRow, DbError> {
        executions::create_execution(&self.pool, new).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError> {
        executions::get_execution(&self.pool, id).await
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError> {
        executions::list_executions(&self.pool, workflow_id).await
    }

    async fn update_execution(&self, id: Uuid, patch: ExecutionPatch) -> Result<(), DbError> {
        executions::update_execution(&self.pool, id, patch).await
    }

    async fn append_execution_log(&self, entry: NewExecutionLog) -> Result<ExecutionLogRow, DbError> {
        logs::append_log(&self.pool, entry).await
    }

    async fn list_execution_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
        logs::list_logs(&self.pool, execution_id).await
    }
}
