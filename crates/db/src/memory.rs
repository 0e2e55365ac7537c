//! In-process [`Store`] backed by hash maps.
//!
//! Used by the test suites and by `hopperflow serve --in-memory`; nothing
//! survives a restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::models::{
    ExecutionLogRow, ExecutionPatch, ExecutionRow, NewExecution, NewExecutionLog, NewWorkflow,
    RuntimeUpdate, WorkflowRow, WorkflowStatus, WorkflowUpdate,
};
use crate::{DbError, Store};

#[derive(Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowRow>,
    executions: HashMap<Uuid, ExecutionRow>,
    logs: Vec<ExecutionLogRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        let now = Utc::now();
        let row = WorkflowRow {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            name: new.name,
            description: new.description,
            definition: new.definition,
            status: new.status.to_string(),
            trigger_type: new.trigger.trigger_type.map(|t| t.to_string()),
            cron_expression: new.trigger.cron_expression,
            webhook_token: new.trigger.webhook_token,
            last_run_at: None,
            next_run_at: None,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.tables().workflows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.tables().workflows.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        let mut rows: Vec<_> = self.tables().workflows.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn list_workflows_by_status(&self, status: WorkflowStatus) -> Result<Vec<WorkflowRow>, DbError> {
        let mut rows: Vec<_> = self
            .tables()
            .workflows
            .values()
            .filter(|w| w.status == status.as_str())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn find_workflow_by_webhook_token(&self, token: &str) -> Result<WorkflowRow, DbError> {
        self.tables()
            .workflows
            .values()
            .find(|w| w.webhook_token.as_deref() == Some(token))
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn update_workflow(&self, id: Uuid, update: WorkflowUpdate) -> Result<WorkflowRow, DbError> {
        let mut tables = self.tables();
        let row = tables.workflows.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(name) = update.name {
            row.name = name;
        }
        if let Some(definition) = update.definition {
            row.definition = definition;
        }
        if let Some(status) = update.status {
            row.status = status.to_string();
        }
        if let Some(trigger) = update.trigger {
            row.trigger_type = trigger.trigger_type.map(|t| t.to_string());
            row.cron_expression = trigger.cron_expression;
            row.webhook_token = trigger.webhook_token;
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        let mut tables = self.tables();
        tables.workflows.remove(&id).ok_or(DbError::NotFound)?;

        let doomed: Vec<Uuid> = tables
            .executions
            .values()
            .filter(|e| e.workflow_id == id)
            .map(|e| e.id)
            .collect();
        for execution_id in &doomed {
            tables.executions.remove(execution_id);
        }
        tables.logs.retain(|log| !doomed.contains(&log.execution_id));
        Ok(())
    }

    async fn update_workflow_runtime(&self, id: Uuid, update: RuntimeUpdate) -> Result<(), DbError> {
        let mut tables = self.tables();
        let row = tables.workflows.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(at) = update.last_run_at {
            row.last_run_at = Some(at);
        }
        if update.clear_next_run_at {
            row.next_run_at = None;
        } else if let Some(at) = update.next_run_at {
            row.next_run_at = Some(at);
        }
        row.run_count += i64::from(update.increment_runs);
        row.success_count += i64::from(update.increment_successes);
        row.failure_count += i64::from(update.increment_failures);
        Ok(())
    }

    async fn create_execution(&self, new: NewExecution) -> Result<ExecutionRow, DbError> {
        let mut tables = self.tables();
        if !tables.workflows.contains_key(&new.workflow_id) {
            return Err(DbError::NotFound);
        }
        let row = ExecutionRow {
            id: Uuid::new_v4(),
            workflow_id: new.workflow_id,
            status: new.status.to_string(),
            triggered_by: new.triggered_by,
            trigger_data: new.trigger_data,
            current_node_id: None,
            variables: json!({}),
            node_outputs: json!({}),
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        tables.executions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError> {
        self.tables().executions.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError> {
        let mut rows: Vec<_> = self
            .tables()
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }

    async fn update_execution(&self, id: Uuid, patch: ExecutionPatch) -> Result<(), DbError> {
        let mut tables = self.tables();
        let row = tables.executions.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(status) = patch.status {
            row.status = status.to_string();
        }
        if let Some(data) = patch.trigger_data {
            row.trigger_data = data;
        }
        if let Some(node_id) = patch.current_node_id {
            row.current_node_id = Some(node_id);
        }
        if let Some(variables) = patch.variables {
            row.variables = variables;
        }
        if let Some(outputs) = patch.node_outputs {
            row.node_outputs = outputs;
        }
        if let Some(message) = patch.error_message {
            row.error_message = Some(message);
        }
        if let Some(at) = patch.completed_at {
            row.completed_at = Some(at);
        }
        Ok(())
    }

    async fn append_execution_log(&self, entry: NewExecutionLog) -> Result<ExecutionLogRow, DbError> {
        let mut tables = self.tables();
        if !tables.executions.contains_key(&entry.execution_id) {
            return Err(DbError::NotFound);
        }
        let row = ExecutionLogRow {
            id: Uuid::new_v4(),
            execution_id: entry.execution_id,
            node_id: entry.node_id,
            node_name: entry.node_name,
            node_type: entry.node_type,
            level: entry.level.to_string(),
            message: entry.message,
            input_data: entry.input_data,
            output_data: entry.output_data,
            duration_ms: entry.duration_ms,
            created_at: Utc::now(),
        };
        tables.logs.push(row.clone());
        Ok(row)
    }

    async fn list_execution_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
        Ok(self
            .tables()
            .logs
            .iter()
            .filter(|log| log.execution_id == execution_id)
            .cloned()
            .collect())
    }
}
