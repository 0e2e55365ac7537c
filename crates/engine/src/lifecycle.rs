//! Workflow lifecycle: creation, status changes, definition edits,
//! deletion and export/import. Every path that moves a workflow into or
//! out of ACTIVE goes through the trigger manager.

use tracing::{info, instrument};
use uuid::Uuid;

use db::models::{NewWorkflow, WorkflowRow, WorkflowStatus, WorkflowUpdate};

use crate::dag::validate_definition;
use crate::models::{derive_trigger_fields, WorkflowDefinition, WorkflowExport};
use crate::{EngineError, WorkflowEngine};

impl WorkflowEngine {
    /// Store a new DRAFT workflow. Drafts may be incomplete; validation
    /// happens on activation.
    pub async fn create_workflow(
        &self,
        user_id: Uuid,
        name: impl Into<String>,
        description: Option<String>,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowRow, EngineError> {
        let trigger = derive_trigger_fields(&definition, None);
        let row = self
            .inner
            .store
            .create_workflow(NewWorkflow {
                user_id,
                name: name.into(),
                description,
                definition: definition.to_value()?,
                status: WorkflowStatus::Draft,
                trigger,
            })
            .await?;
        info!(workflow_id = %row.id, "workflow created");
        Ok(row)
    }

    /// Change the status, arming the trigger on ACTIVE and disarming it on
    /// anything else.
    #[instrument(skip(self))]
    pub async fn set_status(&self, workflow_id: Uuid, status: WorkflowStatus) -> Result<WorkflowRow, EngineError> {
        if status == WorkflowStatus::Active {
            let current = self.inner.store.get_workflow(workflow_id).await?;
            validate_definition(&WorkflowDefinition::from_value(&current.definition)?)?;
        }

        let row = self
            .inner
            .store
            .update_workflow(
                workflow_id,
                WorkflowUpdate {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await?;

        if status == WorkflowStatus::Active {
            self.activate(workflow_id).await?;
        } else {
            self.deactivate(workflow_id).await?;
        }
        info!(%workflow_id, %status, "workflow status changed");
        self.inner.store.get_workflow(row.id).await.map_err(Into::into)
    }

    /// Replace the definition wholesale and re-derive the trigger columns.
    /// An ACTIVE workflow must stay valid and is re-activated.
    #[instrument(skip(self, definition))]
    pub async fn update_definition(
        &self,
        workflow_id: Uuid,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowRow, EngineError> {
        let current = self.inner.store.get_workflow(workflow_id).await?;
        let active = current.is_active();
        if active {
            validate_definition(&definition)?;
        }

        let trigger = derive_trigger_fields(&definition, current.webhook_token.as_deref());
        let row = self
            .inner
            .store
            .update_workflow(
                workflow_id,
                WorkflowUpdate {
                    definition: Some(definition.to_value()?),
                    trigger: Some(trigger),
                    ..Default::default()
                },
            )
            .await?;

        if active {
            self.activate(workflow_id).await?;
            return self.inner.store.get_workflow(workflow_id).await.map_err(Into::into);
        }
        Ok(row)
    }

    /// Disarm, cancel anything still running, then delete the workflow with
    /// its executions and logs.
    #[instrument(skip(self))]
    pub async fn delete_workflow(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        self.deactivate(workflow_id).await?;
        for execution_id in self.live_executions_of(workflow_id) {
            // Already finished in the meantime is fine.
            let _ = self.cancel_execution(execution_id);
        }
        self.inner.store.delete_workflow(workflow_id).await?;
        info!(%workflow_id, "workflow deleted");
        Ok(())
    }

    pub async fn export_workflow(&self, workflow_id: Uuid) -> Result<WorkflowExport, EngineError> {
        let row = self.inner.store.get_workflow(workflow_id).await?;
        Ok(WorkflowExport {
            name: row.name,
            description: row.description,
            definition: WorkflowDefinition::from_value(&row.definition)?,
        })
    }

    /// Create a DRAFT copy owned by `user_id`. Node ids are kept; webhook
    /// workflows get a fresh token.
    pub async fn import_workflow(&self, user_id: Uuid, export: WorkflowExport) -> Result<WorkflowRow, EngineError> {
        self.create_workflow(user_id, export.name, export.description, export.definition)
            .await
    }
}
