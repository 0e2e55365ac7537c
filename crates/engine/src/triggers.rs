//! Trigger activation and external-event dispatch.
//!
//! `activate`/`deactivate` must be called whenever a workflow moves into or
//! out of ACTIVE, and `reconcile` once at startup.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use db::models::{RuntimeUpdate, WorkflowStatus};

use crate::models::{event_trigger_data, TriggerSpec, TriggeredBy, WorkflowDefinition};
use crate::{EngineError, WorkflowEngine};

/// What one inbound event set in motion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDispatch {
    /// Waiting executions the event resumed.
    pub resolved_waits: Vec<Uuid>,
    /// Executions started by event-triggered workflows.
    pub started: Vec<Uuid>,
}

impl WorkflowEngine {
    /// Arm the trigger of `workflow_id` according to its trigger node.
    ///
    /// Bad trigger configuration is logged and leaves the workflow inert;
    /// only persistence errors are returned.
    #[instrument(skip(self))]
    pub async fn activate(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        // Re-activation replaces any previous timer or subscription.
        self.disarm(workflow_id);

        let workflow = self.inner.store.get_workflow(workflow_id).await?;
        let spec = match WorkflowDefinition::from_value(&workflow.definition) {
            Ok(definition) => definition.trigger(),
            Err(e) => {
                warn!(%workflow_id, error = %e, "definition does not parse; trigger not armed");
                return Ok(());
            }
        };

        match spec {
            Some(TriggerSpec::Schedule { cron_expression: Some(cron) }) => {
                // Weak so an armed timer does not keep the engine alive.
                let weak = Arc::downgrade(&self.inner);
                let armed = self.inner.scheduler.arm(
                    workflow_id,
                    &cron,
                    self.inner.store.clone(),
                    move || {
                        let weak = weak.clone();
                        async move {
                            let Some(inner) = weak.upgrade() else {
                                return;
                            };
                            let engine = WorkflowEngine { inner };
                            if let Err(e) = engine
                                .start(workflow_id, TriggeredBy::Schedule, Value::Null)
                                .await
                            {
                                warn!(%workflow_id, error = %e, "scheduled run could not start");
                            }
                        }
                    },
                );
                if armed {
                    info!(%workflow_id, cron = %cron, "schedule trigger armed");
                } else {
                    warn!(%workflow_id, cron = %cron, "unsupported cron expression; trigger will never fire");
                }
            }
            Some(TriggerSpec::Schedule { cron_expression: None }) => {
                warn!(%workflow_id, "schedule trigger has no cronExpression; trigger will never fire");
            }
            Some(TriggerSpec::Event(trigger)) => {
                if trigger.matcher.event.is_empty() {
                    warn!(%workflow_id, "event trigger has no expectedEvent; trigger will never fire");
                }
                info!(%workflow_id, source = ?trigger.matcher.source_id, event = %trigger.matcher.event, "event trigger subscribed");
                self.inner
                    .events
                    .subscribe(workflow_id, trigger.matcher.source_id);
            }
            Some(TriggerSpec::Webhook(_)) | Some(TriggerSpec::Manual) => {
                debug!(%workflow_id, "trigger needs no arming");
            }
            Some(TriggerSpec::Unknown(node_type)) => {
                warn!(%workflow_id, %node_type, "unknown trigger type; workflow will never fire");
            }
            None => {
                warn!(%workflow_id, "workflow has no trigger node; workflow will never fire");
            }
        }
        Ok(())
    }

    /// Drop any timer and event subscription of `workflow_id`. Safe to call
    /// on a workflow that was never activated.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        let was_armed = self.disarm(workflow_id);
        if was_armed {
            match self
                .inner
                .store
                .update_workflow_runtime(workflow_id, RuntimeUpdate::unscheduled())
                .await
            {
                Ok(()) | Err(db::DbError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(%workflow_id, was_armed, "trigger deactivated");
        Ok(())
    }

    fn disarm(&self, workflow_id: Uuid) -> bool {
        self.inner.events.unsubscribe_all(workflow_id);
        self.inner.scheduler.disarm(workflow_id)
    }

    /// Activate every ACTIVE workflow. Returns how many were activated.
    pub async fn reconcile(&self) -> Result<usize, EngineError> {
        let active = self
            .inner
            .store
            .list_workflows_by_status(WorkflowStatus::Active)
            .await?;
        let mut activated = 0;
        for workflow in &active {
            match self.activate(workflow.id).await {
                Ok(()) => activated += 1,
                Err(e) => warn!(workflow_id = %workflow.id, error = %e, "reconcile: activation failed"),
            }
        }
        info!(activated, "trigger reconciliation finished");
        Ok(activated)
    }

    /// Whether `workflow_id` has a live schedule timer or event subscription.
    pub fn is_armed(&self, workflow_id: Uuid) -> bool {
        self.inner.scheduler.is_armed(workflow_id) || self.inner.events.is_subscribed(workflow_id)
    }

    /// Feed an external event (e.g. a bot state change) into the engine.
    ///
    /// Waiting executions are resumed first; then every subscribed, still
    /// ACTIVE workflow whose current trigger config matches starts a run.
    #[instrument(skip(self, payload))]
    pub async fn on_external_event(
        &self,
        source_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<EventDispatch, EngineError> {
        let resolved_waits = self.inner.events.resolve_waits(source_id, event_type, &payload);

        let mut started = Vec::new();
        for workflow_id in self.inner.events.subscribers_for(source_id) {
            let workflow = match self.inner.store.get_workflow(workflow_id).await {
                Ok(w) => w,
                Err(db::DbError::NotFound) => {
                    self.inner.events.unsubscribe_all(workflow_id);
                    continue;
                }
                Err(e) => {
                    warn!(%workflow_id, error = %e, "could not load subscribed workflow; skipped");
                    continue;
                }
            };
            if !workflow.is_active() {
                continue;
            }

            // Re-read the trigger so edits apply without re-activation.
            let trigger = match WorkflowDefinition::from_value(&workflow.definition)
                .ok()
                .and_then(|d| d.trigger())
            {
                Some(TriggerSpec::Event(trigger)) => trigger,
                _ => continue,
            };
            if !trigger.matcher.matches(source_id, event_type, &payload) {
                continue;
            }

            let data = event_trigger_data(source_id, event_type, payload.clone());
            match self.start(workflow_id, TriggeredBy::Event, data).await {
                Ok(execution_id) => started.push(execution_id),
                Err(e) => warn!(%workflow_id, error = %e, "event-triggered run could not start"),
            }
        }

        debug!(resolved = resolved_waits.len(), started = started.len(), "external event dispatched");
        Ok(EventDispatch {
            resolved_waits,
            started,
        })
    }
}
