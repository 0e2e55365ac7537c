//! Webhook entry point. The HTTP layer hands over the raw request pieces;
//! the checks against the trigger node's config happen here.

use serde_json::{json, Map, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{TriggerSpec, TriggeredBy, WorkflowDefinition};
use crate::{WebhookError, WorkflowEngine};

/// Header carrying the shared secret of a `requireAuth` webhook.
pub const SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub method: String,
    /// Value of the [`SECRET_HEADER`] header, if sent.
    pub secret: Option<String>,
    pub body: Value,
    pub headers: Map<String, Value>,
    pub query: Map<String, Value>,
}

impl WorkflowEngine {
    /// Start a run of the workflow published under `token`.
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn handle_webhook(&self, token: &str, request: WebhookRequest) -> Result<Uuid, WebhookError> {
        let workflow = match self.inner.store.find_workflow_by_webhook_token(token).await {
            Ok(w) => w,
            Err(db::DbError::NotFound) => return Err(WebhookError::NotFound),
            Err(e) => return Err(WebhookError::Engine(e.into())),
        };
        if !workflow.is_active() {
            return Err(WebhookError::Inactive);
        }

        let definition = WorkflowDefinition::from_value(&workflow.definition)?;
        let Some(TriggerSpec::Webhook(trigger)) = definition.trigger() else {
            // The token outlived a trigger change.
            return Err(WebhookError::NotFound);
        };

        if !trigger.method.eq_ignore_ascii_case(&request.method) {
            return Err(WebhookError::MethodNotAllowed {
                expected: trigger.method,
                got: request.method.to_ascii_uppercase(),
            });
        }
        if trigger.require_auth {
            let authorised = match (&trigger.secret, &request.secret) {
                (Some(expected), Some(given)) => expected == given,
                _ => false,
            };
            if !authorised {
                return Err(WebhookError::Unauthorized);
            }
        }

        let trigger_data = json!({
            "body": request.body,
            "headers": request.headers,
            "query": request.query,
        });
        let execution_id = self
            .start(workflow.id, TriggeredBy::Webhook, trigger_data)
            .await?;
        info!(workflow_id = %workflow.id, %execution_id, "webhook accepted");
        Ok(execution_id)
    }
}
