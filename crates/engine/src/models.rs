//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow graph looks like
//! in memory. They serialise to/from the JSONB `definition` column of the
//! `workflows` table, in the camelCase shape the editor produces.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use db::models::{TriggerFields, TriggerType};
use nodes::config::{bool_field, object_field, str_field, u64_field};

use crate::events::EventMatcher;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Canvas position; ignored by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Dotted type; the prefix is the category (`trigger.`, `logic.`, `action.<domain>.`).
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub label: String,
    /// Opaque settings interpreted by the node's executor.
    #[serde(default)]
    pub config: Value,
}

impl Node {
    pub fn is_trigger(&self) -> bool {
        self.node_type.starts_with("trigger.")
    }

    /// Label for logs and notifications, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed edge from one node's output handle to another node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    /// Output branch this edge follows; `None` follows every branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    /// Target input name → expression over the source node's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_mapping: Option<BTreeMap<String, String>>,
}

impl Edge {
    /// Whether this edge is followed when its source produced `handle`.
    pub fn follows(&self, handle: Option<&str>) -> bool {
        match (&self.source_handle, handle) {
            (None, _) => true,
            (Some(expected), Some(produced)) => expected == produced,
            (Some(_), None) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Editor viewport; carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Value>,
}

impl WorkflowDefinition {
    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        Ok(Self::deserialize(value)?)
    }

    pub fn to_value(&self) -> Result<Value, EngineError> {
        Ok(serde_json::to_value(self)?)
    }

    /// The first `trigger.*` node. Validation guarantees there is exactly one.
    pub fn trigger_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_trigger())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Trigger setup described by the trigger node, if any.
    pub fn trigger(&self) -> Option<TriggerSpec> {
        self.trigger_node().map(TriggerSpec::from_node)
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// Default window a manual run of an event-triggered workflow waits.
pub const DEFAULT_EVENT_WAIT: Duration = Duration::from_secs(5 * 60);

/// How a workflow is started, read from its trigger node's config.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    Manual,
    Schedule { cron_expression: Option<String> },
    Event(EventTrigger),
    Webhook(WebhookTrigger),
    /// A `trigger.*` type the engine does not know how to arm.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventTrigger {
    pub matcher: EventMatcher,
    /// How long a manual run waits for the event.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTrigger {
    pub method: String,
    pub require_auth: bool,
    pub secret: Option<String>,
}

impl TriggerSpec {
    pub fn from_node(node: &Node) -> Self {
        let config = &node.config;
        match node.node_type.as_str() {
            "trigger.manual" => Self::Manual,
            "trigger.schedule" => Self::Schedule {
                cron_expression: str_field(config, "cronExpression").map(|s| s.trim().to_owned()),
            },
            "trigger.event" => {
                let source_id = str_field(config, "sourceId")
                    .map(str::trim)
                    .filter(|s| *s != "*" && *s != "any")
                    .map(str::to_owned);
                let filter = object_field(config, "filter").ok().flatten().unwrap_or_default();
                Self::Event(EventTrigger {
                    matcher: EventMatcher {
                        source_id,
                        event: str_field(config, "expectedEvent").unwrap_or_default().to_owned(),
                        filter,
                    },
                    timeout: u64_field(config, "timeoutMs").map(Duration::from_millis),
                })
            }
            "trigger.webhook" => Self::Webhook(WebhookTrigger {
                method: str_field(config, "method").unwrap_or("POST").to_ascii_uppercase(),
                require_auth: bool_field(config, "requireAuth").unwrap_or(false),
                secret: str_field(config, "secret").map(str::to_owned),
            }),
            other => Self::Unknown(other.to_owned()),
        }
    }

    pub fn trigger_type(&self) -> Option<TriggerType> {
        match self {
            Self::Manual => Some(TriggerType::Manual),
            Self::Schedule { .. } => Some(TriggerType::Schedule),
            Self::Event(_) => Some(TriggerType::Event),
            Self::Webhook(_) => Some(TriggerType::Webhook),
            Self::Unknown(_) => None,
        }
    }
}

/// Derive the denormalised trigger columns from a definition.
///
/// Webhook workflows keep `existing_token` when they already have one so
/// published URLs survive definition edits.
pub fn derive_trigger_fields(definition: &WorkflowDefinition, existing_token: Option<&str>) -> TriggerFields {
    let Some(spec) = definition.trigger() else {
        return TriggerFields::default();
    };

    let cron_expression = match &spec {
        TriggerSpec::Schedule { cron_expression } => cron_expression.clone(),
        _ => None,
    };
    let webhook_token = match &spec {
        TriggerSpec::Webhook(_) => Some(
            existing_token
                .map(str::to_owned)
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
        ),
        _ => None,
    };

    TriggerFields {
        trigger_type: spec.trigger_type(),
        cron_expression,
        webhook_token,
    }
}

/// Who started an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Schedule,
    Event,
    Webhook,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Schedule => "schedule",
            Self::Event => "event",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Portable form of a workflow used by export/import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExport {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub definition: WorkflowDefinition,
}

/// Payload shape shared by event-triggered executions.
pub fn event_trigger_data(source_id: &str, event_type: &str, payload: Value) -> Value {
    let mut data = Map::new();
    data.insert("event".into(), payload);
    data.insert("source".into(), Value::String(source_id.to_owned()));
    data.insert("eventType".into(), Value::String(event_type.to_owned()));
    Value::Object(data)
}
