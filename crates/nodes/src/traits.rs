//! The `ExecutableNode` trait: the contract every node must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::expression::{self, Scope};
use crate::{ExpressionError, NodeError};

/// Per-execution state shared by every node invocation of one run.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency. The engine
/// owns exactly one of these per live execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// Owner of the workflow; notifications are addressed to this user.
    pub user_id: Uuid,
    /// Payload the trigger fired with.
    pub trigger_data: Value,
    /// Values written by `data.setVariable`, readable as `$var.<name>`.
    pub variables: Map<String, Value>,
    /// Output of every node that has completed, readable as `$node.<id>.<path>`.
    pub node_outputs: Map<String, Value>,
    /// Node currently being executed.
    pub current_node_id: Option<String>,
}

impl ExecutionContext {
    pub fn new(workflow_id: Uuid, execution_id: Uuid, user_id: Uuid, trigger_data: Value) -> Self {
        Self {
            workflow_id,
            execution_id,
            user_id,
            trigger_data,
            variables: Map::new(),
            node_outputs: Map::new(),
            current_node_id: None,
        }
    }

    pub fn scope(&self) -> Scope<'_> {
        Scope {
            variables: &self.variables,
            node_outputs: &self.node_outputs,
        }
    }

    /// Evaluate an expression against `input` and this context.
    pub fn evaluate(&self, expr: &str, input: &Value) -> Result<Value, ExpressionError> {
        expression::evaluate(expr, input, &self.scope())
    }

    /// Like [`evaluate`](Self::evaluate) but accepts any JSON config value.
    pub fn evaluate_value(&self, value: &Value, input: &Value) -> Result<Value, ExpressionError> {
        expression::evaluate_value(value, input, &self.scope())
    }
}

/// Severity attached to a node's log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Terminal outcome chosen by a `utility.stop` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Completed { message: Option<String> },
    Failed { message: Option<String> },
}

/// What a node hands back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    /// Payload stored under `node_outputs[node_id]` and passed downstream.
    pub data: Value,
    /// Output handle selected by a branching node; `None` means the default handle.
    pub handle: Option<String>,
    /// Set by stop nodes; ends traversal with the given outcome.
    pub stop: Option<StopOutcome>,
    /// Level and message recorded on the node's log row.
    pub log: Option<(LogLevel, String)>,
}

impl NodeOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            handle: None,
            stop: None,
            log: None,
        }
    }

    pub fn branch(handle: impl Into<String>, data: Value) -> Self {
        Self {
            handle: Some(handle.into()),
            ..Self::new(data)
        }
    }

    pub fn stopping(data: Value, outcome: StopOutcome) -> Self {
        Self {
            stop: Some(outcome),
            ..Self::new(data)
        }
    }

    pub fn with_log(mut self, level: LogLevel, message: impl Into<String>) -> Self {
        self.log = Some((level, message.into()));
        self
    }

    /// Interpret a raw JSON result. Executors that speak the
    /// `{ "__branch": <handle>, "data": <payload> }` convention get their
    /// handle extracted; anything else is plain data.
    pub fn from_json(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if let Some(Value::String(handle)) = map.get("__branch") {
                let data = map.get("data").cloned().unwrap_or(Value::Null);
                return Self::branch(handle.clone(), data);
            }
        }
        Self::new(value)
    }
}

/// The core node trait.
///
/// Built-in nodes and externally registered action executors (bot actions
/// and the like) all implement this.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node with its `config`, the `input` produced by the
    /// upstream edge, and the execution's shared context.
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError>;
}
