//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the workflow engine (validation, triggers, execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Definition errors ------

    /// The stored definition JSON does not deserialize.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(#[from] serde_json::Error),

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge '{edge_id}' references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        edge_id: String,
        node_id: String,
        side: &'static str,
    },

    #[error("workflow has no trigger node")]
    MissingTriggerNode,

    #[error("workflow has {0} trigger nodes; exactly one is allowed")]
    MultipleTriggerNodes(usize),

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    // ------ Execution errors ------

    #[error("no executor registered for node type '{node_type}' (node '{node_id}')")]
    UnknownNodeType { node_id: String, node_type: String },

    /// A node failed; the whole execution is aborted.
    #[error("node '{node_id}' failed: {source}")]
    NodeFailed {
        node_id: String,
        #[source]
        source: nodes::NodeError,
    },

    /// An edge's data mapping could not be evaluated.
    #[error("data mapping on edge '{edge_id}' failed: {source}")]
    DataMapping {
        edge_id: String,
        #[source]
        source: nodes::ExpressionError,
    },

    #[error("execution {0} is not live")]
    ExecutionNotLive(Uuid),

    #[error(transparent)]
    Wait(#[from] WaitError),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    /// True for errors caused by a bad workflow definition rather than by
    /// infrastructure.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidDefinition(_)
                | Self::DuplicateNodeId(_)
                | Self::UnknownNodeReference { .. }
                | Self::MissingTriggerNode
                | Self::MultipleTriggerNodes(_)
                | Self::CycleDetected
        )
    }
}

/// Why a pending event wait did not produce a payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out after {}s waiting for event", .0.as_secs())]
    Timeout(Duration),

    #[error("wait cancelled")]
    Cancelled,
}

/// Rejections from the webhook entry point.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("no workflow for this webhook token")]
    NotFound,

    #[error("workflow is not active")]
    Inactive,

    #[error("method {got} not allowed; trigger expects {expected}")]
    MethodNotAllowed { expected: String, got: String },

    #[error("webhook secret mismatch")]
    Unauthorized,

    #[error(transparent)]
    Engine(#[from] EngineError),
}
