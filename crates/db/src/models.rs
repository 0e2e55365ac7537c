//! Row structs that map 1-to-1 onto database tables, plus the status enums
//! stored in their text columns.
//!
//! These are *persistence* models; they carry no domain behaviour.
//! Workflow definitions are stored as opaque JSON; the `engine` crate owns
//! their shape.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

/// Implements `Display`/`FromStr` over the lowercase names stored in text columns.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = DbError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DbError::InvalidValue(format!(
                        concat!("unknown ", stringify!($ty), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow. Only `Active` workflows have armed triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

text_enum!(WorkflowStatus {
    Draft => "draft",
    Active => "active",
    Paused => "paused",
    Archived => "archived",
});

/// Status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Waiting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(ExecutionStatus {
    Waiting => "waiting",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// How a workflow is started, derived from its trigger node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Schedule,
    Event,
    Webhook,
}

text_enum!(TriggerType {
    Manual => "manual",
    Schedule => "schedule",
    Event => "event",
    Webhook => "webhook",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

text_enum!(LogLevel {
    Debug => "debug",
    Info => "info",
    Warn => "warn",
    Error => "error",
});

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Full JSON definition (nodes, edges, viewport).
    pub definition: serde_json::Value,
    pub status: String,
    pub trigger_type: Option<String>,
    pub cron_expression: Option<String>,
    pub webhook_token: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    pub fn status(&self) -> Result<WorkflowStatus, DbError> {
        self.status.parse()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status(), Ok(WorkflowStatus::Active))
    }
}

/// Input for inserting a workflow.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub definition: serde_json::Value,
    pub status: WorkflowStatus,
    pub trigger: TriggerFields,
}

/// Columns derived from a definition's trigger node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerFields {
    pub trigger_type: Option<TriggerType>,
    pub cron_expression: Option<String>,
    pub webhook_token: Option<String>,
}

/// Partial update of a workflow's user-editable columns.
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub definition: Option<serde_json::Value>,
    pub status: Option<WorkflowStatus>,
    /// When set, all three trigger columns are overwritten (including with NULL).
    pub trigger: Option<TriggerFields>,
}

/// Runtime bookkeeping written by the engine.
#[derive(Debug, Clone, Default)]
pub struct RuntimeUpdate {
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub clear_next_run_at: bool,
    pub increment_runs: bool,
    pub increment_successes: bool,
    pub increment_failures: bool,
}

impl RuntimeUpdate {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            last_run_at: Some(at),
            increment_runs: true,
            ..Self::default()
        }
    }

    pub fn succeeded() -> Self {
        Self {
            increment_successes: true,
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            increment_failures: true,
            ..Self::default()
        }
    }

    pub fn next_run(at: DateTime<Utc>) -> Self {
        Self {
            next_run_at: Some(at),
            ..Self::default()
        }
    }

    pub fn unscheduled() -> Self {
        Self {
            clear_next_run_at: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// executions
// ---------------------------------------------------------------------------

/// A persisted workflow execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    pub triggered_by: String,
    pub trigger_data: serde_json::Value,
    pub current_node_id: Option<String>,
    pub variables: serde_json::Value,
    pub node_outputs: serde_json::Value,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRow {
    pub fn status(&self) -> Result<ExecutionStatus, DbError> {
        self.status.parse()
    }
}

#[derive(Debug, Clone)]
pub struct NewExecution {
    pub workflow_id: Uuid,
    pub triggered_by: String,
    pub trigger_data: serde_json::Value,
    pub status: ExecutionStatus,
}

/// Partial update of an execution; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    pub status: Option<ExecutionStatus>,
    pub trigger_data: Option<serde_json::Value>,
    pub current_node_id: Option<String>,
    pub variables: Option<serde_json::Value>,
    pub node_outputs: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// execution_logs
// ---------------------------------------------------------------------------

/// One append-only record per node invocation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionLogRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub level: String,
    pub message: String,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub execution_id: Uuid,
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub level: LogLevel,
    pub message: String,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub duration_ms: i64,
}
