use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::condition::as_text;
use crate::config::{f64_field, str_field, u64_field};
use crate::{ExecutableNode, ExecutionContext, LogLevel, NodeError, NodeOutput, StopOutcome};

/// Sleeps for `durationMs` (or `duration` seconds), then passes its input on.
pub struct DelayNode;

#[async_trait]
impl ExecutableNode for DelayNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        _ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let delay = match (u64_field(config, "durationMs"), f64_field(config, "duration")) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, Some(secs)) => Duration::try_from_secs_f64(secs)
                .map_err(|e| NodeError::invalid("duration", e.to_string()))?,
            _ => return Err(NodeError::missing("durationMs")),
        };
        tokio::time::sleep(delay).await;
        Ok(NodeOutput::new(input))
    }
}

/// Records a message on the execution log at the configured level.
pub struct LogNode;

#[async_trait]
impl ExecutableNode for LogNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let message = match config.get("message") {
            Some(expr) => as_text(&ctx.evaluate_value(expr, &input)?),
            None => as_text(&input),
        };
        let level = match str_field(config, "level") {
            Some(level) => level
                .parse::<LogLevel>()
                .map_err(|e| NodeError::invalid("level", e))?,
            None => LogLevel::Info,
        };

        let execution_id = ctx.execution_id;
        match level {
            LogLevel::Debug => debug!(%execution_id, "{message}"),
            LogLevel::Info => info!(%execution_id, "{message}"),
            LogLevel::Warn => warn!(%execution_id, "{message}"),
            LogLevel::Error => error!(%execution_id, "{message}"),
        }

        Ok(NodeOutput::new(input).with_log(level, message))
    }
}

/// Ends the execution with a caller-chosen outcome.
pub struct StopNode;

#[async_trait]
impl ExecutableNode for StopNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        _ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let message = str_field(config, "message").map(str::to_owned);
        let outcome = match str_field(config, "status").unwrap_or("success") {
            "success" | "completed" => StopOutcome::Completed { message },
            "failure" | "failed" => StopOutcome::Failed { message },
            other => return Err(NodeError::invalid("status", format!("unknown stop status '{other}'"))),
        };
        let level = match outcome {
            StopOutcome::Completed { .. } => LogLevel::Info,
            StopOutcome::Failed { .. } => LogLevel::Warn,
        };
        Ok(NodeOutput::stopping(input, outcome).with_log(level, "Execution stopped"))
    }
}
