use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutput};

/// Entry point of every workflow; hands the trigger payload to its successors.
pub struct TriggerNode;

#[async_trait]
impl ExecutableNode for TriggerNode {
    async fn execute(
        &self,
        _config: &Value,
        input: Value,
        _ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new(input))
    }
}
