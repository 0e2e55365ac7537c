//! `MockNode`: a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real action executor (a bot
//! action, say) is either unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutput};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value, tagged with the node name.
    ReturnValue(Value),
    /// Select an output handle and pass the input through.
    Branch(String),
    /// Fail with the given message.
    Fail(String),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    fn with(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always routes to `handle`.
    pub fn branching(name: impl Into<String>, handle: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::Branch(handle.into()))
    }

    /// Create a mock that always fails.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::Fail(msg.into()))
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// Inputs received so far.
    pub fn inputs(&self) -> Vec<Value> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(
        &self,
        _config: &Value,
        input: Value,
        _ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(input.clone());
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Merge the node's own fields over a `node` tag so tests can
                // trace the data flowing through the graph.
                let mut out = json!({ "node": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(NodeOutput::new(out))
            }
            MockBehaviour::Branch(handle) => Ok(NodeOutput::branch(handle.clone(), input)),
            MockBehaviour::Fail(msg) => Err(NodeError::Failed(msg.clone())),
        }
    }
}
