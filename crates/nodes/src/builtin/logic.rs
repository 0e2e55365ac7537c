//! Control-flow nodes. `logic.if` and `logic.switch` select an output
//! handle; the engine only follows edges whose `sourceHandle` matches.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::condition::{compare, loose_eq, Operator};
use crate::config::{object_field, str_field, string_list, u64_field};
use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutput};

pub const DEFAULT_MAX_ITERATIONS: u64 = 1000;

pub(crate) fn operator(config: &Value) -> Result<Operator, NodeError> {
    str_field(config, "operator")
        .unwrap_or("eq")
        .parse()
        .map_err(|e: String| NodeError::invalid("operator", e))
}

fn evaluate_field(config: &Value, key: &'static str, input: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
    match config.get(key) {
        Some(expr) => Ok(ctx.evaluate_value(expr, input)?),
        None => Ok(Value::Null),
    }
}

pub struct IfNode;

#[async_trait]
impl ExecutableNode for IfNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        if config.get("field").is_none() {
            return Err(NodeError::missing("field"));
        }
        let left = evaluate_field(config, "field", &input, ctx)?;
        let right = evaluate_field(config, "value", &input, ctx)?;
        let op = operator(config)?;

        let handle = if compare(&left, op, &right) { "true" } else { "false" };
        Ok(NodeOutput::branch(handle, input))
    }
}

pub struct SwitchNode;

impl SwitchNode {
    /// `(case value, handle)` pairs in declaration order.
    fn cases(config: &Value) -> Result<Vec<(Value, String)>, NodeError> {
        match config.get("cases") {
            Some(Value::Array(items)) => Ok(items
                .iter()
                .map(|case| {
                    let value = case.get("value").cloned().unwrap_or(Value::Null);
                    let handle = case
                        .get("handle")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                        .unwrap_or_else(|| crate::condition::as_text(&value));
                    (value, handle)
                })
                .collect()),
            Some(_) => Ok(object_field(config, "cases")?
                .unwrap_or_default()
                .into_iter()
                .map(|(value, handle)| {
                    let handle = handle.as_str().map(str::to_owned).unwrap_or_else(|| value.clone());
                    (Value::String(value), handle)
                })
                .collect()),
            None => Err(NodeError::missing("cases")),
        }
    }
}

#[async_trait]
impl ExecutableNode for SwitchNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        if config.get("field").is_none() {
            return Err(NodeError::missing("field"));
        }
        let subject = evaluate_field(config, "field", &input, ctx)?;

        let handle = Self::cases(config)?
            .into_iter()
            .find(|(value, _)| loose_eq(&subject, value))
            .map(|(_, handle)| handle)
            .unwrap_or_else(|| "default".to_owned());

        Ok(NodeOutput::branch(handle, input))
    }
}

/// Expands a collection (or a count) into indexed items for downstream nodes.
pub struct LoopNode;

#[async_trait]
impl ExecutableNode for LoopNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let max = u64_field(config, "maxIterations").unwrap_or(DEFAULT_MAX_ITERATIONS) as usize;

        let items: Vec<Value> = match u64_field(config, "count") {
            Some(count) if count > max as u64 => {
                return Err(NodeError::Failed(format!(
                    "loop over {count} items exceeds maxIterations ({max})"
                )));
            }
            Some(count) => (0..count).map(Value::from).collect(),
            None => {
                let expr = str_field(config, "itemsExpression").unwrap_or("$input.items");
                match ctx.evaluate(expr, &input)? {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => {
                        return Err(NodeError::invalid(
                            "itemsExpression",
                            format!("expected an array, got {other}"),
                        ))
                    }
                }
            }
        };

        if items.len() > max {
            return Err(NodeError::Failed(format!(
                "loop over {} items exceeds maxIterations ({max})",
                items.len()
            )));
        }

        let indexed: Vec<Value> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| json!({ "item": item, "index": index }))
            .collect();

        Ok(NodeOutput::new(json!({ "count": indexed.len(), "items": indexed })))
    }
}

/// Combines the outputs of earlier nodes with the current input.
pub struct MergeNode;

#[async_trait]
impl ExecutableNode for MergeNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let node_ids = string_list(config, "nodeIds");
        if node_ids.is_empty() {
            return Ok(NodeOutput::new(input));
        }

        let sources: Vec<Value> = node_ids
            .iter()
            .map(|id| ctx.node_outputs.get(id).cloned().unwrap_or(Value::Null))
            .collect();

        match str_field(config, "mode").unwrap_or("merge") {
            "append" => {
                let mut items = sources;
                items.push(input);
                Ok(NodeOutput::new(Value::Array(items)))
            }
            "merge" => {
                let mut merged = Map::new();
                for source in sources.into_iter().chain(std::iter::once(input)) {
                    if let Value::Object(map) = source {
                        merged.extend(map);
                    }
                }
                Ok(NodeOutput::new(Value::Object(merged)))
            }
            other => Err(NodeError::invalid("mode", format!("unknown merge mode '{other}'"))),
        }
    }
}
