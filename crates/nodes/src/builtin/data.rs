//! Data nodes: variables, reshaping, filtering and outbound HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::condition::compare;
use crate::config::{bool_field, object_field, required_str, str_field, u64_field};
use crate::expression::lookup_path;
use crate::{ExecutableNode, ExecutionContext, NodeError, NodeOutput};

use super::logic::operator;

pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// Stores an evaluated value under `variableName`; passes its input through.
pub struct SetVariableNode;

#[async_trait]
impl ExecutableNode for SetVariableNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let name = required_str(config, "variableName")?.to_owned();
        let value = match config.get("valueExpression") {
            Some(expr) => ctx.evaluate_value(expr, &input)?,
            None => return Err(NodeError::missing("valueExpression")),
        };
        debug!(variable = %name, "setting variable");
        ctx.variables.insert(name, value);
        Ok(NodeOutput::new(input))
    }
}

/// Builds a new object key-by-key from a map of expressions.
pub struct TransformNode;

#[async_trait]
impl ExecutableNode for TransformNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let mapping = object_field(config, "mapping")?.ok_or_else(|| NodeError::missing("mapping"))?;

        let mut output = Map::with_capacity(mapping.len());
        for (key, expr) in &mapping {
            output.insert(key.clone(), ctx.evaluate_value(expr, &input)?);
        }
        Ok(NodeOutput::new(Value::Object(output)))
    }
}

/// Keeps the array items whose `field` satisfies `operator value`.
pub struct FilterNode;

#[async_trait]
impl ExecutableNode for FilterNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let items = match str_field(config, "itemsExpression") {
            Some(expr) => ctx.evaluate(expr, &input)?,
            None if input.is_array() => input.clone(),
            None => ctx.evaluate("$input.items", &input)?,
        };
        let items = match items {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(NodeError::invalid(
                    "itemsExpression",
                    format!("expected an array, got {other}"),
                ))
            }
        };

        let op = operator(config)?;
        let expected = match config.get("value") {
            Some(v) => ctx.evaluate_value(v, &input)?,
            None => Value::Null,
        };
        let field = str_field(config, "field").unwrap_or("");

        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| {
                let subject = lookup_path(item, field).unwrap_or(&Value::Null);
                compare(subject, op, &expected)
            })
            .collect();

        Ok(NodeOutput::new(json!({ "count": kept.len(), "items": kept })))
    }
}

/// Performs an HTTP request and returns `{status, ok, headers, body}`.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableNode for HttpRequestNode {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        let url = match ctx.evaluate(required_str(config, "url")?, &input)? {
            Value::String(url) => url,
            other => return Err(NodeError::invalid("url", format!("expected a string, got {other}"))),
        };
        let method = str_field(config, "method")
            .unwrap_or("GET")
            .to_ascii_uppercase()
            .parse::<reqwest::Method>()
            .map_err(|e| NodeError::invalid("method", e.to_string()))?;
        let timeout = Duration::from_millis(u64_field(config, "timeoutMs").unwrap_or(DEFAULT_HTTP_TIMEOUT_MS));
        let fail_on_error = bool_field(config, "failOnError").unwrap_or(true);

        let mut request = self.client.request(method.clone(), &url).timeout(timeout);

        if let Some(headers) = object_field(config, "headers")? {
            for (name, value) in &headers {
                let value = ctx.evaluate_value(value, &input)?;
                request = request.header(name.as_str(), crate::condition::as_text(&value));
            }
        }

        match config.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(expr)) => {
                request = match ctx.evaluate(expr, &input)? {
                    Value::String(text) => request.body(text),
                    other => request.json(&other),
                };
            }
            Some(other) => request = request.json(other),
        }

        debug!(%method, %url, "sending http request");
        let response = request
            .send()
            .await
            .map_err(|e| NodeError::Http(e.to_string()))?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), Value::String(v.to_owned()))))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::Http(e.to_string()))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if fail_on_error && !status.is_success() {
            return Err(NodeError::Http(format!("{method} {url} returned {status}")));
        }

        Ok(NodeOutput::new(json!({
            "status": status.as_u16(),
            "ok": status.is_success(),
            "headers": headers,
            "body": body,
        })))
    }
}
