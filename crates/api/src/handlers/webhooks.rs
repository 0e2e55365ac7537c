use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    Json,
};
use engine::{WebhookRequest, SECRET_HEADER};
use serde_json::{json, Map, Value};

use crate::error::webhook_status;
use crate::AppState;

/// JSON bodies are passed through as JSON; anything else as text.
fn body_value(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn header_map(headers: &HeaderMap) -> Map<String, Value> {
    headers
        .iter()
        .filter(|(name, _)| name.as_str() != SECRET_HEADER)
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), Value::String(v.to_owned())))
        })
        .collect()
}

pub async fn handle(
    Path(token): Path<String>,
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let request = WebhookRequest {
        method: method.as_str().to_owned(),
        secret: headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        body: body_value(&body),
        headers: header_map(&headers),
        query: query.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
    };

    let execution_id = state
        .engine
        .handle_webhook(&token, request)
        .await
        .map_err(webhook_status)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "webhook accepted", "executionId": execution_id })),
    ))
}
