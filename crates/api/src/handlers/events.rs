use axum::{extract::State, http::StatusCode, Json};
use engine::EventDispatch;
use serde::Deserialize;
use serde_json::Value;

use crate::error::engine_status;
use crate::AppState;

/// An event reported by an external source, such as a bot.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEventDto {
    pub source_id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

pub async fn ingest(
    State(state): State<AppState>,
    Json(event): Json<ExternalEventDto>,
) -> Result<Json<EventDispatch>, StatusCode> {
    state
        .engine
        .on_external_event(&event.source_id, &event.event_type, event.payload)
        .await
        .map(Json)
        .map_err(engine_status)
}
