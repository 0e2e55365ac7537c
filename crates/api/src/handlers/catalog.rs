use axum::{extract::State, Json};
use nodes::Catalog;

use crate::AppState;

pub async fn catalog(State(state): State<AppState>) -> Json<Catalog> {
    Json(state.engine.registry().catalog())
}
