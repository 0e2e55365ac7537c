//! Mapping of engine errors onto HTTP status codes.

use axum::http::StatusCode;
use db::DbError;
use engine::{EngineError, WebhookError};
use tracing::{error, warn};

pub(crate) fn engine_status(err: EngineError) -> StatusCode {
    let status = match &err {
        EngineError::Database(DbError::NotFound) => StatusCode::NOT_FOUND,
        EngineError::ExecutionNotLive(_) => StatusCode::CONFLICT,
        e if e.is_definition_error() => StatusCode::BAD_REQUEST,
        EngineError::UnknownNodeType { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "request failed");
    } else {
        warn!(error = %err, %status, "request rejected");
    }
    status
}

pub(crate) fn db_status(err: DbError) -> StatusCode {
    engine_status(EngineError::Database(err))
}

pub(crate) fn webhook_status(err: WebhookError) -> StatusCode {
    match err {
        WebhookError::NotFound => StatusCode::NOT_FOUND,
        WebhookError::Inactive => StatusCode::CONFLICT,
        WebhookError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        WebhookError::Unauthorized => StatusCode::UNAUTHORIZED,
        WebhookError::Engine(e) => engine_status(e),
    }
}
