mod conversations;
mod health;
mod lessons;
pub mod realtime;
mod worksheets;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use uuid::Uuid;

use crate::response::{json_error, AppError};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api/worksheets", worksheets::router())
        .nest("/api/conversations", conversations::router())
        .nest("/api/lessons", lessons::router())
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found").into_response()
}

pub(crate) fn parse_id(raw: &str, entity: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::validation(format!("invalid {entity} id `{raw}`")))
}

pub(crate) fn json_rejection(rejection: JsonRejection) -> AppError {
    AppError::validation(rejection.body_text())
}

pub(crate) fn query_rejection(rejection: QueryRejection) -> AppError {
    AppError::validation(rejection.body_text())
}
