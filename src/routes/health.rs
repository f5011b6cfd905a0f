use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(root)).route("/health", get(health))
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    store: &'static str,
    database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    llm_model: Option<String>,
}

async fn root() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "ok", version: VERSION })
}

async fn health(State(state): State<AppState>) -> Response {
    let connected = match state.store().ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "store ping failed");
            false
        }
    };

    let response = HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        version: VERSION,
        store: state.store().backend_name(),
        database: if connected { "connected" } else { "disconnected" },
        llm_model: state.llm_model().map(str::to_string),
    };

    let status_code = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response)).into_response()
}
