pub mod config;
pub mod db;
pub mod logging;
pub mod response;
pub mod routes;
pub mod schema;
pub mod services;
pub mod state;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, CorsOrigins};
use crate::db::DbInitError;
use crate::state::AppState;

pub async fn create_app(config: Config) -> Result<axum::Router, DbInitError> {
    let state = AppState::from_env(config).await?;
    Ok(build_router(state))
}

/// Router with the HTTP tracing and CORS layers applied.
pub fn build_router(state: AppState) -> axum::Router {
    let cors = cors_layer(&state.config().cors_origins);
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    match origins {
        CorsOrigins::Any => CorsLayer::permissive(),
        CorsOrigins::List(list) => {
            let origins: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(%origin, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
        }
    }
}
