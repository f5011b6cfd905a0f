use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use super::query_rejection;
use crate::db::operations::conversations::ConversationSummary;
use crate::db::operations::lessons::LessonSummary;
use crate::db::pagination::{Page, PageRequest};
use crate::response::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_lessons))
        .route("/conversations", get(list_conversations))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    user_id: Option<Uuid>,
}

impl ListQuery {
    fn page_request(&self) -> Result<PageRequest, AppError> {
        PageRequest::new(self.page, self.page_size).map_err(AppError::validation)
    }
}

async fn list_lessons(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Page<LessonSummary>>, AppError> {
    let Query(query) = query.map_err(query_rejection)?;
    let page = query.page_request()?;
    Ok(Json(state.store().list_lessons(page, query.user_id).await?))
}

async fn list_conversations(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Page<ConversationSummary>>, AppError> {
    let Query(query) = query.map_err(query_rejection)?;
    let page = query.page_request()?;
    Ok(Json(state.store().list_conversations(page, query.user_id).await?))
}
