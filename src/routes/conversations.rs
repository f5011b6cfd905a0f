use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{json_rejection, parse_id, realtime};
use crate::response::AppError;
use crate::schema::{ConversationTurn, Language};
use crate::services::conversation::{SessionState, TutorReply};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start))
        .route("/:id", get(get_conversation))
        .route("/:id/message", post(send_message))
        .route("/:id/ws", get(realtime::conversation_socket))
}

#[derive(Debug, Deserialize)]
struct StartBody {
    target_language: String,
    scenario_context: Option<String>,
    user_id: Option<Uuid>,
}

#[derive(Serialize)]
struct StartResponse {
    id: Uuid,
    user_id: Uuid,
    target_language: Language,
    scenario_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    text: String,
}

#[derive(Serialize)]
struct ConversationResponse {
    id: Uuid,
    target_language: Language,
    scenario_context: Option<String>,
    created_at: DateTime<Utc>,
    state: SessionState,
    turns: Vec<ConversationTurn>,
}

async fn start(
    State(state): State<AppState>,
    body: Result<Json<StartBody>, JsonRejection>,
) -> Result<Json<StartResponse>, AppError> {
    let Json(body) = body.map_err(json_rejection)?;
    let language = Language::parse(&body.target_language)
        .ok_or_else(|| AppError::validation(format!("unsupported target_language `{}`", body.target_language)))?;
    let user_id = body.user_id.unwrap_or_else(Uuid::new_v4);

    let session = state
        .conversations()
        .start(user_id, language, body.scenario_context.as_deref())
        .await?;

    Ok(Json(StartResponse {
        id: session.id,
        user_id: session.user_id,
        target_language: session.target_language,
        scenario_context: session.scenario_context,
    }))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<MessageBody>, JsonRejection>,
) -> Result<Json<TutorReply>, AppError> {
    let conversation_id = parse_id(&id, "conversation")?;
    let Json(body) = body.map_err(json_rejection)?;

    let reply = state.conversations().submit_detached(conversation_id, body.text).await?;
    Ok(Json(reply))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let conversation_id = parse_id(&id, "conversation")?;
    let manager = state.conversations();
    let session = manager.get(conversation_id).await?;

    Ok(Json(ConversationResponse {
        state: manager.state(session.id),
        id: session.id,
        target_language: session.target_language,
        scenario_context: session.scenario_context,
        created_at: session.created_at,
        turns: session.turns,
    }))
}
