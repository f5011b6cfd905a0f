use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{json_rejection, parse_id, query_rejection};
use crate::response::AppError;
use crate::schema::{Difficulty, ExerciseKind, Language, Worksheet};
use crate::services::evaluation::{EvaluationError, EvaluationOutcome};
use crate::services::worksheet::{GeneratedLesson, WorksheetRequest};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(generate))
        .route("/preview", post(preview))
        .route("/evaluate", post(evaluate))
        .route("/:id", get(lesson_detail))
}

#[derive(Debug, Deserialize)]
struct WorksheetBody {
    scenario: String,
    target_language: String,
    difficulty: Option<String>,
    grammar_focus: Option<String>,
    user_id: Option<Uuid>,
}

impl WorksheetBody {
    fn to_request(&self) -> Result<WorksheetRequest, AppError> {
        Ok(WorksheetRequest::new(
            &self.scenario,
            &self.target_language,
            self.difficulty.as_deref(),
            self.grammar_focus.as_deref(),
        )?)
    }
}

#[derive(Serialize)]
struct PreviewResponse {
    worksheet: Worksheet,
}

#[derive(Debug, Deserialize)]
struct EvaluateBody {
    exercise_id: Uuid,
    user_answer: String,
}

#[derive(Debug, Deserialize)]
struct EvaluateQuery {
    user_id: Option<Uuid>,
}

#[derive(Serialize)]
struct ExerciseView {
    id: Uuid,
    #[serde(rename = "type")]
    kind: ExerciseKind,
    question: String,
    hint: Option<String>,
    order_index: i32,
}

#[derive(Serialize)]
struct LessonDetailResponse {
    id: Uuid,
    user_id: Uuid,
    target_language: Language,
    scenario: String,
    grammar_focus: Option<String>,
    difficulty: Difficulty,
    version: i32,
    created_at: DateTime<Utc>,
    worksheet: Worksheet,
    exercises: Vec<ExerciseView>,
}

async fn generate(
    State(state): State<AppState>,
    body: Result<Json<WorksheetBody>, JsonRejection>,
) -> Result<Json<GeneratedLesson>, AppError> {
    let Json(body) = body.map_err(json_rejection)?;
    let request = body.to_request()?;
    let user_id = body.user_id.unwrap_or_else(Uuid::new_v4);

    let lesson = state.worksheets().generate_and_persist(&request, user_id).await?;
    Ok(Json(lesson))
}

async fn preview(
    State(state): State<AppState>,
    body: Result<Json<WorksheetBody>, JsonRejection>,
) -> Result<Json<PreviewResponse>, AppError> {
    let Json(body) = body.map_err(json_rejection)?;
    let request = body.to_request()?;

    let worksheet = state.worksheets().preview(&request).await?;
    Ok(Json(PreviewResponse { worksheet }))
}

/// Model failures degrade to the fallback result instead of an error status.
async fn evaluate(
    State(state): State<AppState>,
    query: Result<Query<EvaluateQuery>, QueryRejection>,
    body: Result<Json<EvaluateBody>, JsonRejection>,
) -> Result<Json<EvaluationOutcome>, AppError> {
    let Query(query) = query.map_err(query_rejection)?;
    let Json(body) = body.map_err(json_rejection)?;
    if body.user_answer.trim().is_empty() {
        return Err(AppError::validation("user_answer must not be empty"));
    }

    let engine = state.evaluations();
    let exercise = engine.load_exercise(body.exercise_id).await?;

    let outcome = match engine.evaluate(&exercise, &body.user_answer).await {
        Ok(outcome) => outcome,
        Err(EvaluationError::Gateway(err)) => {
            tracing::warn!(exercise_id = %exercise.id, error = %err, "evaluation degraded to fallback");
            return Ok(Json(EvaluationOutcome::fallback(exercise.correct_answer)));
        }
        Err(err) => return Err(err.into()),
    };

    let user_id = query.user_id.unwrap_or_else(Uuid::new_v4);
    if let Err(err) = engine.record_attempt(&exercise, user_id, &body.user_answer, &outcome).await {
        tracing::warn!(exercise_id = %exercise.id, error = %err, "attempt not recorded");
    }

    Ok(Json(outcome))
}

async fn lesson_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LessonDetailResponse>, AppError> {
    let lesson_id = parse_id(&id, "lesson")?;
    let lesson = state
        .store()
        .get_lesson(lesson_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("lesson {lesson_id} not found")))?;

    let exercises = lesson
        .exercises
        .into_iter()
        .map(|e| ExerciseView {
            id: e.id,
            kind: e.kind,
            question: e.question,
            hint: e.hint,
            order_index: e.order_index,
        })
        .collect();

    Ok(Json(LessonDetailResponse {
        id: lesson.id,
        user_id: lesson.user_id,
        target_language: lesson.target_language,
        scenario: lesson.scenario,
        grammar_focus: lesson.grammar_focus,
        difficulty: lesson.difficulty,
        version: lesson.version,
        created_at: lesson.created_at,
        worksheet: lesson.worksheet,
        exercises,
    }))
}
