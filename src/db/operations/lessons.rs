use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::pagination::{Page, PageRequest};
use crate::db::StoreError;
use crate::schema::{Difficulty, ExerciseKind, Language, Worksheet};

#[derive(Debug, Clone)]
pub struct NewLesson {
    pub user_id: Uuid,
    pub target_language: Language,
    pub scenario: String,
    pub grammar_focus: Option<String>,
    pub difficulty: Difficulty,
    pub worksheet: Worksheet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedLesson {
    pub lesson_id: Uuid,
    /// Positionally aligned with the worksheet's exercises.
    pub exercise_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExerciseRecord {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub kind: ExerciseKind,
    pub question: String,
    pub correct_answer: String,
    pub hint: Option<String>,
    pub order_index: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target_language: Language,
    pub scenario: String,
    pub grammar_focus: Option<String>,
    pub difficulty: Difficulty,
    pub worksheet: Worksheet,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub exercises: Vec<ExerciseRecord>,
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub exercise_id: Uuid,
    pub user_id: Uuid,
    pub user_answer: String,
    pub is_correct: bool,
    pub score: f64,
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonSummary {
    pub id: Uuid,
    pub scenario: String,
    pub target_language: Language,
    pub difficulty: Difficulty,
    pub exercise_count: i64,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_lesson(pool: &PgPool, lesson: &NewLesson) -> Result<PersistedLesson, StoreError> {
    let lesson_id = Uuid::new_v4();
    let worksheet_json = serde_json::to_value(&lesson.worksheet)?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO "lessons" ("id", "user_id", "target_language", "scenario", "grammar_focus", "difficulty", "worksheet_json")
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(lesson_id)
    .bind(lesson.user_id)
    .bind(lesson.target_language.code())
    .bind(&lesson.scenario)
    .bind(lesson.grammar_focus.as_deref())
    .bind(lesson.difficulty.as_str())
    .bind(&worksheet_json)
    .execute(&mut *tx)
    .await?;

    let mut exercise_ids = Vec::with_capacity(lesson.worksheet.exercises.len());
    for (order_index, exercise) in lesson.worksheet.exercises.iter().enumerate() {
        let exercise_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO "exercises" ("id", "lesson_id", "exercise_type", "question", "correct_answer", "hint", "order_index")
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(exercise_id)
        .bind(lesson_id)
        .bind(exercise.kind.as_str())
        .bind(&exercise.question)
        .bind(&exercise.answer)
        .bind(exercise.hint.as_deref())
        .bind(order_index as i32)
        .execute(&mut *tx)
        .await?;
        exercise_ids.push(exercise_id);
    }

    tx.commit().await?;

    Ok(PersistedLesson { lesson_id, exercise_ids })
}

pub async fn get_lesson(pool: &PgPool, lesson_id: Uuid) -> Result<Option<LessonRecord>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT "id", "user_id", "target_language", "scenario", "grammar_focus", "difficulty",
               "worksheet_json", "version", "created_at"
        FROM "lessons"
        WHERE "id" = $1
        "#,
    )
    .bind(lesson_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let exercise_rows = sqlx::query(
        r#"
        SELECT "id", "lesson_id", "exercise_type", "question", "correct_answer", "hint", "order_index"
        FROM "exercises"
        WHERE "lesson_id" = $1
        ORDER BY "order_index" ASC
        "#,
    )
    .bind(lesson_id)
    .fetch_all(pool)
    .await?;

    let exercises = exercise_rows
        .iter()
        .map(map_exercise_row)
        .collect::<Result<Vec<_>, _>>()?;

    let worksheet_json: serde_json::Value = row.try_get("worksheet_json")?;
    let worksheet: Worksheet = serde_json::from_value(worksheet_json)?;

    Ok(Some(LessonRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        target_language: decode_language(&row)?,
        scenario: row.try_get("scenario")?,
        grammar_focus: row.try_get("grammar_focus")?,
        difficulty: decode_difficulty(&row)?,
        worksheet,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        exercises,
    }))
}

pub async fn get_exercise(pool: &PgPool, exercise_id: Uuid) -> Result<Option<ExerciseRecord>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT "id", "lesson_id", "exercise_type", "question", "correct_answer", "hint", "order_index"
        FROM "exercises"
        WHERE "id" = $1
        "#,
    )
    .bind(exercise_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_exercise_row).transpose()
}

pub async fn insert_attempt(pool: &PgPool, attempt: &NewAttempt) -> Result<Uuid, StoreError> {
    let attempt_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO "exercise_attempts" ("id", "exercise_id", "user_id", "user_answer", "is_correct", "llm_feedback", "score")
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(attempt_id)
    .bind(attempt.exercise_id)
    .bind(attempt.user_id)
    .bind(&attempt.user_answer)
    .bind(attempt.is_correct)
    .bind(&attempt.feedback)
    .bind(attempt.score)
    .execute(pool)
    .await?;
    Ok(attempt_id)
}

pub async fn list_lessons(
    pool: &PgPool,
    page: PageRequest,
    user_id: Option<Uuid>,
) -> Result<Page<LessonSummary>, StoreError> {
    let total: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM "lessons" WHERE ($1::uuid IS NULL OR "user_id" = $1)"#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT l."id", l."scenario", l."target_language", l."difficulty", l."created_at",
               (SELECT COUNT(*) FROM "exercises" e WHERE e."lesson_id" = l."id") AS "exercise_count"
        FROM "lessons" l
        WHERE ($1::uuid IS NULL OR l."user_id" = $1)
        ORDER BY l."created_at" DESC, l."id" DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let items = rows
        .iter()
        .map(|row| -> Result<LessonSummary, StoreError> {
            Ok(LessonSummary {
                id: row.try_get("id")?,
                scenario: row.try_get("scenario")?,
                target_language: decode_language(row)?,
                difficulty: decode_difficulty(row)?,
                exercise_count: row.try_get("exercise_count")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page::new(items, total, page))
}

fn map_exercise_row(row: &PgRow) -> Result<ExerciseRecord, StoreError> {
    let kind: String = row.try_get("exercise_type")?;
    Ok(ExerciseRecord {
        id: row.try_get("id")?,
        lesson_id: row.try_get("lesson_id")?,
        kind: ExerciseKind::parse(&kind).ok_or_else(|| StoreError::Decode(format!("exercise_type {kind}")))?,
        question: row.try_get("question")?,
        correct_answer: row.try_get("correct_answer")?,
        hint: row.try_get("hint")?,
        order_index: row.try_get("order_index")?,
    })
}

pub(crate) fn decode_language(row: &PgRow) -> Result<Language, StoreError> {
    let code: String = row.try_get("target_language")?;
    Language::parse(&code).ok_or_else(|| StoreError::Decode(format!("target_language {code}")))
}

fn decode_difficulty(row: &PgRow) -> Result<Difficulty, StoreError> {
    let level: String = row.try_get("difficulty")?;
    Difficulty::parse(&level).ok_or_else(|| StoreError::Decode(format!("difficulty {level}")))
}
