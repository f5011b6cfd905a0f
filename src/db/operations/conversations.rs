use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::lessons::decode_language;
use crate::db::pagination::{Page, PageRequest};
use crate::db::StoreError;
use crate::schema::{ConversationSession, ConversationTurn, Language, Role};

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub user_id: Uuid,
    pub target_language: Language,
    pub scenario_context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub target_language: Language,
    pub scenario_context: Option<String>,
    pub turn_count: i64,
    pub created_at: DateTime<Utc>,
}

pub async fn create_conversation(
    pool: &PgPool,
    conversation: &NewConversation,
) -> Result<ConversationSession, StoreError> {
    let id = Uuid::new_v4();
    let created_at: DateTime<Utc> = sqlx::query_scalar(
        r#"
        INSERT INTO "conversations" ("id", "user_id", "target_language", "scenario_context")
        VALUES ($1, $2, $3, $4)
        RETURNING "created_at"
        "#,
    )
    .bind(id)
    .bind(conversation.user_id)
    .bind(conversation.target_language.code())
    .bind(conversation.scenario_context.as_deref())
    .fetch_one(pool)
    .await?;

    Ok(ConversationSession {
        id,
        user_id: conversation.user_id,
        target_language: conversation.target_language,
        scenario_context: conversation.scenario_context.clone(),
        created_at,
        turns: Vec::new(),
    })
}

pub async fn get_conversation(
    pool: &PgPool,
    conversation_id: Uuid,
) -> Result<Option<ConversationSession>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT "id", "user_id", "target_language", "scenario_context", "created_at"
        FROM "conversations"
        WHERE "id" = $1
        "#,
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let turn_rows = sqlx::query(
        r#"
        SELECT "role", "text", "corrected_text", "turn_index"
        FROM "conversation_turns"
        WHERE "conversation_id" = $1
        ORDER BY "turn_index" ASC
        "#,
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;

    let turns = turn_rows
        .iter()
        .map(|r| -> Result<ConversationTurn, StoreError> {
            let role: String = r.try_get("role")?;
            Ok(ConversationTurn {
                role: Role::parse(&role).ok_or_else(|| StoreError::Decode(format!("role {role}")))?,
                text: r.try_get("text")?,
                corrected_text: r.try_get("corrected_text")?,
                turn_index: r.try_get("turn_index")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(ConversationSession {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        target_language: decode_language(&row)?,
        scenario_context: row.try_get("scenario_context")?,
        created_at: row.try_get("created_at")?,
        turns,
    }))
}

pub async fn append_exchange(
    pool: &PgPool,
    conversation_id: Uuid,
    user_turn: &ConversationTurn,
    assistant_turn: &ConversationTurn,
) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;

    // Row lock serializes appenders that bypass the in-process session lock.
    let exists: Option<Uuid> = sqlx::query_scalar(r#"SELECT "id" FROM "conversations" WHERE "id" = $1 FOR UPDATE"#)
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(StoreError::NotFound {
            entity: "conversation",
            id: conversation_id,
        });
    }

    let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "conversation_turns" WHERE "conversation_id" = $1"#)
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await?;
    if i64::from(user_turn.turn_index) != count {
        return Err(StoreError::Conflict(format!(
            "expected turn {count}, got {}",
            user_turn.turn_index
        )));
    }

    for turn in [user_turn, assistant_turn] {
        sqlx::query(
            r#"
            INSERT INTO "conversation_turns" ("id", "conversation_id", "role", "text", "corrected_text", "turn_index")
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(turn.role.as_str())
        .bind(&turn.text)
        .bind(turn.corrected_text.as_deref())
        .bind(turn.turn_index)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if err.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                StoreError::Conflict(format!("turn {} already exists", turn.turn_index))
            } else {
                StoreError::Database(err)
            }
        })?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn list_conversations(
    pool: &PgPool,
    page: PageRequest,
    user_id: Option<Uuid>,
) -> Result<Page<ConversationSummary>, StoreError> {
    let total: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM "conversations" WHERE ($1::uuid IS NULL OR "user_id" = $1)"#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        r#"
        SELECT c."id", c."target_language", c."scenario_context", c."created_at",
               (SELECT COUNT(*) FROM "conversation_turns" t WHERE t."conversation_id" = c."id") AS "turn_count"
        FROM "conversations" c
        WHERE ($1::uuid IS NULL OR c."user_id" = $1)
        ORDER BY c."created_at" DESC, c."id" DESC
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
        .map(|row| -> Result<ConversationSummary, StoreError> {
            Ok(ConversationSummary {
                id: row.try_get("id")?,
                target_language: decode_language(row)?,
                scenario_context: row.try_get("scenario_context")?,
                turn_count: row.try_get("turn_count")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page::new(items, total, page))
}
