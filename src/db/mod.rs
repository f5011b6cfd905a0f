pub mod config;
pub mod memory;
pub mod migrate;
pub mod operations;
pub mod pagination;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::db::config::{DbConfig, DbConfigError};
use crate::db::migrate::MigrationError;
use crate::db::operations::conversations::{ConversationSummary, NewConversation};
use crate::db::operations::lessons::{ExerciseRecord, LessonRecord, LessonSummary, NewAttempt, NewLesson, PersistedLesson};
use crate::db::pagination::{Page, PageRequest};
use crate::schema::{ConversationSession, ConversationTurn};

pub use crate::db::memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("unreadable row: {0}")]
    Decode(String),
}

/// Relational persistence used by the services.
///
/// Every write is a single-row insert except `insert_lesson` and
/// `append_exchange`, which are all-or-nothing.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Creates a guest user row the first time an id is seen.
    async fn ensure_user(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Inserts the lesson and its exercises; `exercise_ids[i]` belongs to
    /// `lesson.worksheet.exercises[i]`.
    async fn insert_lesson(&self, lesson: &NewLesson) -> Result<PersistedLesson, StoreError>;

    async fn get_lesson(&self, lesson_id: Uuid) -> Result<Option<LessonRecord>, StoreError>;

    async fn get_exercise(&self, exercise_id: Uuid) -> Result<Option<ExerciseRecord>, StoreError>;

    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<Uuid, StoreError>;

    async fn list_lessons(&self, page: PageRequest, user_id: Option<Uuid>) -> Result<Page<LessonSummary>, StoreError>;

    async fn create_conversation(&self, conversation: &NewConversation) -> Result<ConversationSession, StoreError>;

    /// Turns come back sorted by `turn_index`.
    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<ConversationSession>, StoreError>;

    /// Appends a user turn and its assistant reply atomically. Fails with
    /// `Conflict` unless `user_turn.turn_index` equals the current turn count.
    async fn append_exchange(
        &self,
        conversation_id: Uuid,
        user_turn: &ConversationTurn,
        assistant_turn: &ConversationTurn,
    ) -> Result<(), StoreError>;

    async fn list_conversations(
        &self,
        page: PageRequest,
        user_id: Option<Uuid>,
    ) -> Result<Page<ConversationSummary>, StoreError>;
}

#[derive(Clone)]
pub struct DatabaseProxy {
    pool: PgPool,
}

impl DatabaseProxy {
    pub async fn from_env() -> Result<Arc<Self>, DbInitError> {
        let config = DbConfig::from_env()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.primary_url)
            .await
            .map_err(DbInitError::Sqlx)?;

        if config.run_migrations {
            migrate::run_migrations(&pool).await?;
        }

        Ok(Arc::new(Self { pool }))
    }
}

#[async_trait]
impl Store for DatabaseProxy {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn ensure_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        operations::users::ensure_user(&self.pool, user_id).await
    }

    async fn insert_lesson(&self, lesson: &NewLesson) -> Result<PersistedLesson, StoreError> {
        operations::lessons::insert_lesson(&self.pool, lesson).await
    }

    async fn get_lesson(&self, lesson_id: Uuid) -> Result<Option<LessonRecord>, StoreError> {
        operations::lessons::get_lesson(&self.pool, lesson_id).await
    }

    async fn get_exercise(&self, exercise_id: Uuid) -> Result<Option<ExerciseRecord>, StoreError> {
        operations::lessons::get_exercise(&self.pool, exercise_id).await
    }

    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<Uuid, StoreError> {
        operations::lessons::insert_attempt(&self.pool, attempt).await
    }

    async fn list_lessons(&self, page: PageRequest, user_id: Option<Uuid>) -> Result<Page<LessonSummary>, StoreError> {
        operations::lessons::list_lessons(&self.pool, page, user_id).await
    }

    async fn create_conversation(&self, conversation: &NewConversation) -> Result<ConversationSession, StoreError> {
        operations::conversations::create_conversation(&self.pool, conversation).await
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<ConversationSession>, StoreError> {
        operations::conversations::get_conversation(&self.pool, conversation_id).await
    }

    async fn append_exchange(
        &self,
        conversation_id: Uuid,
        user_turn: &ConversationTurn,
        assistant_turn: &ConversationTurn,
    ) -> Result<(), StoreError> {
        operations::conversations::append_exchange(&self.pool, conversation_id, user_turn, assistant_turn).await
    }

    async fn list_conversations(
        &self,
        page: PageRequest,
        user_id: Option<Uuid>,
    ) -> Result<Page<ConversationSummary>, StoreError> {
        operations::conversations::list_conversations(&self.pool, page, user_id).await
    }
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Config(#[from] DbConfigError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}
