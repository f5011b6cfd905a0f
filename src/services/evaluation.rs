use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::operations::lessons::{ExerciseRecord, NewAttempt};
use crate::db::{Store, StoreError};
use crate::schema::EvaluationVerdict;
use crate::services::gateway::{GatewayError, LlmGateway, StructuredPrompt};

pub const FALLBACK_FEEDBACK: &str = "Evaluation failed";

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 512;

const SYSTEM_PROMPT: &str = "\
You grade answers to language-learning exercises. Reply with ONE JSON object:
{\"is_correct\": true or false, \"score\": number from 0.0 to 1.0, \"feedback\": \"short explanation\"}
Be encouraging and give partial credit for near misses.
Ignore differences in case and punctuation. Accept equivalent answers such as synonyms or other valid conjugations.
No markdown. No code fences.";

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("exercise {0} not found")]
    ExerciseNotFound(Uuid),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationOutcome {
    pub is_correct: bool,
    pub score: f64,
    pub feedback: String,
    pub correct_answer: String,
}

impl EvaluationOutcome {
    pub fn fallback(correct_answer: impl Into<String>) -> Self {
        Self {
            is_correct: false,
            score: 0.0,
            feedback: FALLBACK_FEEDBACK.to_string(),
            correct_answer: correct_answer.into(),
        }
    }
}

#[derive(Clone)]
pub struct EvaluationEngine {
    gateway: LlmGateway,
    store: Arc<dyn Store>,
}

impl EvaluationEngine {
    pub fn new(gateway: LlmGateway, store: Arc<dyn Store>) -> Self {
        Self { gateway, store }
    }

    pub async fn load_exercise(&self, exercise_id: Uuid) -> Result<ExerciseRecord, EvaluationError> {
        self.store
            .get_exercise(exercise_id)
            .await?
            .ok_or(EvaluationError::ExerciseNotFound(exercise_id))
    }

    /// Scores one answer. Errors are returned as-is; substituting
    /// [`EvaluationOutcome::fallback`] is the caller's decision.
    pub async fn evaluate(&self, exercise: &ExerciseRecord, user_answer: &str) -> Result<EvaluationOutcome, EvaluationError> {
        let user_answer = user_answer.trim();
        if user_answer.is_empty() {
            return Err(EvaluationError::InvalidInput("user_answer must not be empty".into()));
        }

        let prompt = StructuredPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user: build_user_prompt(exercise, user_answer),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let EvaluationVerdict { is_correct, score, feedback } = self.gateway.complete_structured(&prompt).await?;

        Ok(EvaluationOutcome {
            is_correct,
            score,
            feedback,
            correct_answer: exercise.correct_answer.clone(),
        })
    }

    /// Records a scored attempt. Attempts are append-only.
    pub async fn record_attempt(
        &self,
        exercise: &ExerciseRecord,
        user_id: Uuid,
        user_answer: &str,
        outcome: &EvaluationOutcome,
    ) -> Result<Uuid, StoreError> {
        self.store.ensure_user(user_id).await?;
        self.store
            .insert_attempt(&NewAttempt {
                exercise_id: exercise.id,
                user_id,
                user_answer: user_answer.trim().to_string(),
                is_correct: outcome.is_correct,
                score: outcome.score,
                feedback: outcome.feedback.clone(),
            })
            .await
    }
}

fn build_user_prompt(exercise: &ExerciseRecord, user_answer: &str) -> String {
    format!(
        "Correct answer: {}\nLearner's answer: {}\nExercise type: {}\nQuestion: {}\nHint: {}",
        exercise.correct_answer,
        user_answer,
        exercise.kind,
        exercise.question,
        exercise.hint.as_deref().unwrap_or("none"),
    )
}
