//! Worksheet generation: request validation, prompt assembly, and the
//! lesson write that assigns exercise ids.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::operations::lessons::NewLesson;
use crate::db::{Store, StoreError};
use crate::schema::{Difficulty, Language, Worksheet};
use crate::services::gateway::{GatewayError, LlmGateway, StructuredPrompt};

const SCENARIO_MIN_CHARS: usize = 3;
const SCENARIO_MAX_CHARS: usize = 500;
const GRAMMAR_FOCUS_MAX_CHARS: usize = 200;
const TEMPERATURE: f32 = 0.4;
const MAX_TOKENS: u32 = 4096;

const SYSTEM_PROMPT: &str = "\
You design language-learning worksheets. Reply with ONE JSON object and nothing else.

Required keys:
- scenario_summary: string, two or three sentences describing the situation
- vocabulary: array of {\"word\", \"translation\", \"example_sentence\"}, 8 to 12 items
- grammar_focus: string naming the grammar topic practised
- explanations: string, a learner-friendly explanation of that topic (include a conjugation table when it helps)
- exercises: array of {\"type\", \"question\", \"answer\", \"hint\"}, 6 to 10 items
  where type is exactly one of: fill_blank, conjugation, sentence_building, translation
- roleplay_prompts: array of 3 to 5 strings that open a practice conversation

When a grammar focus is requested, every exercise must practise it and the explanation must cover it.
No markdown. No code fences.";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validated generation input.
#[derive(Debug, Clone, PartialEq)]
pub struct WorksheetRequest {
    pub scenario: String,
    pub target_language: Language,
    pub difficulty: Difficulty,
    pub grammar_focus: Option<String>,
}

impl WorksheetRequest {
    pub fn new(
        scenario: &str,
        target_language: &str,
        difficulty: Option<&str>,
        grammar_focus: Option<&str>,
    ) -> Result<Self, GenerationError> {
        let scenario = scenario.trim();
        let chars = scenario.chars().count();
        if !(SCENARIO_MIN_CHARS..=SCENARIO_MAX_CHARS).contains(&chars) {
            return Err(GenerationError::InvalidInput(format!(
                "scenario must be between {SCENARIO_MIN_CHARS} and {SCENARIO_MAX_CHARS} characters"
            )));
        }

        let target_language = Language::parse(target_language).ok_or_else(|| {
            GenerationError::InvalidInput(format!("unsupported target_language `{target_language}`"))
        })?;

        let difficulty = match difficulty.map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => Difficulty::parse(raw)
                .ok_or_else(|| GenerationError::InvalidInput(format!("unsupported difficulty `{raw}`")))?,
            None => Difficulty::default(),
        };

        let grammar_focus = grammar_focus.map(str::trim).filter(|g| !g.is_empty());
        if grammar_focus.is_some_and(|g| g.chars().count() > GRAMMAR_FOCUS_MAX_CHARS) {
            return Err(GenerationError::InvalidInput(format!(
                "grammar_focus must be at most {GRAMMAR_FOCUS_MAX_CHARS} characters"
            )));
        }

        Ok(Self {
            scenario: scenario.to_string(),
            target_language,
            difficulty,
            grammar_focus: grammar_focus.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedLesson {
    pub lesson_id: Uuid,
    pub worksheet: Worksheet,
    pub exercise_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct WorksheetGenerator {
    gateway: LlmGateway,
    store: Arc<dyn Store>,
}

impl WorksheetGenerator {
    pub fn new(gateway: LlmGateway, store: Arc<dyn Store>) -> Self {
        Self { gateway, store }
    }

    pub async fn generate(&self, request: &WorksheetRequest) -> Result<Worksheet, GenerationError> {
        let prompt = StructuredPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user: build_user_prompt(request),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let worksheet: Worksheet = self.gateway.complete_structured(&prompt).await?;

        tracing::info!(
            language = %request.target_language,
            difficulty = %request.difficulty,
            exercises = worksheet.exercises.len(),
            vocabulary = worksheet.vocabulary.len(),
            "worksheet generated"
        );
        Ok(worksheet)
    }

    /// Same as [`generate`](Self::generate); nothing is stored and no ids exist.
    pub async fn preview(&self, request: &WorksheetRequest) -> Result<Worksheet, GenerationError> {
        self.generate(request).await
    }

    /// Generates, then stores the lesson with one exercise row per
    /// worksheet exercise, in order.
    pub async fn generate_and_persist(
        &self,
        request: &WorksheetRequest,
        user_id: Uuid,
    ) -> Result<GeneratedLesson, GenerationError> {
        let worksheet = self.generate(request).await?;

        self.store.ensure_user(user_id).await?;
        let persisted = self
            .store
            .insert_lesson(&NewLesson {
                user_id,
                target_language: request.target_language,
                scenario: request.scenario.clone(),
                grammar_focus: request.grammar_focus.clone(),
                difficulty: request.difficulty,
                worksheet: worksheet.clone(),
            })
            .await?;

        tracing::info!(lesson_id = %persisted.lesson_id, %user_id, "lesson stored");
        Ok(GeneratedLesson {
            lesson_id: persisted.lesson_id,
            worksheet,
            exercise_ids: persisted.exercise_ids,
        })
    }
}

pub fn build_user_prompt(request: &WorksheetRequest) -> String {
    let mut prompt = format!(
        "Create a {} worksheet for the scenario \"{}\". CEFR level: {}.",
        request.target_language.display_name(),
        request.scenario,
        request.difficulty,
    );
    if let Some(focus) = &request.grammar_focus {
        prompt.push_str(&format!(" Required grammar focus: {focus}. Every exercise must practise it."));
    }
    prompt.push_str(" Mix comprehension and production exercises.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_and_trims() {
        let req = WorksheetRequest::new("  Ordering food in a café ", "FR", None, Some("   ")).unwrap();
        assert_eq!(req.scenario, "Ordering food in a café");
        assert_eq!(req.target_language, Language::Fr);
        assert_eq!(req.difficulty, Difficulty::A1);
        assert_eq!(req.grammar_focus, None);
    }

    #[test]
    fn request_rejects_bad_input() {
        assert!(WorksheetRequest::new("hi", "fr", None, None).is_err());
        assert!(WorksheetRequest::new(&"x".repeat(501), "fr", None, None).is_err());
        assert!(WorksheetRequest::new("At the bank", "de", None, None).is_err());
        assert!(WorksheetRequest::new("At the bank", "es", Some("D1"), None).is_err());
        assert!(WorksheetRequest::new("At the bank", "es", None, Some(&"g".repeat(201))).is_err());
    }

    #[test]
    fn user_prompt_carries_every_constraint() {
        let req = WorksheetRequest::new("Ordering food in a café", "fr", Some("a2"), Some("passé composé")).unwrap();
        let prompt = build_user_prompt(&req);
        assert!(prompt.contains("French"));
        assert!(prompt.contains("Ordering food in a café"));
        assert!(prompt.contains("A2"));
        assert!(prompt.contains("passé composé"));
    }
}
