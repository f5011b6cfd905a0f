//! Shared data shapes exchanged with the model and the front end.
//!
//! Every model response is untrusted input: it enters the system only
//! through [`parse_worksheet`] or [`parse_evaluation`], which map free-form
//! text onto closed enums and reject anything outside them.

mod conversation;
mod evaluation;
mod json;
mod worksheet;

use thiserror::Error;

pub use conversation::{ConversationSession, ConversationTurn, Language, Role};
pub use evaluation::{parse_evaluation, EvaluationVerdict};
pub use json::{extract_first_object, parse_object};
pub use worksheet::{parse_worksheet, Difficulty, Exercise, ExerciseKind, VocabularyItem, Worksheet};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    #[error("response is empty")]
    EmptyResponse,
    #[error("response is not valid JSON: {0}")]
    NotJson(String),
    #[error("response JSON is not an object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("worksheet contains no exercises")]
    EmptyExercises,
    #[error("unknown exercise kind `{0}`")]
    UnknownExerciseKind(String),
    #[error("score {0} is outside [0, 1]")]
    ScoreOutOfRange(f64),
}

impl SchemaError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
