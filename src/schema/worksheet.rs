use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::json::{optional_text, parse_object, required, required_text};
use super::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    FillBlank,
    Conjugation,
    SentenceBuilding,
    Translation,
}

impl ExerciseKind {
    pub const ALL: [ExerciseKind; 4] = [
        ExerciseKind::FillBlank,
        ExerciseKind::Conjugation,
        ExerciseKind::SentenceBuilding,
        ExerciseKind::Translation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FillBlank => "fill_blank",
            Self::Conjugation => "conjugation",
            Self::SentenceBuilding => "sentence_building",
            Self::Translation => "translation",
        }
    }

    /// Accepts `fill_blank`, `fill-blank` and `Fill Blank` alike.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        Self::ALL.into_iter().find(|kind| kind.as_str() == normalized)
    }
}

impl fmt::Display for ExerciseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CEFR level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Difficulty {
    #[default]
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A1" => Some(Self::A1),
            "A2" => Some(Self::A2),
            "B1" => Some(Self::B1),
            "B2" => Some(Self::B2),
            "C1" => Some(Self::C1),
            "C2" => Some(Self::C2),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub word: String,
    pub translation: String,
    #[serde(alias = "example")]
    pub example_sentence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(rename = "type", alias = "kind")]
    pub kind: ExerciseKind,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worksheet {
    pub scenario_summary: String,
    pub vocabulary: Vec<VocabularyItem>,
    pub grammar_focus: String,
    #[serde(alias = "explanation")]
    pub explanations: String,
    pub exercises: Vec<Exercise>,
    pub roleplay_prompts: Vec<String>,
}

pub fn parse_worksheet(raw: &str) -> Result<Worksheet, SchemaError> {
    let map = parse_object(raw)?;

    let scenario_summary = required_text(&map, "scenario_summary")?;
    let grammar_focus = required_text(&map, "grammar_focus")?;
    let explanations = match map.get("explanations") {
        Some(_) => required_text(&map, "explanations")?,
        None => required_text(&map, "explanation").map_err(|_| SchemaError::MissingField("explanations".into()))?,
    };

    let vocabulary = required_array(&map, "vocabulary")?
        .iter()
        .enumerate()
        .map(|(i, item)| parse_vocabulary_item(i, item))
        .collect::<Result<Vec<_>, _>>()?;

    let raw_exercises = required_array(&map, "exercises")?;
    if raw_exercises.is_empty() {
        return Err(SchemaError::EmptyExercises);
    }
    let exercises = raw_exercises
        .iter()
        .enumerate()
        .map(|(i, item)| parse_exercise(i, item))
        .collect::<Result<Vec<_>, _>>()?;

    let roleplay_prompts = required_array(&map, "roleplay_prompts")?
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(Ok(s.trim().to_string())),
            _ => Some(Err(SchemaError::invalid(
                format!("roleplay_prompts[{i}]"),
                "expected a string",
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Worksheet {
        scenario_summary,
        vocabulary,
        grammar_focus,
        explanations,
        exercises,
        roleplay_prompts,
    })
}

fn required_array<'a>(map: &'a Map<String, Value>, field: &str) -> Result<&'a Vec<Value>, SchemaError> {
    required(map, field)?
        .as_array()
        .ok_or_else(|| SchemaError::invalid(field, "expected an array"))
}

fn item_object<'a>(field: &str, item: &'a Value) -> Result<&'a Map<String, Value>, SchemaError> {
    item.as_object()
        .ok_or_else(|| SchemaError::invalid(field, "expected an object"))
}

fn prefixed(prefix: &str, err: SchemaError) -> SchemaError {
    match err {
        SchemaError::MissingField(name) => SchemaError::MissingField(format!("{prefix}.{name}")),
        SchemaError::InvalidField { field, reason } => SchemaError::InvalidField {
            field: format!("{prefix}.{field}"),
            reason,
        },
        other => other,
    }
}

fn parse_vocabulary_item(index: usize, item: &Value) -> Result<VocabularyItem, SchemaError> {
    let path = format!("vocabulary[{index}]");
    let obj = item_object(&path, item)?;
    let field = |name: &str| required_text(obj, name).map_err(|e| prefixed(&path, e));

    let example_sentence = if obj.contains_key("example_sentence") {
        field("example_sentence")?
    } else {
        field("example").map_err(|_| SchemaError::MissingField(format!("{path}.example_sentence")))?
    };

    Ok(VocabularyItem {
        word: field("word")?,
        translation: field("translation")?,
        example_sentence,
    })
}

fn parse_exercise(index: usize, item: &Value) -> Result<Exercise, SchemaError> {
    let path = format!("exercises[{index}]");
    let obj = item_object(&path, item)?;

    let raw_kind = obj
        .get("type")
        .or_else(|| obj.get("kind"))
        .ok_or_else(|| SchemaError::MissingField(format!("{path}.type")))?;
    let kind = match raw_kind {
        Value::String(s) => ExerciseKind::parse(s).ok_or_else(|| SchemaError::UnknownExerciseKind(s.clone()))?,
        other => return Err(SchemaError::UnknownExerciseKind(other.to_string())),
    };

    Ok(Exercise {
        kind,
        question: required_text(obj, "question").map_err(|e| prefixed(&path, e))?,
        answer: required_text(obj, "answer").map_err(|e| prefixed(&path, e))?,
        hint: optional_text(obj, "hint").map_err(|e| prefixed(&path, e))?,
    })
}
