use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::json::{optional_text, parse_object, required};
use super::SchemaError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub is_correct: bool,
    pub score: f64,
    pub feedback: String,
}

pub fn parse_evaluation(raw: &str) -> Result<EvaluationVerdict, SchemaError> {
    let map = parse_object(raw)?;

    let is_correct = coerce_bool(required(&map, "is_correct")?)
        .ok_or_else(|| SchemaError::invalid("is_correct", "expected a boolean"))?;

    let score = coerce_f64(required(&map, "score")?)
        .ok_or_else(|| SchemaError::invalid("score", "expected a number"))?;
    if !(0.0..=1.0).contains(&score) {
        return Err(SchemaError::ScoreOutOfRange(score));
    }

    let feedback = optional_text(&map, "feedback")?.unwrap_or_default();

    Ok(EvaluationVerdict {
        is_correct,
        score,
        feedback,
    })
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64()? {
            v if v == 1.0 => Some(true),
            v if v == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}
