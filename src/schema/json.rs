use serde_json::{Map, Value};

use super::SchemaError;

/// Parses model output into a JSON object.
///
/// Strict parse first; on failure the first balanced `{...}` substring is
/// extracted (dropping surrounding prose or code fences) and parsed once more.
pub fn parse_object(raw: &str) -> Result<Map<String, Value>, SchemaError> {
    let trimmed = raw.trim();
    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(strict_err) => {
            let candidate =
                extract_first_object(trimmed).ok_or_else(|| SchemaError::NotJson(strict_err.to_string()))?;
            serde_json::from_str::<Value>(candidate).map_err(|e| SchemaError::NotJson(e.to_string()))?
        }
    };

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(SchemaError::NotAnObject),
    }
}

/// Returns the first balanced JSON object in `text`, honouring string
/// literals and escapes so braces inside strings do not count.
pub fn extract_first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

pub(crate) fn required<'a>(map: &'a Map<String, Value>, field: &str) -> Result<&'a Value, SchemaError> {
    match map.get(field) {
        Some(Value::Null) | None => Err(SchemaError::MissingField(field.to_string())),
        Some(value) => Ok(value),
    }
}

pub(crate) fn required_text(map: &Map<String, Value>, field: &str) -> Result<String, SchemaError> {
    match required(map, field)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::String(_) => Err(SchemaError::MissingField(field.to_string())),
        _ => Err(SchemaError::invalid(field, "expected a string")),
    }
}

pub(crate) fn optional_text(map: &Map<String, Value>, field: &str) -> Result<Option<String>, SchemaError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(SchemaError::invalid(field, "expected a string")),
    }
}
