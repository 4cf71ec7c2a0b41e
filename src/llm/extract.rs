use serde_json::Value;

use super::LlmError;

pub fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(stripped) = trimmed
        .strip_prefix("```json")
        .and_then(|s| s.strip_suffix("```"))
    {
        return stripped.trim().to_string();
    }
    if let Some(stripped) = trimmed
        .strip_prefix("```")
        .and_then(|s| s.strip_suffix("```"))
    {
        return stripped.trim().to_string();
    }
    trimmed.to_string()
}

/// Parses a JSON object out of free-form model output.
///
/// Tries the text as-is, then without a markdown fence, then the span from the
/// first `{` to the last `}`.
pub fn extract_json_object(raw: &str) -> Result<Value, LlmError> {
    extract_with(raw, '{', '}', Value::is_object)
}

/// Same as [`extract_json_object`] for a top-level array, using `[`/`]`.
pub fn extract_json_array(raw: &str) -> Result<Value, LlmError> {
    extract_with(raw, '[', ']', Value::is_array)
}

fn extract_with(raw: &str, open: char, close: char, accept: fn(&Value) -> bool) -> Result<Value, LlmError> {
    let parse = |text: &str| serde_json::from_str::<Value>(text).ok().filter(accept);

    if let Some(value) = parse(raw.trim()) {
        return Ok(value);
    }

    let unfenced = strip_code_fence(raw);
    if let Some(value) = parse(&unfenced) {
        return Ok(value);
    }

    let start = raw.find(open);
    let end = raw.rfind(close);
    match (start, end) {
        (Some(start), Some(end)) if end > start => {
            parse(&raw[start..=end]).ok_or(LlmError::InvalidJson)
        }
        _ => Err(LlmError::InvalidJson),
    }
}
