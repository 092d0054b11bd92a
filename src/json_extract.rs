//! Tolerant extraction of a JSON object from a model reply.
//!
//! Models wrap JSON in prose or code fences more often than not. Strategies, in order:
//! the whole reply, the first fenced block, the span from the first `{` to the last `}`.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Extract the first JSON object found by any strategy.
pub fn extract_json_object(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();

    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Some(value) = parse_object(block) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&trimmed[start..=end])
}

/// Extract and deserialize into `T`.
pub fn extract_as<T: DeserializeOwned>(reply: &str) -> Result<T, String> {
    let value = extract_json_object(reply).ok_or_else(|| "no JSON object found in reply".to_string())?;
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Body of the first ```json (or bare ```) fence.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}
