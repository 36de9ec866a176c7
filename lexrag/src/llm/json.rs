use serde::de::DeserializeOwned;

use crate::error::{LexError, Result};

/// The JSON object inside a model reply: markdown fences and any prose
/// around the outermost braces are dropped.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (start < end).then(|| &unfenced[start..=end])
}

/// Parses a model reply into `T`, tolerating fences and surrounding prose.
pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let json = extract_json_object(raw)
        .ok_or_else(|| LexError::Validation("reply contains no JSON object".to_string()))?;

    serde_json::from_str(json).map_err(|e| {
        tracing::debug!(
            response_len = raw.len(),
            response_preview = %raw.chars().take(100).collect::<String>(),
            error = %e,
            "Failed to parse JSON reply"
        );
        LexError::Json(e)
    })
}
