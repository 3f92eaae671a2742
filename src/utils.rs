// Utility functions
use chrono::{DateTime, Utc};

/// Converts a unix timestamp in seconds to `DateTime<Utc>`, if it is in range.
pub fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Removes a surrounding markdown code fence (```json ... ``` or ``` ... ```).
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// The outermost `{ ... }` span, for replies that wrap the JSON in prose.
pub fn outer_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (start < end).then(|| &content[start..=end])
}
