//! String helpers for narration and log output.

/// Truncate `&str` to at most `max_bytes`, never splitting a UTF-8 codepoint.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate for display, marking the cut with an ellipsis.
pub fn truncate_for_display(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        s.to_string()
    } else {
        format!("{}...", truncate_str(s, max_bytes))
    }
}

/// One-line `key: value` summary of the first few fields of a JSON object.
///
/// Non-objects are rendered compactly.
pub fn summarize_json(value: &serde_json::Value, max_fields: usize, max_value: usize) -> String {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .take(max_fields)
            .map(|(k, v)| {
                let rendered = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{k}: {}", truncate_for_display(&rendered, max_value))
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => truncate_for_display(&other.to_string(), max_value),
    }
}
