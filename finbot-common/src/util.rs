//! Utility functions for FinBot services.

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries, so multi-byte text is never split.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Redact credentials from text before it reaches the logs.
///
/// Market API tokens travel as query parameters, so request URLs and
/// transport errors carry them verbatim.
pub fn sanitize_for_log(s: &str) -> String {
    let patterns: &[(&str, &str)] = &[
        (r"(?i)([?&](?:token|api[_-]?key)=)[^&\s]+", "${1}***REDACTED***"),
        (r"(?i)(x-api-key|authorization)\s*[=:]\s*\S+", "$1=***REDACTED***"),
        (r"sk-ant-[a-zA-Z0-9_\-]{10,}", "***REDACTED_API_KEY***"),
    ];

    let mut result = s.to_string();
    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            result = re.replace_all(&result, *replacement).to_string();
        }
    }
    result
}
