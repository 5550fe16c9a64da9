//! String helpers shared by the parser and the AI layer.

/// Trim trailing padding and strip a `" (Pool N)"` suffix from a user field.
///
/// AR Server right-pads the user column and appends the thread-pool ordinal
/// for escalation users; neither belongs in the stored `user` value.
pub fn normalize_user(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(open) = trimmed.rfind(" (Pool ") {
        if trimmed.ends_with(')') {
            return trimmed[..open].trim_end().to_string();
        }
    }
    trimmed.to_string()
}

/// Truncate to at most `max_chars`, cutting at a word boundary when one
/// exists. Used to derive conversation titles from the first user message.
pub fn truncate_at_word_boundary(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(pos) if pos > 0 => cut[..pos].trim_end().to_string(),
        _ => cut,
    }
}

/// Clean an optional string field: trim, drop when empty.
#[inline]
pub fn clean_optional_string(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_pool_suffix_and_padding() {
        assert_eq!(normalize_user("AR_ESCALATOR (Pool 3)                "), "AR_ESCALATOR");
        assert_eq!(normalize_user("Demo   "), "Demo");
        assert_eq!(normalize_user("  plain"), "plain");
    }

    #[test]
    fn pool_suffix_must_close() {
        assert_eq!(normalize_user("odd (Pool 3"), "odd (Pool 3");
    }

    #[test]
    fn truncates_on_word_boundary() {
        assert_eq!(truncate_at_word_boundary("why is my server slow today", 14), "why is my");
        assert_eq!(truncate_at_word_boundary("short", 80), "short");
        assert_eq!(truncate_at_word_boundary("abcdefghij", 4), "abcd");
    }
}
