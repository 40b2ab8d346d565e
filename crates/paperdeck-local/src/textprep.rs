//! Minimal, deterministic text helpers shared by the processing pipeline.

/// Collapse all whitespace runs to single spaces and trim.
pub fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars` characters (never mid-codepoint).
///
/// Returns the truncated string and whether anything was clipped.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    if max_chars == 0 {
        return (String::new(), !s.is_empty());
    }
    let mut out = String::new();
    for (n, ch) in s.chars().enumerate() {
        if n >= max_chars {
            return (out, true);
        }
        out.push(ch);
    }
    (out, false)
}

/// Derive an anchor-safe id from heading text.
///
/// Lowercase; characters other than word characters, whitespace and hyphens
/// are dropped; runs of whitespace/hyphens collapse to a single hyphen.
/// No uniqueness pass: identical titles produce identical slugs.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_sep = false;
    for ch in text.trim().to_lowercase().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_sep {
                out.push('-');
                pending_sep = false;
            }
            out.push(ch);
        } else if ch.is_whitespace() || ch == '-' {
            pending_sep = true;
        }
        // Everything else (punctuation, symbols) is dropped without becoming
        // a separator, so "R&D" slugs to "rd", not "r-d".
    }
    if pending_sep {
        out.push('-');
    }
    out
}
