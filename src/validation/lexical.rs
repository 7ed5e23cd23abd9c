//! Lexical denylist scan over the raw query text.

/// Lowercase and collapse whitespace runs so `UNION\n  SELECT` matches `union select`.
pub fn normalize(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Pattern form of [`normalize`]: whitespace runs become one space, but a
/// leading or trailing space is kept since it marks a word boundary.
pub fn normalize_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut in_space = false;
    for c in pattern.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.extend(c.to_lowercase());
            in_space = false;
        }
    }
    out
}

/// First pattern (in configured order) occurring in the normalized text.
pub fn find_denied<'p>(query: &str, patterns: &'p [String]) -> Option<&'p str> {
    let haystack = normalize(query);
    patterns
        .iter()
        .map(String::as_str)
        .find(|pattern| haystack.contains(pattern))
}
