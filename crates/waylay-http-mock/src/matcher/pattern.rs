//! Regex constructors shared by the matcher variants.
//!
//! Exact/prefix/suffix helpers are anchored regexes over escaped literals,
//! not distinct matcher types. User-supplied patterns are re-anchored so
//! that matching is always full-string, never substring.

use regex::Regex;

/// Matches any text, including none and multi-line bodies.
pub fn any() -> Regex {
    literal_pattern(r"(?s)\A.*\z")
}

/// Matches exactly `text`.
pub fn exact(text: &str) -> Regex {
    literal_pattern(&format!(r"\A{}\z", regex::escape(text)))
}

/// Matches any text starting with `text`.
pub fn prefix(text: &str) -> Regex {
    literal_pattern(&format!(r"(?s)\A{}.*\z", regex::escape(text)))
}

/// Matches any text ending with `text`.
pub fn suffix(text: &str) -> Regex {
    literal_pattern(&format!(r"(?s)\A.*{}\z", regex::escape(text)))
}

/// Compile a user-supplied pattern with full-string anchoring.
pub fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"\A(?:{pattern})\z"))
}

/// Render the shared `expected=<X>;actual=<Y>` diagnostic.
pub fn reason(expected: &str, actual: Option<&str>) -> String {
    format!("expected={};actual={}", expected, actual.unwrap_or("<absent>"))
}

fn literal_pattern(pattern: &str) -> Regex {
    // Escaped literals and the fixed patterns above always compile.
    Regex::new(pattern).expect("literal pattern")
}
