//! Parenthesized-query unwrapping.
//!
//! Tableau discovers result schemas by sending `(SELECT …) LIMIT 0`. The
//! parser preserves the outer parentheses on round-trip and the backend
//! rejects the parenthesized form, so this transform is textual: strip the
//! parentheses, keep the trailing LIMIT. Matching is case-insensitive and
//! tolerant of embedded whitespace and newlines.

use std::sync::OnceLock;

use regex::Regex;

fn paren_limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\((SELECT\s.+)\)\s+(LIMIT\s+\d+)$").expect("valid paren-limit regex")
    })
}

fn paren_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\((SELECT\s.+)\)$").expect("valid paren regex"))
}

/// Collapse runs of whitespace (newlines included) to single spaces.
fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when the statement is `(SELECT …)` optionally followed by `LIMIT n`.
pub fn needs_unwrapping(sql: &str) -> bool {
    let normalized = normalize(sql);
    if !normalized.starts_with('(') {
        return false;
    }
    paren_limit_re().is_match(&normalized) || paren_only_re().is_match(&normalized)
}

/// `(SELECT …) LIMIT n` → `SELECT … LIMIT n`; `(SELECT …)` → `SELECT …`.
/// `None` when the shape does not match.
pub fn unwrap(sql: &str) -> Option<String> {
    let normalized = normalize(sql);

    if let Some(caps) = paren_limit_re().captures(&normalized) {
        let inner = caps.get(1)?.as_str().trim();
        let limit = caps.get(2)?.as_str().trim();
        return Some(format!("{inner} {limit}"));
    }

    if let Some(caps) = paren_only_re().captures(&normalized) {
        return Some(caps.get(1)?.as_str().trim().to_string());
    }

    None
}
