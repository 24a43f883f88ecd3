//! URI pattern matching rules (§4.B): literal, glob, and template, with a
//! deterministic specificity ordering for conflict tie-breaks.

use crate::types::UriPattern;

/// Specificity ordering for tie-break resolution: literal is most specific,
/// then template, then glob; among globs, longer patterns are more specific.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity(u8, usize);

impl Specificity {
    fn of(pattern: &UriPattern) -> Self {
        if pattern.is_literal() {
            Specificity(2, pattern.as_str().len())
        } else if pattern.is_template() {
            Specificity(1, pattern.as_str().len())
        } else {
            Specificity(0, pattern.as_str().len())
        }
    }
}

/// Does `pattern` match `uri`? Literal matching is exact, case-insensitive.
/// Glob `*` matches any character sequence including `/`, anchored to the
/// whole string. Template `{name}` segments match exactly one path segment
/// (no `/`); bindings are discarded — only the match boolean matters here.
#[must_use]
pub fn matches(pattern: &UriPattern, uri: &str) -> bool {
    if pattern.is_literal() {
        return pattern.as_str().eq_ignore_ascii_case(uri);
    }
    if pattern.is_glob() {
        return glob_match(pattern.as_str(), uri);
    }
    template_match(pattern.as_str(), uri)
}

/// Anchored glob match: `*` matches zero or more arbitrary characters,
/// including `/`. Case-insensitive, matching the literal rule's casing.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let text: Vec<char> = text.to_ascii_lowercase().chars().collect();
    glob_match_rec(&pattern, &text)
}

fn glob_match_rec(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            // Try consuming 0..=text.len() characters for this `*`.
            for i in 0..=text.len() {
                if glob_match_rec(&pattern[1..], &text[i..]) {
                    return true;
                }
            }
            false
        }
        Some(c) => match text.first() {
            Some(t) if t == c => glob_match_rec(&pattern[1..], &text[1..]),
            _ => false,
        },
    }
}

/// Template match: each `{name}` segment must align with exactly one `/`
/// delimited path segment on the candidate uri; other segments must match
/// literally (case-insensitive).
fn template_match(pattern: &str, uri: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let uri_segments: Vec<&str> = uri.split('/').collect();
    if pattern_segments.len() != uri_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(uri_segments.iter())
        .all(|(p, u)| {
            (p.starts_with('{') && p.ends_with('}') && !u.is_empty()) || p.eq_ignore_ascii_case(u)
        })
}

#[must_use]
pub fn specificity(pattern: &UriPattern) -> Specificity {
    Specificity::of(pattern)
}
