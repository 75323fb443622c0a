//! Text normalization and overlap scoring shared by the stores and the
//! extraction pass.

use std::collections::HashSet;

/// Two bullets are equivalent when their normalized forms match or their
/// token overlap is at least this high.
pub const BULLET_EQUIVALENCE_JACCARD: f64 = 0.9;

/// Two goal titles name the same goal at this overlap (or on normalized
/// equality / containment).
pub const TITLE_EQUIVALENCE_JACCARD: f64 = 0.72;

/// A goal is considered touched by a turn at this overlap.
pub const TURN_RELEVANCE_JACCARD: f64 = 0.12;

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized token set.
pub fn token_set(s: &str) -> HashSet<String> {
    normalize(s).split_whitespace().map(str::to_string).collect()
}

/// Jaccard overlap of the normalized token sets of `a` and `b`.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

/// Bullet de-duplication check: normalized equality or near-total overlap.
pub fn bullets_equivalent(a: &str, b: &str) -> bool {
    let na = normalize(a);
    let nb = normalize(b);
    if na == nb {
        return true;
    }
    jaccard(a, b) >= BULLET_EQUIVALENCE_JACCARD
}

/// Goal title identity: normalized equality, containment, or Jaccard ≥ 0.72.
pub fn titles_equivalent(a: &str, b: &str) -> bool {
    let na = normalize(a);
    let nb = normalize(b);
    if na.is_empty() || nb.is_empty() {
        return na == nb;
    }
    if na == nb || na.contains(&nb) || nb.contains(&na) {
        return true;
    }
    jaccard(a, b) >= TITLE_EQUIVALENCE_JACCARD
}

/// First sentence of `s`, trimmed to at most `max_chars` characters.
pub fn first_sentence(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].chars().take(max_chars).collect::<String>().trim().to_string()
}
