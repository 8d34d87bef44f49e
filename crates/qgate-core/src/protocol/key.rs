//! Resource-key normalization.
//!
//! Data keys embed entity ids (`user42`, `order123:line5`). Permissions are
//! kept per resource, so the id part is cut away: the normalized key is the
//! text before the first `:` and before the first ASCII digit.

/// Delimiter separating key segments.
pub const KEY_DELIMITER: char = ':';

/// Normalize a raw data key to its resource prefix.
///
/// Returns `None` when nothing is left (e.g. `"42"` or `":x"`); callers must
/// fail closed on `None`.
pub fn normalize_resource_key(raw: &str) -> Option<&str> {
    let end = raw
        .char_indices()
        .find(|&(_, c)| c == KEY_DELIMITER || c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(raw.len());

    let key = &raw[..end];
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Public keys start with an ASCII uppercase letter; others are private to
/// workers and never readable over HTTP.
pub fn is_public_key(raw: &str) -> bool {
    raw.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}
