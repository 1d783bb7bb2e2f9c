//! Key matchers used by the policy engine.
//!
//! # Purpose
//! Implements the two comparisons in the matcher
//! `keyMatch(r.res, p.res) && keyMatch(r.act, p.act) && matchKeyByPart(r.obj, p.obj)`.
//!
//! # Key invariants
//! - Matching is one-directional: the request key is the first argument and
//!   only the policy key may carry wildcards.
//! - An object whose segment count differs from the policy object never
//!   matches unless the policy object is exactly `*`.
use casbin::function_map;

/// Wildcard prefix match.
///
/// # What it does
/// If `pattern` has no `*`, returns `key == pattern`. Otherwise `key` must
/// start with the part of `pattern` before the first `*`.
///
/// # Example
/// ```rust
/// use orchestrator_auth::auth::rbac::matcher::key_match;
///
/// assert!(key_match("applications", "*"));
/// assert!(key_match("team-a", "team-*"));
/// assert!(!key_match("get", "update"));
/// ```
pub fn key_match(key: &str, pattern: &str) -> bool {
    function_map::key_match(key, pattern)
}

/// Segment-wise match of `/`-separated objects.
///
/// # What it does
/// - `pattern == "*"` matches any key.
/// - Otherwise both sides split on `/`; they must have the same non-zero
///   number of segments, none empty, and each request segment must
///   [`key_match`] the policy segment at the same position.
pub fn match_key_by_part(key: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let keys: Vec<&str> = key.split('/').collect();
    let patterns: Vec<&str> = pattern.split('/').collect();
    if keys.len() != patterns.len() {
        return false;
    }
    keys.iter().zip(patterns.iter()).all(|(k, p)| {
        !k.is_empty() && !p.is_empty() && key_match(k, p)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_match_handles_exact_and_prefix() {
        assert!(key_match("get", "get"));
        assert!(!key_match("get", "ge"));
        assert!(key_match("anything", "*"));
        assert!(key_match("helm-app", "helm*"));
        assert!(!key_match("app", "helm*"));
    }

    #[test]
    fn match_key_by_part_compares_segments() {
        assert!(match_key_by_part("t/a", "t/a"));
        assert!(match_key_by_part("t/a", "t/*"));
        assert!(match_key_by_part("t/a", "*/*"));
        assert!(!match_key_by_part("t/b", "t/a"));
        assert!(match_key_by_part("t/e/a", "*"));
    }

    #[test]
    fn match_key_by_part_rejects_shape_mismatch() {
        assert!(!match_key_by_part("t", "t/*"));
        assert!(!match_key_by_part("t/e/a", "t/*"));
        assert!(!match_key_by_part("t//a", "t/*/a"));
        assert!(!match_key_by_part("", "t"));
    }
}
