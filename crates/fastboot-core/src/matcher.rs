//! Requirement value matching.
//!
//! A value ending in `*` is a prefix match over the characters before the
//! `*`; anything else is an exact match. Matching is case-sensitive.

/// True iff any entry of `values` matches `resp`.
pub fn match_any<S: AsRef<str>>(resp: &str, values: &[S]) -> bool {
    values.iter().any(|v| matches_value(resp, v.as_ref()))
}

fn matches_value(resp: &str, value: &str) -> bool {
    match value.strip_suffix('*') {
        Some(prefix) if !prefix.is_empty() => resp.starts_with(prefix),
        _ => resp == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_prefix_match() {
        assert!(match_any("xyz-14", &["xyz-*"]));
    }

    #[test]
    fn test_wildcard_requires_full_prefix() {
        assert!(!match_any("xyz", &["xyz-*"]));
    }

    #[test]
    fn test_exact_match() {
        assert!(match_any("xyz", &["xyz"]));
        assert!(!match_any("xyza", &["xyz"]));
    }

    #[test]
    fn test_any_entry_suffices() {
        assert!(match_any("bullhead", &["angler", "bullhead"]));
        assert!(!match_any("shamu", &["angler", "bullhead"]));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!match_any("XYZ", &["xyz"]));
    }

    #[test]
    fn test_lone_star_is_exact() {
        assert!(match_any("*", &["*"]));
        assert!(!match_any("anything", &["*"]));
    }
}
