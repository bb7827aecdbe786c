//! Topic routing-key pattern matching.
//!
//! Patterns follow the usual topic-exchange rules: segments are dotted,
//! `*` matches exactly one segment, `#` matches zero or more segments.

/// Returns true if `routing_key` matches the binding `pattern`.
pub fn routing_key_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_segments(&pattern, &key)
}

fn matches_segments(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            // `#` absorbs zero segments, or one and stays in place.
            matches_segments(&pattern[1..], key)
                || (!key.is_empty() && matches_segments(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => matches_segments(&pattern[1..], &key[1..]),
        (Some(p), Some(k)) if p == k => matches_segments(&pattern[1..], &key[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(routing_key_matches("inventory.updated", "inventory.updated"));
        assert!(!routing_key_matches("inventory.updated", "inventory.created"));
    }

    #[test]
    fn star_matches_exactly_one_segment() {
        assert!(routing_key_matches("order.*", "order.created"));
        assert!(routing_key_matches("order.*", "order.paid"));
        assert!(!routing_key_matches("order.*", "order"));
        assert!(!routing_key_matches("order.*", "order.item.added"));
        assert!(!routing_key_matches("order.*", "payment.failed"));
    }

    #[test]
    fn hash_matches_zero_or_more_segments() {
        assert!(routing_key_matches("#", "order.created"));
        assert!(routing_key_matches("#", "order"));
        assert!(routing_key_matches("order.#", "order.created"));
        assert!(routing_key_matches("order.#", "order"));
        assert!(routing_key_matches("order.#", "order.item.added"));
        assert!(!routing_key_matches("order.#", "payment.failed"));
    }

    #[test]
    fn hash_in_the_middle() {
        assert!(routing_key_matches("order.#.failed", "order.payment.failed"));
        assert!(routing_key_matches("order.#.failed", "order.failed"));
        assert!(!routing_key_matches("order.#.failed", "order.paid"));
    }

    #[test]
    fn star_does_not_cross_dots() {
        assert!(!routing_key_matches("*", "order.created"));
        assert!(routing_key_matches("*.*", "order.created"));
    }
}
