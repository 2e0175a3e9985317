//! JSON canonicalisation for idempotence comparisons (§4.1).
//!
//! Equality for `SetupHSM`/`SetupPolicy`/`ZoneAdd` is defined over the
//! sorted-key, re-serialised form of both sides: two values are equal
//! exactly when their canonical strings match.

use serde_json::Value;

/// Recursively sort every object's keys and re-serialise.
///
/// Arrays keep their order; only object key order is unspecified in JSON
/// and needs normalising before a string comparison means anything.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Whether two JSON values are equal once both sides are canonicalised.
pub fn canonical_eq(a: &Value, b: &Value) -> bool {
    canonicalize(a) == canonicalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_equality() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 1}});
        let b = json!({"a": {"x": 1, "y": 2}, "b": 1});
        assert!(canonical_eq(&a, &b));
    }

    #[test]
    fn differing_values_are_not_equal() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert!(!canonical_eq(&a, &b));
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert!(!canonical_eq(&a, &b));
    }
}
