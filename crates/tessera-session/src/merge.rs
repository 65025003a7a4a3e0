use serde_json::Value;

/// Recursively merge `patch` into `base`.
///
/// When both sides of a key are maps the merge descends, preserving existing
/// keys the patch does not mention. Any other pairing replaces the old value
/// wholesale; arrays are never merged element-wise.
pub fn deep_merge(base: &mut Value, patch: Value) {
    match patch {
        Value::Object(patch_map) => {
            if let Value::Object(base_map) = base {
                for (key, value) in patch_map {
                    match base_map.get_mut(&key) {
                        Some(slot) => deep_merge(slot, value),
                        None => {
                            base_map.insert(key, value);
                        }
                    }
                }
            } else {
                *base = Value::Object(patch_map);
            }
        }
        other => *base = other,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_nested_maps_merge_keywise() {
        let mut base = json!({"a": {"x": 1, "y": 2}});
        deep_merge(&mut base, json!({"a": {"x": 9}}));
        assert_eq!(base, json!({"a": {"x": 9, "y": 2}}));
    }

    #[test]
    fn test_arrays_replaced_wholesale() {
        let mut base = json!({"a": {"z": [1, 2, 3]}});
        deep_merge(&mut base, json!({"a": {"z": [4]}}));
        assert_eq!(base, json!({"a": {"z": [4]}}));
    }

    #[test]
    fn test_scalar_replaces_map_and_back() {
        let mut base = json!({"a": {"x": 1}});
        deep_merge(&mut base, json!({"a": 7}));
        assert_eq!(base, json!({"a": 7}));

        deep_merge(&mut base, json!({"a": {"x": 1}}));
        assert_eq!(base, json!({"a": {"x": 1}}));
    }

    #[test]
    fn test_untouched_siblings_preserved() {
        let mut base = json!({"ws": "a", "cursor": {"line": 3, "col": 7}});
        deep_merge(&mut base, json!({"cursor": {"col": 9}, "extra": 1}));
        assert_eq!(
            base,
            json!({"ws": "a", "cursor": {"line": 3, "col": 9}, "extra": 1})
        );
    }
}
