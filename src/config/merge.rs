//! Deep merge of configuration tiers.
//!
//! Objects merge key by key, anything else in the overlay replaces the base,
//! and a null overlay keeps the base.

use serde_json::Value;

/// Merge `overlay` over `base`.
///
/// # Example
/// ```
/// use serde_json::json;
/// use consulator::config::deep_merge;
///
/// let project = json!({"prefix": "svc", "glue": ","});
/// let user = json!({"glue": "|"});
/// assert_eq!(deep_merge(project, user), json!({"prefix": "svc", "glue": "|"}));
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Fold [`deep_merge`] over tiers given lowest priority first.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}
