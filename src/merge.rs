//! Layered deep merge over JSON documents.
//!
//! Catalogue table definitions are composed from ordered layers: a base
//! template, a format-specific template, and an optional free-form user
//! override. Later layers win. Maps merge key-wise and recursively; any
//! non-map overlay value (scalars and arrays alike) replaces the base value
//! outright — arrays are never appended to.

use serde_json::Value;

/// Deep-merge `overlay` into `base`, returning the merged document.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut out = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let merged = match out.get(key) {
                    Some(base_value) => merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Fold an ordered list of layers into one document.
///
/// The first layer is the base; each subsequent layer takes precedence over
/// everything merged so far.
pub fn merge_layers<'a, I>(layers: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    layers
        .into_iter()
        .fold(Value::Object(Default::default()), |acc, layer| {
            merge(&acc, layer)
        })
}
