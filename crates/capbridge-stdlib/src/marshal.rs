//! Conversions shared by the bundled bridges
//!
//! Script objects become `serde_json` maps when a bridge stores or
//! serializes them, and come back as fresh `ScriptValue`s.

use std::collections::HashMap;

use capbridge_sdk::{Args, BridgeError, BridgeResult, ScriptValue};

/// JSON object map, the native form of a script object
pub type NativeMap = serde_json::Map<String, serde_json::Value>;

/// Lower a script object argument to a native map.
///
/// Functions and handles inside the object are rejected as an invalid
/// argument at `index`.
pub fn object_to_native(
    args: &Args<'_>,
    index: usize,
    name: &str,
    fields: &HashMap<String, ScriptValue>,
) -> BridgeResult<NativeMap> {
    let mut map = NativeMap::with_capacity(fields.len());
    for (key, value) in fields {
        let native = value.to_native().map_err(|e| match e {
            BridgeError::TypeMismatch { got, .. } => {
                args.invalid(index, name, "object of plain data", format!("field '{}' is {}", key, got))
            }
            other => other,
        })?;
        map.insert(key.clone(), native);
    }
    Ok(map)
}

/// Lower a script object for logs and events; opaque values become strings
pub fn object_to_native_lossy(fields: &HashMap<String, ScriptValue>) -> NativeMap {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), v.to_native_lossy()))
        .collect()
}

/// Raise a native map into a script object
pub fn native_to_object(map: &NativeMap) -> ScriptValue {
    ScriptValue::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), ScriptValue::from_native(v)))
            .collect(),
    )
}

/// Build an event payload from key/value pairs
pub fn event_data<I, K>(pairs: I) -> NativeMap
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
