//! ScriptValue - the closed value algebra used at the host/script boundary
//!
//! Every datum that crosses into or out of a bridge is a `ScriptValue`.
//! Plain data (nil, bool, number, string, array, object) lowers to
//! `serde_json::Value` and back without loss. Functions and custom handles
//! are by-reference values: they compare by identity and have no data form.
//!
//! Typed accessors return `BridgeError::TypeMismatch` on the wrong variant;
//! none of them panic.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult};

// ============================================================================
// Value type discriminant
// ============================================================================

/// Discriminant of a `ScriptValue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// No value
    Nil,
    /// Boolean
    Bool,
    /// 64-bit float
    Number,
    /// UTF-8 text
    String,
    /// Ordered sequence
    Array,
    /// String-keyed map
    Object,
    /// Script-side callback
    Function,
    /// Opaque host handle
    Custom,
}

impl ValueType {
    /// Script-visible type name
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Nil => "nil",
            ValueType::Bool => "bool",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Function => "function",
            ValueType::Custom => "custom",
        }
    }

    /// Parse a declared type name. Returns `None` for names that are not
    /// value variants (e.g. `"any"` or a handle tag such as `"error"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "nil" | "null" | "void" => Some(ValueType::Nil),
            "bool" | "boolean" => Some(ValueType::Bool),
            "number" => Some(ValueType::Number),
            "string" => Some(ValueType::String),
            "array" => Some(ValueType::Array),
            "object" => Some(ValueType::Object),
            "function" => Some(ValueType::Function),
            "custom" => Some(ValueType::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Opaque host value passed through scripts by reference.
///
/// The tag is a debugging convention chosen by the creating bridge. The
/// payload's concrete type, checked by `downcast`, is the source of truth.
#[derive(Clone)]
pub struct Handle {
    tag: String,
    type_name: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Handle {
    /// Wrap a host value under a tag
    pub fn new<T: Any + Send + Sync>(tag: impl Into<String>, payload: T) -> Self {
        Self::from_arc(tag, Arc::new(payload))
    }

    /// Wrap an already shared host value under a tag
    pub fn from_arc<T: Any + Send + Sync>(tag: impl Into<String>, payload: Arc<T>) -> Self {
        let payload: Arc<dyn Any + Send + Sync> = payload;
        Self {
            tag: tag.into(),
            type_name: std::any::type_name::<T>(),
            payload,
        }
    }

    /// Tag given by the creating bridge
    #[inline]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Rust type name of the stored payload
    #[inline]
    pub fn payload_type(&self) -> &'static str {
        self.type_name
    }

    /// Check whether the payload is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Borrow the payload as a `T`
    pub fn downcast_ref<T: Any>(&self) -> BridgeResult<&T> {
        self.payload
            .downcast_ref::<T>()
            .ok_or_else(|| self.downcast_error::<T>())
    }

    /// Share the payload as an `Arc<T>` (no copy)
    pub fn downcast<T: Any + Send + Sync>(&self) -> BridgeResult<Arc<T>> {
        Arc::clone(&self.payload)
            .downcast::<T>()
            .map_err(|_| self.downcast_error::<T>())
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }

    fn downcast_error<T: Any>(&self) -> BridgeError {
        BridgeError::DowncastFailure {
            tag: self.tag.clone(),
            expected: std::any::type_name::<T>().to_string(),
            actual: self.type_name.to_string(),
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("tag", &self.tag)
            .field("payload", &self.type_name)
            .finish()
    }
}

// ============================================================================
// ScriptFunction
// ============================================================================

type CallbackFn = dyn Fn(&[ScriptValue]) -> BridgeResult<ScriptValue> + Send + Sync;

/// Reference to a script-side callback the host may invoke.
///
/// Identity only: two functions are equal when they share the same callback.
#[derive(Clone)]
pub struct ScriptFunction {
    inner: Arc<CallbackFn>,
}

impl ScriptFunction {
    /// Wrap a callback
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[ScriptValue]) -> BridgeResult<ScriptValue> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Invoke the callback
    pub fn call(&self, args: &[ScriptValue]) -> BridgeResult<ScriptValue> {
        (self.inner)(args)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ScriptFunction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ScriptFunction {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScriptFunction")
    }
}

// ============================================================================
// ScriptValue
// ============================================================================

/// A value crossing the host/script boundary.
///
/// Immutable once constructed; bridges always return freshly built values.
/// Object key order is unspecified.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    /// No value / void return
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// 64-bit float; integers beyond 2^53 lose precision
    Number(f64),
    /// UTF-8 text
    String(String),
    /// Ordered sequence
    Array(Vec<ScriptValue>),
    /// String-keyed map with unique keys
    Object(HashMap<String, ScriptValue>),
    /// Script-side callback
    Function(ScriptFunction),
    /// Opaque host handle
    Custom(Handle),
}

impl ScriptValue {
    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    /// Nil value
    #[inline]
    pub fn nil() -> Self {
        ScriptValue::Nil
    }

    /// Boolean value
    #[inline]
    pub fn bool(b: bool) -> Self {
        ScriptValue::Bool(b)
    }

    /// Number value
    #[inline]
    pub fn number(n: impl Into<f64>) -> Self {
        ScriptValue::Number(n.into())
    }

    /// String value
    #[inline]
    pub fn string(s: impl Into<String>) -> Self {
        ScriptValue::String(s.into())
    }

    /// Array value
    #[inline]
    pub fn array(items: Vec<ScriptValue>) -> Self {
        ScriptValue::Array(items)
    }

    /// Object value
    #[inline]
    pub fn object(fields: HashMap<String, ScriptValue>) -> Self {
        ScriptValue::Object(fields)
    }

    /// Object value from key/value pairs
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ScriptValue)>,
    {
        ScriptValue::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Custom handle wrapping a host value
    pub fn custom<T: std::any::Any + Send + Sync>(tag: impl Into<String>, payload: T) -> Self {
        ScriptValue::Custom(Handle::new(tag, payload))
    }

    /// Function value wrapping a callback
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[ScriptValue]) -> BridgeResult<ScriptValue> + Send + Sync + 'static,
    {
        ScriptValue::Function(ScriptFunction::new(f))
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Variant discriminant
    pub fn value_type(&self) -> ValueType {
        match self {
            ScriptValue::Nil => ValueType::Nil,
            ScriptValue::Bool(_) => ValueType::Bool,
            ScriptValue::Number(_) => ValueType::Number,
            ScriptValue::String(_) => ValueType::String,
            ScriptValue::Array(_) => ValueType::Array,
            ScriptValue::Object(_) => ValueType::Object,
            ScriptValue::Function(_) => ValueType::Function,
            ScriptValue::Custom(_) => ValueType::Custom,
        }
    }

    /// Type name used in diagnostics. Custom values report their tag.
    pub fn type_name(&self) -> String {
        match self {
            ScriptValue::Custom(handle) => format!("custom<{}>", handle.tag()),
            other => other.value_type().as_str().to_string(),
        }
    }

    /// Check if nil
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    /// Script truthiness: nil, false, 0, "" and empty containers are false
    pub fn is_truthy(&self) -> bool {
        match self {
            ScriptValue::Nil => false,
            ScriptValue::Bool(b) => *b,
            ScriptValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ScriptValue::String(s) => !s.is_empty(),
            ScriptValue::Array(items) => !items.is_empty(),
            ScriptValue::Object(fields) => !fields.is_empty(),
            ScriptValue::Function(_) | ScriptValue::Custom(_) => true,
        }
    }

    /// Field lookup on an object; `None` for missing keys and non-objects
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        match self {
            ScriptValue::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------------

    fn mismatch(&self, expected: ValueType) -> BridgeError {
        BridgeError::TypeMismatch {
            expected: expected.as_str().to_string(),
            got: self.type_name(),
        }
    }

    /// Get as bool
    pub fn as_bool(&self) -> BridgeResult<bool> {
        match self {
            ScriptValue::Bool(b) => Ok(*b),
            other => Err(other.mismatch(ValueType::Bool)),
        }
    }

    /// Get as f64
    pub fn as_number(&self) -> BridgeResult<f64> {
        match self {
            ScriptValue::Number(n) => Ok(*n),
            other => Err(other.mismatch(ValueType::Number)),
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> BridgeResult<&str> {
        match self {
            ScriptValue::String(s) => Ok(s),
            other => Err(other.mismatch(ValueType::String)),
        }
    }

    /// Get as array elements
    pub fn as_array(&self) -> BridgeResult<&[ScriptValue]> {
        match self {
            ScriptValue::Array(items) => Ok(items),
            other => Err(other.mismatch(ValueType::Array)),
        }
    }

    /// Get as object fields
    pub fn as_object(&self) -> BridgeResult<&HashMap<String, ScriptValue>> {
        match self {
            ScriptValue::Object(fields) => Ok(fields),
            other => Err(other.mismatch(ValueType::Object)),
        }
    }

    /// Get as function reference
    pub fn as_function(&self) -> BridgeResult<&ScriptFunction> {
        match self {
            ScriptValue::Function(f) => Ok(f),
            other => Err(other.mismatch(ValueType::Function)),
        }
    }

    /// Get as custom handle. The handle shares the payload, it is not a copy.
    pub fn as_handle(&self) -> BridgeResult<&Handle> {
        match self {
            ScriptValue::Custom(h) => Ok(h),
            other => Err(other.mismatch(ValueType::Custom)),
        }
    }

    // ------------------------------------------------------------------------
    // Native form
    // ------------------------------------------------------------------------

    /// Lower plain data into `serde_json::Value`.
    ///
    /// Functions and custom handles have no data form and yield a type
    /// mismatch; use `as_handle` to reach a payload. Non-finite numbers
    /// lower to JSON null.
    pub fn to_native(&self) -> BridgeResult<serde_json::Value> {
        use serde_json::Value;

        Ok(match self {
            ScriptValue::Nil => Value::Null,
            ScriptValue::Bool(b) => Value::Bool(*b),
            ScriptValue::Number(n) => number_to_json(*n),
            ScriptValue::String(s) => Value::String(s.clone()),
            ScriptValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(ScriptValue::to_native)
                    .collect::<BridgeResult<Vec<_>>>()?,
            ),
            ScriptValue::Object(fields) => {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (key, value) in fields {
                    map.insert(key.clone(), value.to_native()?);
                }
                Value::Object(map)
            }
            ScriptValue::Function(_) | ScriptValue::Custom(_) => {
                return Err(BridgeError::TypeMismatch {
                    expected: "plain data".to_string(),
                    got: self.type_name(),
                })
            }
        })
    }

    /// Like `to_native`, but renders functions and handles as descriptive
    /// strings instead of failing. Used for logs and event payloads.
    pub fn to_native_lossy(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            ScriptValue::Array(items) => {
                Value::Array(items.iter().map(ScriptValue::to_native_lossy).collect())
            }
            ScriptValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_native_lossy()))
                    .collect(),
            ),
            ScriptValue::Function(_) => Value::String("<function>".to_string()),
            ScriptValue::Custom(h) => Value::String(format!("<{}>", h.tag())),
            ScriptValue::Nil => Value::Null,
            ScriptValue::Bool(b) => Value::Bool(*b),
            ScriptValue::Number(n) => number_to_json(*n),
            ScriptValue::String(s) => Value::String(s.clone()),
        }
    }

    /// Raise a `serde_json::Value` into a script value
    pub fn from_native(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => ScriptValue::Nil,
            Value::Bool(b) => ScriptValue::Bool(*b),
            Value::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => ScriptValue::String(s.clone()),
            Value::Array(items) => {
                ScriptValue::Array(items.iter().map(ScriptValue::from_native).collect())
            }
            Value::Object(map) => ScriptValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), ScriptValue::from_native(v)))
                    .collect(),
            ),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_native_lossy()),
        }
    }
}

// ============================================================================
// Literal conversions
// ============================================================================

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        ScriptValue::Number(n)
    }
}

impl From<i64> for ScriptValue {
    fn from(n: i64) -> Self {
        ScriptValue::Number(n as f64)
    }
}

impl From<usize> for ScriptValue {
    fn from(n: usize) -> Self {
        ScriptValue::Number(n as f64)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::String(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::String(s)
    }
}

impl From<Vec<ScriptValue>> for ScriptValue {
    fn from(items: Vec<ScriptValue>) -> Self {
        ScriptValue::Array(items)
    }
}

impl From<HashMap<String, ScriptValue>> for ScriptValue {
    fn from(fields: HashMap<String, ScriptValue>) -> Self {
        ScriptValue::Object(fields)
    }
}

impl From<Handle> for ScriptValue {
    fn from(h: Handle) -> Self {
        ScriptValue::Custom(h)
    }
}

impl From<ScriptFunction> for ScriptValue {
    fn from(f: ScriptFunction) -> Self {
        ScriptValue::Function(f)
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(ScriptValue::Nil)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> Vec<ScriptValue> {
        vec![
            ScriptValue::nil(),
            ScriptValue::bool(true),
            ScriptValue::number(42.5),
            ScriptValue::string("hello"),
            ScriptValue::array(vec![ScriptValue::number(1.0), ScriptValue::nil()]),
            ScriptValue::from_pairs([("k", ScriptValue::bool(false))]),
            ScriptValue::function(|_| Ok(ScriptValue::Nil)),
            ScriptValue::custom("thing", 7u32),
        ]
    }

    #[test]
    fn test_round_trip_plain_data() {
        let value = ScriptValue::from_pairs([
            ("name", ScriptValue::string("bridge")),
            ("count", ScriptValue::number(3.0)),
            ("ratio", ScriptValue::number(0.25)),
            ("on", ScriptValue::bool(true)),
            ("none", ScriptValue::nil()),
            (
                "nested",
                ScriptValue::array(vec![
                    ScriptValue::string("a"),
                    ScriptValue::from_pairs([("deep", ScriptValue::number(-1.5))]),
                    ScriptValue::array(vec![]),
                ]),
            ),
        ]);

        let native = value.to_native().unwrap();
        assert_eq!(ScriptValue::from_native(&native), value);
    }

    #[test]
    fn test_round_trip_each_plain_variant() {
        for value in sample_values().into_iter().take(6) {
            let native = value.to_native().unwrap();
            assert_eq!(ScriptValue::from_native(&native), value, "{:?}", value);
        }
    }

    #[test]
    fn test_opaque_values_have_no_data_form() {
        let f = ScriptValue::function(|_| Ok(ScriptValue::Nil));
        assert!(matches!(f.to_native(), Err(BridgeError::TypeMismatch { .. })));

        let c = ScriptValue::custom("thing", 1u8);
        let err = c.to_native().unwrap_err();
        assert_eq!(
            err,
            BridgeError::TypeMismatch {
                expected: "plain data".into(),
                got: "custom<thing>".into()
            }
        );

        let nested = ScriptValue::array(vec![c]);
        assert!(nested.to_native().is_err());
        assert_eq!(nested.to_native_lossy(), serde_json::json!(["<thing>"]));
    }

    #[test]
    fn test_accessors_never_panic_on_wrong_variant() {
        for value in sample_values() {
            let vt = value.value_type();
            assert_eq!(value.as_bool().is_ok(), vt == ValueType::Bool);
            assert_eq!(value.as_number().is_ok(), vt == ValueType::Number);
            assert_eq!(value.as_str().is_ok(), vt == ValueType::String);
            assert_eq!(value.as_array().is_ok(), vt == ValueType::Array);
            assert_eq!(value.as_object().is_ok(), vt == ValueType::Object);
            assert_eq!(value.as_function().is_ok(), vt == ValueType::Function);
            assert_eq!(value.as_handle().is_ok(), vt == ValueType::Custom);
        }
    }

    #[test]
    fn test_mismatch_reports_expected_and_actual() {
        let err = ScriptValue::number(1.0).as_str().unwrap_err();
        assert_eq!(
            err,
            BridgeError::TypeMismatch {
                expected: "string".into(),
                got: "number".into()
            }
        );
    }

    #[test]
    fn test_handle_downcast() {
        let value = ScriptValue::custom("counter", 5u64);
        let handle = value.as_handle().unwrap();
        assert_eq!(handle.tag(), "counter");
        assert!(handle.is::<u64>());
        assert_eq!(*handle.downcast_ref::<u64>().unwrap(), 5);
        assert_eq!(*handle.downcast::<u64>().unwrap(), 5);

        let err = handle.downcast_ref::<String>().unwrap_err();
        match err {
            BridgeError::DowncastFailure { tag, expected, actual } => {
                assert_eq!(tag, "counter");
                assert!(expected.contains("String"));
                assert_eq!(actual, "u64");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_handle_clone_shares_payload() {
        let shared = Arc::new(parking_lot::Mutex::new(Vec::<u32>::new()));
        let value = ScriptValue::Custom(Handle::from_arc("list", Arc::clone(&shared)));
        let copy = value.clone();
        assert_eq!(value, copy);

        copy.as_handle()
            .unwrap()
            .downcast::<parking_lot::Mutex<Vec<u32>>>()
            .unwrap()
            .lock()
            .push(9);
        assert_eq!(shared.lock().as_slice(), &[9]);

        let other = ScriptValue::custom("list", parking_lot::Mutex::new(Vec::<u32>::new()));
        assert_ne!(value, other);
    }

    #[test]
    fn test_function_call_and_identity() {
        let f = ScriptFunction::new(|args| Ok(ScriptValue::number(args.len() as f64)));
        let g = f.clone();
        assert!(f.ptr_eq(&g));
        assert_eq!(
            f.call(&[ScriptValue::nil(), ScriptValue::nil()]).unwrap(),
            ScriptValue::number(2.0)
        );
        assert_ne!(f, ScriptFunction::new(|_| Ok(ScriptValue::Nil)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!ScriptValue::nil().is_truthy());
        assert!(!ScriptValue::number(0.0).is_truthy());
        assert!(!ScriptValue::string("").is_truthy());
        assert!(ScriptValue::string("x").is_truthy());
        assert!(ScriptValue::custom("x", ()).is_truthy());
    }

    #[test]
    fn test_non_finite_numbers_lower_to_null() {
        assert_eq!(
            ScriptValue::number(f64::NAN).to_native().unwrap(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn test_value_type_names() {
        assert_eq!(ValueType::from_name("boolean"), Some(ValueType::Bool));
        assert_eq!(ValueType::from_name("error"), None);
        assert_eq!(ScriptValue::custom("error", ()).type_name(), "custom<error>");
    }
}
