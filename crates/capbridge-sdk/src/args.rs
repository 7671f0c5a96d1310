//! Positional argument reader
//!
//! Wraps a method's `&[ScriptValue]` and converts each position to the
//! native shape an implementation needs. Every failure names the method,
//! argument index and parameter name.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult};
use crate::value::{Handle, ScriptFunction, ScriptValue};

/// Typed access to positional arguments of one method call.
pub struct Args<'a> {
    method: &'a str,
    values: &'a [ScriptValue],
}

impl<'a> Args<'a> {
    /// Wrap the arguments of `method`
    pub fn new(method: &'a str, values: &'a [ScriptValue]) -> Self {
        Self { method, values }
    }

    /// Number of supplied arguments
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if no arguments were supplied
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fail unless at least `required` arguments were supplied
    pub fn require(&self, required: usize) -> BridgeResult<()> {
        if self.values.len() < required {
            return Err(BridgeError::ArgumentCount {
                method: self.method.to_string(),
                required,
                got: self.values.len(),
            });
        }
        Ok(())
    }

    /// Argument error naming this call
    pub fn invalid(&self, index: usize, name: &str, expected: &str, actual: impl Into<String>) -> BridgeError {
        BridgeError::invalid_argument(self.method, index, name, expected, actual)
    }

    fn slot(&self, index: usize) -> Option<&'a ScriptValue> {
        match self.values.get(index) {
            Some(ScriptValue::Nil) | None => None,
            Some(v) => Some(v),
        }
    }

    fn required_slot(&self, index: usize, name: &str, expected: &str) -> BridgeResult<&'a ScriptValue> {
        match self.values.get(index) {
            Some(v) => Ok(v),
            None => Err(self.invalid(index, name, expected, "missing")),
        }
    }

    fn convert<T>(
        &self,
        index: usize,
        name: &str,
        expected: &str,
        value: &'a ScriptValue,
        f: impl FnOnce(&'a ScriptValue) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        f(value).map_err(|e| match e {
            BridgeError::TypeMismatch { got, .. } => self.invalid(index, name, expected, got),
            other => other,
        })
    }

    // ------------------------------------------------------------------------
    // Required arguments
    // ------------------------------------------------------------------------

    /// Any value, including nil
    pub fn any(&self, index: usize, name: &str) -> BridgeResult<&'a ScriptValue> {
        self.required_slot(index, name, "any")
    }

    /// String argument
    pub fn string(&self, index: usize, name: &str) -> BridgeResult<&'a str> {
        let v = self.required_slot(index, name, "string")?;
        self.convert(index, name, "string", v, ScriptValue::as_str)
    }

    /// Number argument
    pub fn number(&self, index: usize, name: &str) -> BridgeResult<f64> {
        let v = self.required_slot(index, name, "number")?;
        self.convert(index, name, "number", v, ScriptValue::as_number)
    }

    /// Non-negative integral number argument
    pub fn integer(&self, index: usize, name: &str) -> BridgeResult<u64> {
        let n = self.number(index, name)?;
        to_integer(n).ok_or_else(|| self.invalid(index, name, "non-negative integer", n.to_string()))
    }

    /// Bool argument
    pub fn bool(&self, index: usize, name: &str) -> BridgeResult<bool> {
        let v = self.required_slot(index, name, "bool")?;
        self.convert(index, name, "bool", v, ScriptValue::as_bool)
    }

    /// Array argument
    pub fn array(&self, index: usize, name: &str) -> BridgeResult<&'a [ScriptValue]> {
        let v = self.required_slot(index, name, "array")?;
        self.convert(index, name, "array", v, ScriptValue::as_array)
    }

    /// Object argument
    pub fn object(&self, index: usize, name: &str) -> BridgeResult<&'a HashMap<String, ScriptValue>> {
        let v = self.required_slot(index, name, "object")?;
        self.convert(index, name, "object", v, ScriptValue::as_object)
    }

    /// Function argument
    pub fn function(&self, index: usize, name: &str) -> BridgeResult<&'a ScriptFunction> {
        let v = self.required_slot(index, name, "function")?;
        self.convert(index, name, "function", v, ScriptValue::as_function)
    }

    /// Custom handle argument
    pub fn handle(&self, index: usize, name: &str) -> BridgeResult<&'a Handle> {
        let v = self.required_slot(index, name, "custom")?;
        self.convert(index, name, "custom", v, ScriptValue::as_handle)
    }

    /// Custom handle argument downcast to `T`.
    ///
    /// A payload of the wrong type is an `InvalidArgument` naming `tag` as the
    /// expected shape. A matching payload under a different tag is accepted
    /// and logged.
    pub fn downcast<T: Any + Send + Sync>(&self, index: usize, name: &str, tag: &str) -> BridgeResult<Arc<T>> {
        let v = self.required_slot(index, name, tag)?;
        let handle = match v {
            ScriptValue::Custom(h) => h,
            other => return Err(self.invalid(index, name, tag, other.type_name())),
        };
        match handle.downcast::<T>() {
            Ok(payload) => {
                if handle.tag() != tag {
                    tracing::warn!(
                        method = self.method,
                        expected_tag = tag,
                        actual_tag = handle.tag(),
                        "handle tag does not match its payload"
                    );
                }
                Ok(payload)
            }
            Err(_) => Err(self.invalid(
                index,
                name,
                tag,
                format!("custom<{}> holding {}", handle.tag(), handle.payload_type()),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Optional arguments: missing or nil is None, any other wrong variant fails
    // ------------------------------------------------------------------------

    /// Optional string argument
    pub fn opt_string(&self, index: usize, name: &str) -> BridgeResult<Option<&'a str>> {
        self.slot(index)
            .map(|v| self.convert(index, name, "string", v, ScriptValue::as_str))
            .transpose()
    }

    /// Optional number argument
    pub fn opt_number(&self, index: usize, name: &str) -> BridgeResult<Option<f64>> {
        self.slot(index)
            .map(|v| self.convert(index, name, "number", v, ScriptValue::as_number))
            .transpose()
    }

    /// Optional non-negative integer argument
    pub fn opt_integer(&self, index: usize, name: &str) -> BridgeResult<Option<u64>> {
        match self.opt_number(index, name)? {
            Some(n) => to_integer(n)
                .map(Some)
                .ok_or_else(|| self.invalid(index, name, "non-negative integer", n.to_string())),
            None => Ok(None),
        }
    }

    /// Optional object argument
    pub fn opt_object(&self, index: usize, name: &str) -> BridgeResult<Option<&'a HashMap<String, ScriptValue>>> {
        self.slot(index)
            .map(|v| self.convert(index, name, "object", v, ScriptValue::as_object))
            .transpose()
    }

    /// Optional value of any variant
    pub fn opt_any(&self, index: usize) -> Option<&'a ScriptValue> {
        self.slot(index)
    }
}

fn to_integer(n: f64) -> Option<u64> {
    if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= u64::MAX as f64 {
        Some(n as u64)
    } else {
        None
    }
}

/// String field of an object, if present and a string
pub fn field_str<'a>(fields: &'a HashMap<String, ScriptValue>, key: &str) -> Option<&'a str> {
    match fields.get(key) {
        Some(ScriptValue::String(s)) => Some(s),
        _ => None,
    }
}

/// Number field of an object, if present and a number
pub fn field_number(fields: &HashMap<String, ScriptValue>, key: &str) -> Option<f64> {
    match fields.get(key) {
        Some(ScriptValue::Number(n)) => Some(*n),
        _ => None,
    }
}

/// Bool field of an object, if present and a bool
pub fn field_bool(fields: &HashMap<String, ScriptValue>, key: &str) -> Option<bool> {
    match fields.get(key) {
        Some(ScriptValue::Bool(b)) => Some(*b),
        _ => None,
    }
}
