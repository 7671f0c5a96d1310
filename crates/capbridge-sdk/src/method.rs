//! Method descriptor tables
//!
//! `MethodInfo` is metadata only: it never executes. Dispatchers consult it
//! to check argument counts and declared primitive types before calling a
//! bridge, and documentation tooling renders it as help text. Bridges still
//! perform their own, more specific validation.

use std::fmt::Write as _;

use crate::error::{BridgeError, BridgeResult};
use crate::value::{ScriptValue, ValueType};

/// Descriptor of one positional parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    /// Parameter name
    pub name: String,
    /// Declared type tag (`string`, `number`, `object`, `any`, or a handle tag)
    pub type_name: String,
    /// Whether the caller must supply it
    pub required: bool,
    /// Default used when omitted, for documentation
    pub default: Option<ScriptValue>,
    /// Human description
    pub description: String,
}

/// Descriptor of one bridge method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    /// Method name, unique within a bridge
    pub name: String,
    /// Human description
    pub description: String,
    /// Ordered parameters; required ones come first
    pub parameters: Vec<ParameterInfo>,
    /// Declared return type tag
    pub return_type: String,
    /// Usage examples
    pub examples: Vec<String>,
}

impl MethodInfo {
    /// Start a descriptor with no parameters returning `void`
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            return_type: "void".to_string(),
            examples: Vec::new(),
        }
    }

    /// Add a required parameter
    pub fn param(mut self, name: &str, type_name: &str, description: &str) -> Self {
        self.parameters.push(ParameterInfo {
            name: name.to_string(),
            type_name: type_name.to_string(),
            required: true,
            default: None,
            description: description.to_string(),
        });
        self
    }

    /// Add an optional parameter
    pub fn optional(mut self, name: &str, type_name: &str, description: &str) -> Self {
        self.parameters.push(ParameterInfo {
            name: name.to_string(),
            type_name: type_name.to_string(),
            required: false,
            default: None,
            description: description.to_string(),
        });
        self
    }

    /// Add an optional parameter with a documented default
    pub fn optional_with_default(
        mut self,
        name: &str,
        type_name: &str,
        default: ScriptValue,
        description: &str,
    ) -> Self {
        self.parameters.push(ParameterInfo {
            name: name.to_string(),
            type_name: type_name.to_string(),
            required: false,
            default: Some(default),
            description: description.to_string(),
        });
        self
    }

    /// Set the return type tag
    pub fn returns(mut self, type_name: &str) -> Self {
        self.return_type = type_name.to_string();
        self
    }

    /// Add a usage example
    pub fn example(mut self, example: &str) -> Self {
        self.examples.push(example.to_string());
        self
    }

    /// Number of required parameters
    pub fn required_count(&self) -> usize {
        self.parameters.iter().filter(|p| p.required).count()
    }

    /// Check `args` against this descriptor.
    ///
    /// Verifies the required count, then the variant of every supplied
    /// argument whose declared type is a value variant. Nil is accepted for
    /// optional parameters. Other declared types are not checked.
    pub fn validate(&self, args: &[ScriptValue]) -> BridgeResult<()> {
        let required = self.required_count();
        if args.len() < required {
            return Err(BridgeError::ArgumentCount {
                method: self.name.clone(),
                required,
                got: args.len(),
            });
        }

        for (index, (param, arg)) in self.parameters.iter().zip(args).enumerate() {
            let Some(expected) = ValueType::from_name(&param.type_name) else {
                continue;
            };
            if arg.is_nil() && !param.required {
                continue;
            }
            if arg.value_type() != expected {
                return Err(BridgeError::invalid_argument(
                    &self.name,
                    index,
                    &param.name,
                    expected.as_str(),
                    arg.type_name(),
                ));
            }
        }
        Ok(())
    }

    /// Call signature, e.g. `createError(message: string, context?: object): error`
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.type_name)
            })
            .collect();
        format!("{}({}): {}", self.name, params.join(", "), self.return_type)
    }

    /// Multi-line help text
    pub fn render_help(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.signature());
        if !self.description.is_empty() {
            let _ = writeln!(out, "    {}", self.description);
        }
        for p in &self.parameters {
            let _ = write!(out, "    - {} ({})", p.name, p.type_name);
            if !p.required {
                out.push_str(" optional");
            }
            if let Some(default) = &p.default {
                let _ = write!(out, ", default {}", default.to_native_lossy());
            }
            if !p.description.is_empty() {
                let _ = write!(out, ": {}", p.description);
            }
            out.push('\n');
        }
        for example in &self.examples {
            let _ = writeln!(out, "    e.g. {}", example);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_error() -> MethodInfo {
        MethodInfo::new("createError", "Create a new error")
            .param("message", "string", "Error message")
            .optional("context", "object", "Context map")
            .returns("error")
    }

    #[test]
    fn test_required_count() {
        assert_eq!(create_error().required_count(), 1);
    }

    #[test]
    fn test_validate_count() {
        let err = create_error().validate(&[]).unwrap_err();
        assert_eq!(
            err,
            BridgeError::ArgumentCount {
                method: "createError".into(),
                required: 1,
                got: 0
            }
        );
    }

    #[test]
    fn test_validate_types() {
        let m = create_error();
        assert!(m.validate(&[ScriptValue::string("x")]).is_ok());
        assert!(m
            .validate(&[ScriptValue::string("x"), ScriptValue::nil()])
            .is_ok());

        let err = m.validate(&[ScriptValue::number(1.0)]).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidArgument { index: 0, ref name, .. } if name == "message"
        ));

        let err = m
            .validate(&[ScriptValue::string("x"), ScriptValue::bool(true)])
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument { index: 1, .. }));
    }

    #[test]
    fn test_handle_types_are_advisory() {
        let m = MethodInfo::new("wrapError", "")
            .param("error", "error", "")
            .param("message", "string", "");
        assert!(m
            .validate(&[ScriptValue::number(1.0), ScriptValue::string("m")])
            .is_ok());
    }

    #[test]
    fn test_signature_and_help() {
        let m = create_error().example("createError(\"boom\")");
        assert_eq!(
            m.signature(),
            "createError(message: string, context?: object): error"
        );
        let help = m.render_help();
        assert!(help.contains("Create a new error"));
        assert!(help.contains("- context (object) optional: Context map"));
        assert!(help.contains("e.g. createError(\"boom\")"));
    }

    #[test]
    fn test_default_is_rendered() {
        let m = MethodInfo::new("cacheCredentials", "").optional_with_default(
            "ttl",
            "number",
            ScriptValue::number(3600.0),
            "Seconds",
        );
        assert!(m.render_help().contains("default 3600.0"));
    }
}
