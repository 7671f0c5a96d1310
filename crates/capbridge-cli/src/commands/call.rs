//! `capbridge call`: invoke one method and print the result as JSON.

use capbridge_sdk::{BridgeRegistry, CallContext, ScriptValue};

use crate::output::StyledOutput;

/// Parse a command-line argument as JSON; anything that is not valid JSON
/// is taken as a string.
pub fn parse_arg(raw: &str) -> ScriptValue {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => ScriptValue::from_native(&value),
        Err(_) => ScriptValue::string(raw),
    }
}

pub fn execute(
    registry: &BridgeRegistry,
    bridge: &str,
    method: &str,
    raw_args: &[String],
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let args: Vec<ScriptValue> = raw_args.iter().map(|a| parse_arg(a)).collect();
    let ctx = CallContext::background();

    registry.initialize_all(&ctx)?;
    let result = registry.call(&ctx, bridge, method, &args);
    registry.cleanup_all(&ctx)?;

    match result {
        Ok(value) => {
            let rendered = serde_json::to_string_pretty(&value.to_native_lossy())?;
            out.plain(&rendered);
            out.newline();
            out.flush();
            Ok(())
        }
        Err(e) => {
            tracing::debug!(bridge, method, error = ?e, "call failed");
            out.stderr_error(e.kind().as_str(), &e.to_string());
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_args() {
        assert_eq!(parse_arg("3"), ScriptValue::number(3.0));
        assert_eq!(parse_arg("true"), ScriptValue::bool(true));
        assert_eq!(parse_arg("\"quoted\""), ScriptValue::string("quoted"));
        assert_eq!(parse_arg("{\"a\": [1]}").get("a"), Some(&ScriptValue::array(vec![ScriptValue::number(1.0)])));
    }

    #[test]
    fn test_bare_words_are_strings() {
        assert_eq!(parse_arg("hello"), ScriptValue::string("hello"));
        assert_eq!(parse_arg("/api/v1"), ScriptValue::string("/api/v1"));
        assert_eq!(parse_arg("{broken"), ScriptValue::string("{broken"));
    }
}
