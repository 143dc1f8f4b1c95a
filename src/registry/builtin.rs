//! Built-in local tools.
//!
//! The platform always ships with a small local catalogue so a freshly
//! started server answers `tools/list` with something useful before any
//! remote server is bridged in. `echo` and `add` also serve as the
//! fixtures for connectivity smoke tests.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{RegistryError, Tool, ToolError, ToolHandler, ToolRegistry};

/// Registers the built-in tools (`echo`, `add`).
///
/// # Errors
///
/// Propagates registration failures (none are expected for the fixed
/// built-in names).
pub fn register_builtin_tools(registry: &ToolRegistry) -> Result<(), RegistryError> {
    registry.register(echo_tool())?;
    registry.register(add_tool())?;
    Ok(())
}

/// `echo` returns its `message` argument wrapped in an object.
fn echo_tool() -> Tool {
    let handler: ToolHandler = Arc::new(|args: Value| {
        Box::pin(async move {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::new("missing required 'message' argument"))?;
            Ok(json!({ "echoed": message }))
        })
    });

    Tool::local(
        "echo",
        "Echoes the supplied message back to the caller",
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        }),
        handler,
    )
}

/// `add` sums two numeric arguments.
fn add_tool() -> Tool {
    let handler: ToolHandler = Arc::new(|args: Value| {
        Box::pin(async move {
            let (Some(a), Some(b)) = (
                args.get("a").and_then(Value::as_f64),
                args.get("b").and_then(Value::as_f64),
            ) else {
                return Err(ToolError::new("both arguments must be numbers"));
            };

            let sum = a + b;
            // Integral sums are reported as integers, not "100.0".
            #[allow(clippy::cast_possible_truncation)]
            if sum.fract() == 0.0 && sum.abs() < 9_007_199_254_740_992.0 {
                Ok(json!({ "result": sum as i64 }))
            } else {
                Ok(json!({ "result": sum }))
            }
        })
    });

    Tool::local(
        "add",
        "Adds two numbers",
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number"},
                "b": {"type": "number"}
            },
            "required": ["a", "b"]
        }),
        handler,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_wraps_the_message() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).unwrap();

        let result = registry
            .execute("echo", json!({"message": "Hello, MCP!"}))
            .await
            .unwrap();
        assert_eq!(serde_json::to_string(&result).unwrap(), r#"{"echoed":"Hello, MCP!"}"#);
    }

    #[tokio::test]
    async fn echo_requires_a_message() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).unwrap();

        assert!(registry.execute("echo", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn add_reports_integral_sums_as_integers() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).unwrap();

        let result = registry
            .execute("add", json!({"a": 42.0, "b": 58.0}))
            .await
            .unwrap();
        assert_eq!(serde_json::to_string(&result).unwrap(), r#"{"result":100}"#);
    }

    #[tokio::test]
    async fn add_keeps_fractional_sums() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).unwrap();

        let result = registry
            .execute("add", json!({"a": 1.5, "b": 1.0}))
            .await
            .unwrap();
        assert_eq!(result["result"], json!(2.5));
    }

    #[tokio::test]
    async fn add_rejects_non_numeric_arguments() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).unwrap();

        let err = registry
            .execute("add", json!({"a": "x", "b": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "both arguments must be numbers");
    }
}
