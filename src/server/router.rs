//! Method routing for the serving side.
//!
//! A [`Router`] maps JSON-RPC method names to async handlers. The
//! default table wires the standard MCP methods against the local tool
//! registry; additional handlers (the reserved `resources/*` and
//! `prompts/*` methods, say) can be registered without protocol
//! changes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::protocol::{
    InitializeParams, InitializeResult, ServerCapabilities, ServerInfo, ToolCallParams,
    ToolCallResult, ToolDefinition, MCP_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_PING,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::registry::{Tool, ToolRegistry, ToolSource};

/// Failure returned by a method handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The request params could not be decoded.
    #[error("invalid params: {message}")]
    InvalidParams {
        /// What was wrong with the params.
        message: String,
    },

    /// The handler failed internally.
    #[error("{message}")]
    Internal {
        /// The failure description.
        message: String,
    },
}

impl HandlerError {
    /// Creates an invalid-params failure.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Creates an internal failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Boxed async method handler: optional params in, JSON result out.
pub type MethodHandler = Arc<
    dyn Fn(Option<Value>) -> Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>
        + Send
        + Sync,
>;

/// Map from method name to handler.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, MethodHandler>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router with the standard MCP method table bound to
    /// `registry`.
    #[must_use]
    pub fn with_defaults(
        registry: Arc<ToolRegistry>,
        server_info: ServerInfo,
        capabilities: ServerCapabilities,
    ) -> Self {
        let mut router = Self::new();

        router.register(METHOD_INITIALIZE, initialize_handler(server_info, capabilities));
        router.register(METHOD_TOOLS_LIST, tools_list_handler(Arc::clone(&registry)));
        router.register(METHOD_TOOLS_CALL, tools_call_handler(registry));
        router.register(METHOD_PING, ping_handler());

        router
    }

    /// Registers a handler, replacing any prior one for the method.
    pub fn register(&mut self, method: impl Into<String>, handler: MethodHandler) {
        self.handlers.insert(method.into(), handler);
    }

    /// Looks a handler up by method name.
    #[must_use]
    pub fn handler(&self, method: &str) -> Option<MethodHandler> {
        self.handlers.get(method).cloned()
    }

    /// The registered method names, unordered.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.methods())
            .finish()
    }
}

/// `initialize`: always answers with our protocol version.
///
/// A client requesting a different version is accepted; the mismatch is
/// only logged.
fn initialize_handler(server_info: ServerInfo, capabilities: ServerCapabilities) -> MethodHandler {
    Arc::new(move |params: Option<Value>| {
        let server_info = server_info.clone();
        let capabilities = capabilities.clone();
        Box::pin(async move {
            if let Some(params) = params {
                let params: InitializeParams = serde_json::from_value(params)
                    .map_err(|e| HandlerError::invalid_params(e.to_string()))?;
                if params.protocol_version != MCP_PROTOCOL_VERSION {
                    debug!(
                        ours = MCP_PROTOCOL_VERSION,
                        theirs = %params.protocol_version,
                        client = %params.client_info.name,
                        "client requested a different protocol version"
                    );
                }
            }

            let result = InitializeResult {
                protocol_version: MCP_PROTOCOL_VERSION.to_string(),
                capabilities,
                server_info,
            };
            serde_json::to_value(result).map_err(|e| HandlerError::internal(e.to_string()))
        })
    })
}

/// `tools/list`: the local half of the registry, as wire definitions.
fn tools_list_handler(registry: Arc<ToolRegistry>) -> MethodHandler {
    Arc::new(move |_params| {
        let registry = Arc::clone(&registry);
        Box::pin(async move {
            let tools: Vec<ToolDefinition> = registry
                .list_by_source(ToolSource::Local)
                .iter()
                .map(Tool::definition)
                .collect();
            Ok(json!({ "tools": tools }))
        })
    })
}

/// `tools/call`: executes a registry tool.
///
/// Tool failures travel inside the result (`isError = true`); the outer
/// response is still a success. Only undecodable params are protocol
/// errors.
fn tools_call_handler(registry: Arc<ToolRegistry>) -> MethodHandler {
    Arc::new(move |params: Option<Value>| {
        let registry = Arc::clone(&registry);
        Box::pin(async move {
            let params = params.ok_or_else(|| HandlerError::invalid_params("missing params"))?;
            let call: ToolCallParams = serde_json::from_value(params)
                .map_err(|e| HandlerError::invalid_params(e.to_string()))?;

            let result = match registry.execute(&call.name, call.arguments).await {
                Ok(value) => ToolCallResult::text(render_tool_output(&value)),
                Err(e) => ToolCallResult::error(e.to_string()),
            };
            serde_json::to_value(result).map_err(|e| HandlerError::internal(e.to_string()))
        })
    })
}

/// `ping`: an empty object.
fn ping_handler() -> MethodHandler {
    Arc::new(|_params| Box::pin(async { Ok(json!({})) }))
}

/// Renders a tool's JSON output as text content.
///
/// Bare strings pass through unquoted; everything else is compact JSON.
fn render_tool_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
