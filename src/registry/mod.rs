//! Process-local tool registry.
//!
//! The registry is the unified catalogue the platform serves and calls
//! against: local tools registered by the host, and remote tools the
//! bridge imports under the reserved `mcp:` namespace. Entries map a
//! unique name to a [`Tool`] carrying its schema and an async handler.
//!
//! # Name reservation
//!
//! Names starting with `mcp:` are reserved for bridge-registered remote
//! tools (`mcp:<server>:<tool>`). Registering a local tool with such a
//! name is rejected; this prefix is the only collision guard between
//! the two sources.

pub mod builtin;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::protocol::ToolDefinition;

/// Name prefix reserved for bridge-imported remote tools.
pub const REMOTE_TOOL_PREFIX: &str = "mcp:";

/// Failure reported by a tool handler.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable failure description.
    pub message: String,
}

impl ToolError {
    /// Creates a tool error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Boxed async tool handler: arguments in, JSON result out.
pub type ToolHandler = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>> + Send + Sync,
>;

/// Where a tool's implementation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    /// Registered in this process.
    Local,
    /// Imported from a remote MCP server by the bridge.
    Remote,
}

/// One registry entry.
#[derive(Clone)]
pub struct Tool {
    /// Unique name within the registry.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Where the implementation lives.
    pub source: ToolSource,
    /// Owning server id for remote tools.
    pub server_id: Option<String>,
    /// JSON Schema of the tool's input, passed through uncritically.
    pub schema: Value,
    /// The handler. Catalogue-only entries may have none.
    pub handler: Option<ToolHandler>,
}

impl Tool {
    /// Creates a local tool.
    #[must_use]
    pub fn local(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source: ToolSource::Local,
            server_id: None,
            schema,
            handler: Some(handler),
        }
    }

    /// Creates a remote tool owned by `server_id`.
    #[must_use]
    pub fn remote(
        name: impl Into<String>,
        description: impl Into<String>,
        server_id: impl Into<String>,
        schema: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source: ToolSource::Remote,
            server_id: Some(server_id.into()),
            schema,
            handler: Some(handler),
        }
    }

    /// Renders the wire-facing definition of this tool.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: (!self.description.is_empty()).then(|| self.description.clone()),
            input_schema: self.schema.clone(),
        }
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("server_id", &self.server_id)
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Errors raised by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A tool name must be non-empty.
    #[error("tool name cannot be empty")]
    EmptyName,

    /// Local tools must not use the reserved remote prefix.
    #[error("tool name `{name}` uses the reserved `{REMOTE_TOOL_PREFIX}` prefix")]
    ReservedPrefix {
        /// The offending name.
        name: String,
    },

    /// Remote tools must carry their owning server id.
    #[error("remote tool `{name}` has no server id")]
    MissingServerId {
        /// The offending name.
        name: String,
    },

    /// No tool is registered under this name.
    #[error("tool not found: {name}")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// The tool exists but has no handler to invoke.
    #[error("tool `{name}` has no handler")]
    NoHandler {
        /// The requested name.
        name: String,
    },

    /// The tool's handler failed.
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Thread-safe mapping from tool name to [`Tool`].
///
/// All snapshot methods copy under a read lock; `execute` clones the
/// handler and awaits it outside any lock.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Tool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, overwriting any prior entry with the same name.
    ///
    /// # Errors
    ///
    /// Rejects empty names, local names under the reserved `mcp:`
    /// prefix, and remote tools without a server id.
    pub fn register(&self, tool: Tool) -> Result<(), RegistryError> {
        if tool.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        match tool.source {
            ToolSource::Local if tool.name.starts_with(REMOTE_TOOL_PREFIX) => {
                return Err(RegistryError::ReservedPrefix { name: tool.name });
            }
            ToolSource::Remote if tool.server_id.as_deref().map_or(true, str::is_empty) => {
                return Err(RegistryError::MissingServerId { name: tool.name });
            }
            _ => {}
        }

        self.write().insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Removes a tool by name.
    ///
    /// # Errors
    ///
    /// Fails when no tool is registered under `name`.
    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        self.write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    /// Removes every tool whose name starts with `prefix`.
    ///
    /// Returns the number of tools removed.
    pub fn unregister_by_prefix(&self, prefix: &str) -> usize {
        let mut tools = self.write();
        let before = tools.len();
        tools.retain(|name, _| !name.starts_with(prefix));
        before - tools.len()
    }

    /// Looks a tool up by name.
    ///
    /// # Errors
    ///
    /// Fails when no tool is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Tool, RegistryError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    /// Snapshots every registered tool.
    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        self.read().values().cloned().collect()
    }

    /// Snapshots the tools from one source.
    #[must_use]
    pub fn list_by_source(&self, source: ToolSource) -> Vec<Tool> {
        self.read()
            .values()
            .filter(|tool| tool.source == source)
            .cloned()
            .collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Looks a tool up and invokes its handler.
    ///
    /// # Errors
    ///
    /// Fails when the tool is missing, has no handler, or the handler
    /// itself fails (the handler error passes through transparently).
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<Value, RegistryError> {
        let tool = self.get(name)?;
        let handler = tool.handler.ok_or_else(|| RegistryError::NoHandler {
            name: name.to_string(),
        })?;
        Ok(handler(arguments).await?)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Tool>> {
        self.tools.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Tool>> {
        self.tools.write().unwrap_or_else(PoisonError::into_inner)
    }
}
