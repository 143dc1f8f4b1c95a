//! Tool discovery: importing a remote catalogue into the registry.
//!
//! Each remote tool is registered under the namespaced name
//! `mcp:<server>:<tool>`. The registered handler routes back through
//! the connection pool at call time, so an evicted-and-reconnected
//! client is picked up transparently.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::BridgeError;
use crate::client::pool::ConnectionPool;
use crate::client::ClientError;
use crate::protocol::{ToolCallResult, ToolContent};
use crate::registry::{Tool, ToolError, ToolHandler, ToolRegistry, REMOTE_TOOL_PREFIX};

/// Builds the namespaced registry name for a remote tool.
#[must_use]
pub fn remote_tool_name(server_id: &str, tool: &str) -> String {
    format!("{REMOTE_TOOL_PREFIX}{server_id}:{tool}")
}

/// Splits a namespaced remote tool name into `(server_id, tool)`.
///
/// Returns `None` for names outside the `mcp:` namespace or without
/// both parts. Colons beyond the second separator belong to the remote
/// tool name.
#[must_use]
pub fn parse_remote_tool_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix(REMOTE_TOOL_PREFIX)?;
    let (server_id, tool) = rest.split_once(':')?;
    if server_id.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server_id, tool))
}

/// Collapses a tool call result for bridge callers.
///
/// A result consisting of exactly one text block becomes a bare JSON
/// string; anything else is returned as the raw content array.
#[must_use]
pub fn unwrap_tool_result(result: &ToolCallResult) -> Value {
    match result.content.as_slice() {
        [ToolContent::Text { text }] => Value::String(text.clone()),
        content => serde_json::to_value(content).unwrap_or(Value::Null),
    }
}

/// Imports one server's catalogue into the registry.
pub struct Discovery {
    server_id: String,
    registry: Arc<ToolRegistry>,
    pool: Arc<ConnectionPool>,
}

impl Discovery {
    /// Creates a discovery bound to one server id.
    #[must_use]
    pub fn new(
        server_id: impl Into<String>,
        registry: Arc<ToolRegistry>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            registry,
            pool,
        }
    }

    /// Fetches the server's catalogue and registers every tool under
    /// the `mcp:<server>:` namespace, overwriting prior entries.
    ///
    /// Individual registration failures are logged and skipped; the
    /// count of successful registrations is returned.
    ///
    /// # Errors
    ///
    /// Fails when the client cannot be obtained or `tools/list` fails.
    pub async fn discover_and_register(&self) -> Result<usize, BridgeError> {
        let client = self.pool.get_client(&self.server_id).await?;
        if !client.is_connected() {
            return Err(BridgeError::NotConnected {
                id: self.server_id.clone(),
            });
        }

        let definitions = client.list_tools().await?;
        let mut registered = 0;

        for definition in definitions {
            let handler = remote_handler(
                Arc::clone(&self.pool),
                self.server_id.clone(),
                definition.name.clone(),
            );
            let tool = Tool::remote(
                remote_tool_name(&self.server_id, &definition.name),
                definition.description.unwrap_or_default(),
                self.server_id.clone(),
                definition.input_schema,
                handler,
            );

            match self.registry.register(tool) {
                Ok(()) => registered += 1,
                Err(e) => {
                    warn!(server = %self.server_id, tool = %definition.name, error = %e, "skipping remote tool");
                }
            }
        }

        debug!(server = %self.server_id, registered, "imported remote tool catalogue");
        Ok(registered)
    }

    /// Drops every tool in this server's namespace and re-discovers.
    ///
    /// # Errors
    ///
    /// See [`Discovery::discover_and_register`].
    pub async fn refresh(&self) -> Result<usize, BridgeError> {
        let prefix = remote_tool_name(&self.server_id, "");
        let removed = self.registry.unregister_by_prefix(&prefix);
        debug!(server = %self.server_id, removed, "dropped stale remote tools");
        self.discover_and_register().await
    }
}

/// Handler for an imported tool: pool lookup, remote call, unwrap.
fn remote_handler(pool: Arc<ConnectionPool>, server_id: String, tool: String) -> ToolHandler {
    Arc::new(move |arguments: Value| {
        let pool = Arc::clone(&pool);
        let server_id = server_id.clone();
        let tool = tool.clone();
        Box::pin(async move {
            let client = pool
                .get_client(&server_id)
                .await
                .map_err(|e| ToolError::new(e.to_string()))?;
            match client.call_tool(&tool, arguments).await {
                Ok(result) => Ok(unwrap_tool_result(&result)),
                Err(ClientError::ToolFailed { message, .. }) => Err(ToolError::new(message)),
                Err(e) => Err(ToolError::new(e.to_string())),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_names_round_trip() {
        let name = remote_tool_name("server1", "echo");
        assert_eq!(name, "mcp:server1:echo");
        assert_eq!(parse_remote_tool_name(&name), Some(("server1", "echo")));
    }

    #[test]
    fn extra_colons_belong_to_the_tool() {
        assert_eq!(
            parse_remote_tool_name("mcp:s1:a:b"),
            Some(("s1", "a:b"))
        );
    }

    #[test]
    fn non_namespaced_names_are_rejected() {
        assert_eq!(parse_remote_tool_name("mcp:s1"), None);
        assert_eq!(parse_remote_tool_name("local"), None);
        assert_eq!(parse_remote_tool_name("mcp::tool"), None);
        assert_eq!(parse_remote_tool_name("mcp:s1:"), None);
    }

    #[test]
    fn single_text_results_unwrap_to_a_string() {
        let result = ToolCallResult::text("payload");
        assert_eq!(unwrap_tool_result(&result), json!("payload"));
    }

    #[test]
    fn multi_block_results_stay_raw() {
        let result = ToolCallResult {
            content: vec![
                ToolContent::Text {
                    text: "first".to_string(),
                },
                ToolContent::Text {
                    text: "second".to_string(),
                },
            ],
            is_error: false,
        };
        let raw = unwrap_tool_result(&result);
        assert!(raw.is_array());
        assert_eq!(raw.as_array().unwrap().len(), 2);
    }
}
