//! Bridge between remote MCP servers and the local tool registry.
//!
//! The bridge owns a [`ConnectionPool`] keyed by server id and, per
//! server, a [`Discovery`] pass that imports the remote catalogue into
//! the registry under the reserved `mcp:<server>:<tool>` namespace.
//! Once imported, remote tools are indistinguishable from local ones to
//! registry callers: executing one routes back through the pool.

pub mod discovery;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::client::pool::{ConnectionPool, PoolError, PoolStats};
use crate::client::{ClientError, McpClient, ServerConfig};
use crate::registry::{RegistryError, ToolRegistry};
use crate::session::DEFAULT_CALL_TIMEOUT;

use discovery::{remote_tool_name, unwrap_tool_result, Discovery};

/// Connection entry for one bridged server.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    /// Unique server id; becomes the namespace segment.
    pub id: String,
    /// Command path of the server executable.
    pub command: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Replacement environment for the child, if any.
    pub env: Option<HashMap<String, String>>,
    /// Per-call timeout; `None` uses the default.
    pub timeout: Option<Duration>,
}

impl ServerEntry {
    fn to_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(self.command.clone())
            .with_args(self.args.clone())
            .with_timeout(self.timeout.unwrap_or(DEFAULT_CALL_TIMEOUT));
        if let Some(env) = &self.env {
            config = config.with_env(env.clone());
        }
        config
    }
}

/// Bridge configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Servers to bridge.
    pub servers: Vec<ServerEntry>,
    /// Whether [`McpBridge::initialize`] discovers every server.
    pub auto_discover: bool,
}

/// Errors raised by bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The pool could not supply a client.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A client call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The server's client is not connected.
    #[error("server `{id}` is not connected")]
    NotConnected {
        /// The server id.
        id: String,
    },

    /// Refresh was requested before any discovery ran for the server.
    #[error("server `{id}` has not been discovered yet")]
    NotDiscovered {
        /// The server id.
        id: String,
    },

    /// One or more servers failed to discover during initialisation.
    #[error("discovery failed for {} server(s): {}", failures.len(), format_failures(failures))]
    Discovery {
        /// Per-server failure messages.
        failures: Vec<(String, String)>,
    },
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(id, message)| format!("{id}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The bridge: configured servers, their pool, and discovery state.
pub struct McpBridge {
    registry: Arc<ToolRegistry>,
    pool: Arc<ConnectionPool>,
    server_ids: Vec<String>,
    auto_discover: bool,
    discovered: Mutex<HashSet<String>>,
}

impl McpBridge {
    /// Builds a bridge and registers every server's recipe with an
    /// internal pool. Does not connect.
    pub async fn new(registry: Arc<ToolRegistry>, config: BridgeConfig) -> Self {
        let pool = Arc::new(ConnectionPool::new());
        let mut server_ids = Vec::with_capacity(config.servers.len());

        for entry in &config.servers {
            pool.add_server(entry.id.clone(), entry.to_config()).await;
            server_ids.push(entry.id.clone());
        }

        Self {
            registry,
            pool,
            server_ids,
            auto_discover: config.auto_discover,
            discovered: Mutex::new(HashSet::new()),
        }
    }

    /// Connects and discovers every configured server concurrently,
    /// when auto-discovery is enabled.
    ///
    /// Returns the total number of tools registered. Failed servers are
    /// reported together in [`BridgeError::Discovery`]; tools from the
    /// servers that succeeded stay registered.
    ///
    /// # Errors
    ///
    /// Fails only when at least one server failed to discover.
    pub async fn initialize(&self) -> Result<usize, BridgeError> {
        if !self.auto_discover {
            info!("auto-discovery disabled, skipping bridge initialisation");
            return Ok(0);
        }

        let mut handles = Vec::with_capacity(self.server_ids.len());
        for id in &self.server_ids {
            let discovery = Discovery::new(
                id.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&self.pool),
            );
            handles.push((
                id.clone(),
                tokio::spawn(async move { discovery.discover_and_register().await }),
            ));
        }

        let mut total = 0;
        let mut failures = Vec::new();
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(count)) => {
                    self.discovered.lock().await.insert(id.clone());
                    info!(server = %id, tools = count, "bridged MCP server");
                    total += count;
                }
                Ok(Err(e)) => {
                    warn!(server = %id, error = %e, "failed to bridge MCP server");
                    failures.push((id, e.to_string()));
                }
                Err(e) => failures.push((id, format!("discovery task failed: {e}"))),
            }
        }

        if failures.is_empty() {
            Ok(total)
        } else {
            Err(BridgeError::Discovery { failures })
        }
    }

    /// Connects one server and imports its catalogue.
    ///
    /// # Errors
    ///
    /// Fails when connecting or listing fails.
    pub async fn connect_and_discover(&self, server_id: &str) -> Result<usize, BridgeError> {
        let discovery = Discovery::new(
            server_id,
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
        );
        let count = discovery.discover_and_register().await?;
        self.discovered.lock().await.insert(server_id.to_string());
        Ok(count)
    }

    /// Calls a tool on a bridged server by its remote name.
    ///
    /// A single-text result is unwrapped to a bare string; anything
    /// else comes back as the raw content array.
    ///
    /// # Errors
    ///
    /// Fails when the client cannot be obtained or the call fails,
    /// including when the tool reports `isError = true`.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, BridgeError> {
        let client = self.pool.get_client(server_id).await?;
        let result = client.call_tool(tool_name, arguments).await?;
        Ok(unwrap_tool_result(&result))
    }

    /// Replaces this server's namespace with a freshly fetched
    /// catalogue. Tools of other servers are untouched.
    ///
    /// # Errors
    ///
    /// Fails when the server was never discovered, or re-discovery
    /// fails.
    pub async fn refresh_tools(&self, server_id: &str) -> Result<usize, BridgeError> {
        if !self.discovered.lock().await.contains(server_id) {
            return Err(BridgeError::NotDiscovered {
                id: server_id.to_string(),
            });
        }

        Discovery::new(
            server_id,
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
        )
        .refresh()
        .await
    }

    /// Removes this server's tools from the registry.
    ///
    /// Returns the number of tools removed.
    pub async fn unregister_server_tools(&self, server_id: &str) -> usize {
        self.discovered.lock().await.remove(server_id);
        self.registry
            .unregister_by_prefix(&remote_tool_name(server_id, ""))
    }

    /// Shuts the pool down. Registered tools remain in the registry but
    /// will fail on execution until the bridge is rebuilt.
    pub async fn close(&self) {
        self.pool.close_all().await;
    }

    /// The configured server ids, in configuration order.
    #[must_use]
    pub fn list_servers(&self) -> Vec<String> {
        self.server_ids.clone()
    }

    /// Pool occupancy counters.
    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// The (possibly freshly connected) client for one server.
    ///
    /// # Errors
    ///
    /// Fails when the id is unknown or the connect fails.
    pub async fn server_client(&self, server_id: &str) -> Result<Arc<McpClient>, BridgeError> {
        Ok(self.pool.get_client(server_id).await?)
    }
}

impl std::fmt::Debug for McpBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpBridge")
            .field("servers", &self.server_ids)
            .field("auto_discover", &self.auto_discover)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolSource;
    use serde_json::json;

    const HANDSHAKE_REPLY: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub","version":"1.0.0"}}}"#;
    // The connect path lists tools once (id 2), discovery lists again (id 3).
    const TOOLS_REPLY: &str = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"probe","description":"Probe","inputSchema":{"type":"object"}}]}}"#;
    const TOOLS_REPLY_AGAIN: &str = r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[{"name":"probe","description":"Probe","inputSchema":{"type":"object"}}]}}"#;

    fn stub_entry(id: &str) -> ServerEntry {
        let script = format!(
            "read line; echo '{HANDSHAKE_REPLY}'; read notif; read line; echo '{TOOLS_REPLY}'; \
             read line; echo '{TOOLS_REPLY_AGAIN}'; sleep 30"
        );
        ServerEntry {
            id: id.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            env: None,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    fn broken_entry(id: &str) -> ServerEntry {
        ServerEntry {
            id: id.to_string(),
            command: "/nonexistent/opshub-test-binary".to_string(),
            args: Vec::new(),
            env: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn initialize_discovers_all_servers_under_their_namespaces() {
        let registry = Arc::new(ToolRegistry::new());
        let bridge = McpBridge::new(
            Arc::clone(&registry),
            BridgeConfig {
                servers: vec![stub_entry("server1"), stub_entry("server2")],
                auto_discover: true,
            },
        )
        .await;

        let total = bridge.initialize().await.unwrap();
        assert_eq!(total, 2);

        let remote = registry.list_by_source(ToolSource::Remote);
        assert_eq!(remote.len(), 2);
        assert!(remote
            .iter()
            .all(|tool| tool.name.starts_with("mcp:server1:") || tool.name.starts_with("mcp:server2:")));

        bridge.close().await;
    }

    #[tokio::test]
    async fn initialize_keeps_successes_when_one_server_fails() {
        let registry = Arc::new(ToolRegistry::new());
        let bridge = McpBridge::new(
            Arc::clone(&registry),
            BridgeConfig {
                servers: vec![stub_entry("good"), broken_entry("bad")],
                auto_discover: true,
            },
        )
        .await;

        let err = bridge.initialize().await.unwrap_err();
        let BridgeError::Discovery { failures } = err else {
            panic!("expected discovery failure");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bad");

        // The good server's tools survived.
        assert!(registry.get("mcp:good:probe").is_ok());

        bridge.close().await;
    }

    #[tokio::test]
    async fn auto_discover_disabled_registers_nothing() {
        let registry = Arc::new(ToolRegistry::new());
        let bridge = McpBridge::new(
            Arc::clone(&registry),
            BridgeConfig {
                servers: vec![stub_entry("server1")],
                auto_discover: false,
            },
        )
        .await;

        assert_eq!(bridge.initialize().await.unwrap(), 0);
        assert!(registry.is_empty());

        bridge.close().await;
    }

    #[tokio::test]
    async fn refresh_requires_a_prior_discovery() {
        let registry = Arc::new(ToolRegistry::new());
        let bridge = McpBridge::new(
            Arc::clone(&registry),
            BridgeConfig {
                servers: vec![stub_entry("server1")],
                auto_discover: false,
            },
        )
        .await;

        assert!(matches!(
            bridge.refresh_tools("server1").await,
            Err(BridgeError::NotDiscovered { .. })
        ));

        bridge.connect_and_discover("server1").await.unwrap();
        assert!(registry.get("mcp:server1:probe").is_ok());

        bridge.close().await;
    }

    #[tokio::test]
    async fn imported_tools_route_through_the_pool() {
        let call_reply = r#"{"jsonrpc":"2.0","id":4,"result":{"content":[{"type":"text","text":"pong"}]}}"#;
        let script = format!(
            "read line; echo '{HANDSHAKE_REPLY}'; read notif; read line; echo '{TOOLS_REPLY}'; \
             read line; echo '{TOOLS_REPLY_AGAIN}'; read line; echo '{call_reply}'; sleep 30"
        );
        let entry = ServerEntry {
            id: "server1".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            env: None,
            timeout: Some(Duration::from_secs(5)),
        };

        let registry = Arc::new(ToolRegistry::new());
        let bridge = McpBridge::new(
            Arc::clone(&registry),
            BridgeConfig {
                servers: vec![entry],
                auto_discover: true,
            },
        )
        .await;
        bridge.initialize().await.unwrap();

        // Executing the namespaced registry entry calls the server and
        // unwraps the lone text block.
        let result = registry
            .execute("mcp:server1:probe", json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!("pong"));

        bridge.close().await;
    }
}
