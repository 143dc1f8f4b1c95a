//! High-level client for one spawned MCP server.
//!
//! [`McpClient`] is a thin façade over a [`Session`]: it spawns the
//! configured subprocess, drives the handshake, caches the server's
//! tool catalogue, and exposes typed wrappers for the standard methods.
//! Fatal session errors are terminal for the client; the connection
//! pool discards failed clients and builds fresh ones on demand.

pub mod pool;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::protocol::{
    ClientCapabilities, ClientInfo, ListToolsResult, ServerCapabilities, ServerInfo,
    ToolCallParams, ToolCallResult, ToolDefinition, METHOD_PING, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST,
};
use crate::session::{Session, SessionError, DEFAULT_CALL_TIMEOUT};
use crate::transport::{ChildTransport, TransportError};

/// Connection recipe for one MCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Command path of the server executable.
    pub command: String,

    /// Arguments passed verbatim.
    pub args: Vec<String>,

    /// Environment for the child. When set, it replaces the parent
    /// environment entirely; when `None`, the child inherits it.
    pub env: Option<HashMap<String, String>>,

    /// Per-call timeout.
    pub timeout: Duration,
}

impl ServerConfig {
    /// Creates a config with no arguments and the default timeout.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: None,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets the argument list.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the replacement environment.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Errors raised by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The session layer failed.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The subprocess could not be spawned.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A wire payload could not be decoded.
    #[error("serialisation error: {0}")]
    Json(#[from] serde_json::Error),

    /// The client is not connected.
    #[error("client is not connected")]
    NotConnected,

    /// The tool ran but reported a failure (`isError = true`).
    ///
    /// The partial result is carried alongside the extracted message so
    /// callers can inspect either.
    #[error("tool failed: {message}")]
    ToolFailed {
        /// Message from the first text content block.
        message: String,
        /// The full result the tool returned.
        result: ToolCallResult,
    },
}

/// A connected (or connectable) MCP client.
pub struct McpClient {
    config: ServerConfig,
    session: std::sync::Mutex<Option<Arc<Session>>>,
    tools: std::sync::RwLock<Vec<ToolDefinition>>,
}

impl McpClient {
    /// Creates a disconnected client from a connection recipe.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            session: std::sync::Mutex::new(None),
            tools: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// The connection recipe this client was built from.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Spawns the server process and drives the handshake.
    ///
    /// After a successful handshake the tool catalogue is fetched
    /// best-effort: a `tools/list` failure is logged, not fatal.
    /// Connecting an already-connected client is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first fatal spawn or handshake error. The spawned
    /// process is torn down before the error is surfaced.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }

        // Reap a previously failed session before spawning anew.
        let stale = self.session_slot().take();
        if let Some(stale) = stale {
            stale.close().await;
        }

        let transport = ChildTransport::spawn(
            &self.config.command,
            &self.config.args,
            self.config.env.as_ref(),
        )?;
        Self::forward_stderr(&transport, &self.config.command);

        let session = Arc::new(Session::new(transport, self.config.timeout));

        let client_info = ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        if let Err(e) = session
            .initialize(client_info, ClientCapabilities::default())
            .await
        {
            session.close().await;
            return Err(e.into());
        }

        debug!(
            command = %self.config.command,
            server = ?session.server_info().map(|info| info.name),
            "MCP client connected"
        );

        *self.session_slot() = Some(session);

        if let Err(e) = self.list_tools().await {
            warn!(command = %self.config.command, error = %e, "initial tools/list failed");
        }
        Ok(())
    }

    /// Closes the session and clears the cached catalogue. Idempotent.
    pub async fn disconnect(&self) {
        let session = self.session_slot().take();
        if let Some(session) = session {
            session.close().await;
        }
        self.tools_slot_mut().clear();
    }

    /// Whether the underlying session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session_slot()
            .as_ref()
            .is_some_and(|session| session.is_connected())
    }

    /// Fetches the server's tool catalogue via `tools/list`.
    ///
    /// The cached catalogue is replaced atomically; a snapshot of the
    /// fresh catalogue is returned.
    ///
    /// # Errors
    ///
    /// Fails when the client is not connected or the call fails; the
    /// cache keeps its previous contents in that case.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ClientError> {
        let session = self.session()?;
        let result = session.call(METHOD_TOOLS_LIST, None).await?;
        let listing: ListToolsResult = serde_json::from_value(result)?;

        *self.tools_slot_mut() = listing.tools.clone();
        Ok(listing.tools)
    }

    /// Snapshot of the cached tool catalogue.
    #[must_use]
    pub fn cached_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invokes a remote tool via `tools/call`.
    ///
    /// # Errors
    ///
    /// A result with `isError = true` becomes
    /// [`ClientError::ToolFailed`], carrying both the extracted message
    /// and the partial result.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ClientError> {
        let session = self.session()?;
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let value = session
            .call(METHOD_TOOLS_CALL, Some(serde_json::to_value(&params)?))
            .await?;
        let result: ToolCallResult = serde_json::from_value(value)?;

        if result.is_error {
            let message = result
                .first_text()
                .unwrap_or("tool reported an error")
                .to_string();
            return Err(ClientError::ToolFailed { message, result });
        }
        Ok(result)
    }

    /// Liveness check via `ping`.
    ///
    /// # Errors
    ///
    /// Fails when the client is not connected or the call fails.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let session = self.session()?;
        session.call(METHOD_PING, None).await?;
        Ok(())
    }

    /// The server identity captured at handshake.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.session_slot()
            .as_ref()
            .and_then(|session| session.server_info())
    }

    /// The server capabilities captured at handshake.
    #[must_use]
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.session_slot()
            .as_ref()
            .and_then(|session| session.server_capabilities())
    }

    fn session(&self) -> Result<Arc<Session>, ClientError> {
        self.session_slot()
            .as_ref()
            .filter(|session| session.is_connected())
            .cloned()
            .ok_or(ClientError::NotConnected)
    }

    fn session_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<Session>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tools_slot_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ToolDefinition>> {
        self.tools.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forwards the child's stderr into the host's logs, line by line.
    fn forward_stderr(transport: &ChildTransport, command: &str) {
        if let Some(stderr) = transport.take_stderr() {
            let command = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %command, "{line}");
                }
            });
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("command", &self.config.command)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HANDSHAKE_REPLY: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub","version":"1.0.0"}}}"#;
    const TOOLS_REPLY: &str = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo","inputSchema":{"type":"object"}}]}}"#;

    /// A scripted MCP server answering the connect sequence
    /// (initialize, initialized, tools/list) and then `extra`.
    fn scripted_client(extra: &str) -> McpClient {
        let script = format!(
            "read line; echo '{HANDSHAKE_REPLY}'; read notif; read line; echo '{TOOLS_REPLY}'; {extra}"
        );
        McpClient::new(
            ServerConfig::new("sh")
                .with_args(vec!["-c".to_string(), script])
                .with_timeout(Duration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn connect_caches_the_catalogue() {
        let client = scripted_client("sleep 5");
        client.connect().await.unwrap();

        assert!(client.is_connected());
        assert_eq!(client.server_info().unwrap().name, "stub");
        let cached = client.cached_tools();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].name, "echo");

        client.disconnect().await;
        assert!(!client.is_connected());
        assert!(client.cached_tools().is_empty());
    }

    #[tokio::test]
    async fn connect_failure_reports_the_spawn_error() {
        let client = McpClient::new(ServerConfig::new("/nonexistent/opshub-test-binary"));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn call_tool_returns_the_result() {
        let reply = r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"{\"echoed\":\"hi\"}"}]}}"#;
        let client = scripted_client(&format!("read line; echo '{reply}'"));
        client.connect().await.unwrap();

        let result = client
            .call_tool("echo", json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.first_text(), Some(r#"{"echoed":"hi"}"#));
        assert!(!result.is_error);

        client.disconnect().await;
    }

    #[tokio::test]
    async fn tool_error_carries_the_partial_result() {
        let reply = r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"both arguments must be numbers"}],"isError":true}}"#;
        let client = scripted_client(&format!("read line; echo '{reply}'"));
        client.connect().await.unwrap();

        let err = client.call_tool("add", json!({"a": "x"})).await.unwrap_err();
        match err {
            ClientError::ToolFailed { message, result } => {
                assert_eq!(message, "both arguments must be numbers");
                assert!(result.is_error);
                assert_eq!(result.content.len(), 1);
            }
            other => panic!("expected ToolFailed, got {other:?}"),
        }

        client.disconnect().await;
    }

    #[tokio::test]
    async fn calls_on_a_disconnected_client_fail() {
        let client = McpClient::new(ServerConfig::new("sh"));
        assert!(matches!(
            client.ping().await.unwrap_err(),
            ClientError::NotConnected
        ));
        assert!(matches!(
            client.list_tools().await.unwrap_err(),
            ClientError::NotConnected
        ));
    }
}
