//! The serving side: framed request loop and dispatch.
//!
//! [`McpServer`] reads newline-delimited JSON-RPC frames from a reader,
//! dispatches them through a [`Router`], and writes framed responses.
//! In the canonical deployment the streams are the process's own
//! stdin/stdout ([`McpServer::run`]); tests drive [`McpServer::serve`]
//! with in-memory pipes.
//!
//! # Dispatch rules
//!
//! - An undecodable frame is answered with a parse-error envelope whose
//!   id is `null`, never dropped silently.
//! - A notification produces no response bytes; a registered handler
//!   for its method still runs, fire-and-forget.
//! - An unknown method is answered with method-not-found; a handler
//!   failure with an internal-error envelope carrying the message in
//!   `data`. A single bad frame never ends the loop.

pub mod router;

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::protocol::{
    parse_message, to_line, IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListChangedCapability, ServerCapabilities, ServerInfo,
};
use crate::registry::ToolRegistry;

pub use router::{HandlerError, MethodHandler, Router};

/// Identity and capabilities this server declares at handshake.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Server name reported in `initialize`.
    pub name: String,
    /// Server version reported in `initialize`.
    pub version: String,
    /// Declared capabilities.
    pub capabilities: ServerCapabilities,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ListChangedCapability::default()),
                ..ServerCapabilities::default()
            },
        }
    }
}

/// An MCP server over a pair of line-framed streams.
pub struct McpServer {
    router: Router,
    shutdown: watch::Sender<bool>,
}

impl McpServer {
    /// Creates a server with the default method table bound to
    /// `registry`.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, config: McpServerConfig) -> Self {
        let router = Router::with_defaults(
            registry,
            ServerInfo {
                name: config.name,
                version: config.version,
            },
            config.capabilities,
        );
        Self::with_router(router)
    }

    /// Creates a server from a custom router.
    #[must_use]
    pub fn with_router(router: Router) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { router, shutdown }
    }

    /// Mutable access to the method table, for registering additional
    /// handlers before serving.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Requests loop exit at the next read boundary.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Serves the process's own stdin/stdout until EOF or shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error when stream I/O fails.
    pub async fn run(&self) -> std::io::Result<()> {
        info!(methods = ?self.router.methods(), "MCP server ready");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serves one framed request stream until EOF or shutdown.
    ///
    /// Empty lines are skipped; malformed frames are answered and the
    /// loop continues.
    ///
    /// # Errors
    ///
    /// Returns an error when stream I/O fails.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut shutdown = self.shutdown.subscribe();
        let mut line = String::new();

        loop {
            if *shutdown.borrow() {
                debug!("shutdown requested, leaving serve loop");
                break;
            }

            line.clear();
            let bytes_read = tokio::select! {
                read = reader.read_line(&mut line) => read?,
                _ = shutdown.changed() => continue,
            };
            if bytes_read == 0 {
                debug!("client closed the stream");
                break;
            }

            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }

            if let Some(response) = self.handle_frame(frame).await {
                writer.write_all(response.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handles one frame; returns the encoded response line, if any.
    async fn handle_frame(&self, frame: &str) -> Option<String> {
        match parse_message(frame) {
            Ok(IncomingMessage::Request(request)) => {
                let response = self.dispatch_request(request).await;
                to_line(&response).ok()
            }
            Ok(IncomingMessage::Notification(notification)) => {
                // Fire-and-forget: run a registered handler, answer nothing.
                if let Some(handler) = self.router.handler(&notification.method) {
                    if let Err(e) = handler(notification.params).await {
                        debug!(method = %notification.method, error = %e, "notification handler failed");
                    }
                } else {
                    debug!(method = %notification.method, "ignoring notification");
                }
                None
            }
            Err(error) => {
                warn!(code = error.error.code, "answering malformed frame");
                to_line(&error).ok()
            }
        }
    }

    async fn dispatch_request(&self, request: JsonRpcRequest) -> ServerResponse {
        let Some(handler) = self.router.handler(&request.method) else {
            debug!(method = %request.method, "method not found");
            return ServerResponse::Error(JsonRpcError::method_not_found(
                request.id,
                &request.method,
            ));
        };

        match handler(request.params).await {
            Ok(result) => ServerResponse::Success(JsonRpcResponse::success(request.id, result)),
            Err(HandlerError::InvalidParams { message }) => {
                ServerResponse::Error(JsonRpcError::invalid_params(request.id, message))
            }
            Err(HandlerError::Internal { message }) => {
                ServerResponse::Error(JsonRpcError::internal_error(request.id, message))
            }
        }
    }
}

/// Either side of a dispatch outcome, serialised as-is.
#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
enum ServerResponse {
    Success(JsonRpcResponse),
    Error(JsonRpcError),
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
