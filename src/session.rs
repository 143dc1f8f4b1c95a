//! Request/response correlation over one child transport.
//!
//! A session owns exactly one [`ChildTransport`] and runs a single
//! background reader task. Callers issue [`Session::call`] and
//! [`Session::notify`] concurrently; writes are serialised by the
//! transport, responses are demultiplexed strictly by request id.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──initialize()──▶ Connecting ──handshake ok──▶ Connected
//!      ▲                            │                            │
//!      └────────── close() ─────────┴──── fatal error ──▶ Failed ┘
//! ```
//!
//! The handshake sends `initialize`, stores the peer's identity and
//! capabilities, then emits the `notifications/initialized` notification
//! before the session is considered connected. Transport and protocol
//! failures are terminal: a failed session is never reconnected, it is
//! discarded and rebuilt by its owner.
//!
//! # Correlation
//!
//! Each in-flight request parks a `oneshot` slot in a pending map keyed
//! by the normalised [`RequestId`]. The slot is registered before the
//! request bytes are written, so a reply can never win the race against
//! its waiter. Waiters that time out or are dropped leave the map via
//! the exit path that observed them; a reply arriving afterwards finds
//! no slot (or a dead receiver) and is discarded silently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{
    parse_server_message, to_line, ClientCapabilities, ClientInfo, InitializeParams,
    InitializeResult, JsonRpcErrorData, JsonRpcNotification, JsonRpcRequest, ProtocolError,
    RequestId, ServerCapabilities, ServerInfo, ServerMessage, MCP_PROTOCOL_VERSION,
    METHOD_INITIALIZE, NOTIFICATION_INITIALIZED,
};
use crate::transport::{ChildTransport, TransportError};

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created or explicitly closed.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake complete; calls are accepted.
    Connected,
    /// A fatal transport or protocol error occurred. Terminal.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors raised by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or a result could not be decoded.
    #[error("serialisation error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Rpc {
        /// Numeric error code.
        code: i32,
        /// Error message.
        message: String,
        /// Optional additional data.
        data: Option<Value>,
    },

    /// The operation is not valid in the session's current state.
    #[error("session is {0}")]
    InvalidState(SessionState),

    /// No response arrived within the per-call timeout.
    #[error("call to `{method}` timed out after {timeout:?}")]
    Timeout {
        /// The method that was called.
        method: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The session was closed while the call was in flight.
    #[error("session closed")]
    Closed,
}

impl From<JsonRpcErrorData> for SessionError {
    fn from(error: JsonRpcErrorData) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

/// Reply delivered to a waiting caller.
#[derive(Debug)]
enum ServerReply {
    /// The `result` member of a success response.
    Result(Value),
    /// The `error` member of an error response.
    Error(JsonRpcErrorData),
}

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerReply>>>>;
type NotificationSink = Arc<std::sync::Mutex<Option<mpsc::UnboundedSender<JsonRpcNotification>>>>;

/// One MCP session over one child transport.
pub struct Session {
    transport: Arc<ChildTransport>,
    state: Arc<std::sync::Mutex<SessionState>>,
    pending: PendingMap,
    next_id: AtomicI64,
    server_info: std::sync::Mutex<Option<ServerInfo>>,
    capabilities: std::sync::Mutex<Option<ServerCapabilities>>,
    notification_sink: NotificationSink,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    default_timeout: Duration,
}

impl Session {
    /// Wraps a transport and starts the background reader task.
    #[must_use]
    pub fn new(transport: ChildTransport, default_timeout: Duration) -> Self {
        let transport = Arc::new(transport);
        let state = Arc::new(std::sync::Mutex::new(SessionState::Disconnected));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let notification_sink: NotificationSink = Arc::new(std::sync::Mutex::new(None));

        let reader = tokio::spawn(Self::read_loop(
            Arc::clone(&transport),
            Arc::clone(&state),
            Arc::clone(&pending),
            Arc::clone(&notification_sink),
        ));

        Self {
            transport,
            state,
            pending,
            next_id: AtomicI64::new(1),
            server_info: std::sync::Mutex::new(None),
            capabilities: std::sync::Mutex::new(None),
            notification_sink,
            reader: std::sync::Mutex::new(Some(reader)),
            default_timeout,
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether the handshake has completed and the session is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Returns the peer identity captured at handshake.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the peer capabilities captured at handshake.
    #[must_use]
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Installs a sink for server-originated notifications.
    ///
    /// Without a sink, notifications are logged at debug level and
    /// dropped. Delivery never blocks the reader.
    pub fn set_notification_sink(&self, sink: mpsc::UnboundedSender<JsonRpcNotification>) {
        *self
            .notification_sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sink);
    }

    /// Drives the MCP handshake.
    ///
    /// Sends `initialize`, stores the peer's identity and capabilities,
    /// emits `notifications/initialized`, then transitions to
    /// `Connected`.
    ///
    /// # Errors
    ///
    /// Any failure transitions the session to `Failed` and surfaces the
    /// original error. Calling this on a session that is not
    /// `Disconnected` fails with [`SessionError::InvalidState`].
    pub async fn initialize(
        &self,
        client_info: ClientInfo,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, SessionError> {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *state != SessionState::Disconnected {
                return Err(SessionError::InvalidState(*state));
            }
            *state = SessionState::Connecting;
        }

        match self.handshake(client_info, capabilities).await {
            Ok(result) => {
                self.set_state(SessionState::Connected);
                Ok(result)
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        client_info: ClientInfo,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, SessionError> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities,
            client_info,
        };

        let result = self
            .call(METHOD_INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        if init.protocol_version != MCP_PROTOCOL_VERSION {
            warn!(
                ours = MCP_PROTOCOL_VERSION,
                theirs = %init.protocol_version,
                "protocol version mismatch, continuing"
            );
        }

        *self
            .server_info
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(init.server_info.clone());
        *self
            .capabilities
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some(init.capabilities.clone());

        self.notify(NOTIFICATION_INITIALIZED, None).await?;
        Ok(init)
    }

    /// Sends a request and waits for its response with the default
    /// timeout.
    ///
    /// # Errors
    ///
    /// See [`Session::call_with_timeout`].
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, SessionError> {
        self.call_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// Sends a request and waits for its response.
    ///
    /// The response slot is registered before the request is written, is
    /// removed on every exit path, and is delivered to no caller but
    /// this one. Dropping the returned future abandons the slot; a reply
    /// arriving later is discarded silently.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] unless connecting or connected;
    /// - [`SessionError::Timeout`] when no response arrives in time;
    /// - [`SessionError::Rpc`] when the peer answers with an error;
    /// - [`SessionError::Closed`] when the session closes mid-flight;
    /// - transport and serialisation errors.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let state = self.state();
        if state != SessionState::Connecting && state != SessionState::Connected {
            return Err(SessionError::InvalidState(state));
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = JsonRpcRequest::new(id.clone(), method, params);
        let frame = to_line(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.transport.send(&frame).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ServerReply::Result(result))) => Ok(result),
            Ok(Ok(ServerReply::Error(error))) => Err(error.into()),
            // Sender dropped: the session was closed and pending drained.
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(SessionError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Sends a notification. Never allocates a response slot.
    ///
    /// # Errors
    ///
    /// Fails when the session is neither connecting nor connected, or
    /// when the write fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Connecting && state != SessionState::Connected {
            return Err(SessionError::InvalidState(state));
        }

        let frame = to_line(&JsonRpcNotification::new(method, params))?;
        self.transport.send(&frame).await?;
        Ok(())
    }

    /// Closes the session.
    ///
    /// Transitions to `Disconnected`, stops the reader, releases every
    /// pending waiter with [`SessionError::Closed`], and tears the
    /// transport down. Idempotent.
    pub async fn close(&self) {
        self.set_state(SessionState::Disconnected);

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = reader {
            handle.abort();
        }

        // Dropping the senders wakes every waiter with `Closed`.
        self.pending.lock().await.clear();

        self.transport.close().await;
    }

    fn set_state(&self, state: SessionState) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    /// The background reader: demultiplexes replies into pending slots
    /// and forwards notifications. Exits on end of stream or a transport
    /// error; either way every pending waiter is released.
    async fn read_loop(
        transport: Arc<ChildTransport>,
        state: Arc<std::sync::Mutex<SessionState>>,
        pending: PendingMap,
        sink: NotificationSink,
    ) {
        let failed = loop {
            match transport.receive().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    Self::dispatch_frame(&line, &pending, &sink).await;
                }
                Ok(None) => {
                    debug!("MCP server closed its stream");
                    break !transport.is_closed();
                }
                Err(e) => {
                    warn!(error = %e, "transport read failed");
                    break true;
                }
            }
        };

        if failed {
            let mut state = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if *state != SessionState::Disconnected {
                *state = SessionState::Failed;
            }
        }

        pending.lock().await.clear();
    }

    async fn dispatch_frame(line: &str, pending: &PendingMap, sink: &NotificationSink) {
        let message = match parse_server_message(line) {
            Ok(message) => message,
            Err(ProtocolError::Json(e)) => {
                warn!(error = %e, "discarding undecodable frame");
                return;
            }
            Err(ProtocolError::InvalidEnvelope { reason }) => {
                warn!(reason, "discarding invalid frame");
                return;
            }
        };

        match message {
            ServerMessage::Response(response) => {
                Self::deliver(pending, &response.id, ServerReply::Result(response.result)).await;
            }
            ServerMessage::Error(error) => match error.id {
                Some(id) => Self::deliver(pending, &id, ServerReply::Error(error.error)).await,
                None => warn!(code = error.error.code, message = %error.error.message, "server error without id"),
            },
            ServerMessage::Notification(notification) => {
                let delivered = sink
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .as_ref()
                    .is_some_and(|tx| tx.send(notification.clone()).is_ok());
                if !delivered {
                    debug!(method = %notification.method, "dropping server notification");
                }
            }
        }
    }

    /// Hands a reply to the slot registered for `id`.
    ///
    /// Non-blocking: an unknown id (late reply after timeout or
    /// cancellation) and a dead receiver are both dropped silently.
    async fn deliver(pending: &PendingMap, id: &RequestId, reply: ServerReply) {
        let slot = pending.lock().await.remove(id);
        match slot {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(%id, "dropping reply with no pending waiter"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The reader holds only Arc clones; aborting here prevents a
        // leaked task when a session is dropped without close().
        if let Ok(mut guard) = self.reader.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spawns a scripted MCP server implemented as a shell one-liner.
    fn scripted_session(script: &str) -> Session {
        let transport = ChildTransport::spawn("sh", &["-c".to_string(), script.to_string()], None)
            .expect("spawn scripted server");
        Session::new(transport, Duration::from_secs(5))
    }

    const HANDSHAKE_REPLY: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub","version":"1.0.0"}}}"#;

    fn client_info() -> ClientInfo {
        ClientInfo {
            name: "opshub-test".to_string(),
            version: "0.0.0".to_string(),
        }
    }

    #[tokio::test]
    async fn initialize_reaches_connected() {
        let session =
            scripted_session(&format!("read line; echo '{HANDSHAKE_REPLY}'; read rest; sleep 5"));
        assert_eq!(session.state(), SessionState::Disconnected);

        let init = session
            .initialize(client_info(), ClientCapabilities::default())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(init.server_info.name, "stub");
        assert_eq!(session.server_info().unwrap().name, "stub");
        assert!(session.server_capabilities().unwrap().tools.is_some());

        session.close().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn initialize_failure_is_terminal() {
        // Server exits immediately: EOF before any response.
        let session = scripted_session("exit 0");

        let result = session
            .initialize(client_info(), ClientCapabilities::default())
            .await;

        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Failed);
        session.close().await;
    }

    #[tokio::test]
    async fn call_rejected_when_disconnected() {
        let session = scripted_session("read line");
        let err = session.call("ping", None).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState(SessionState::Disconnected)
        ));
        session.close().await;
    }

    #[tokio::test]
    async fn rpc_error_objects_become_errors() {
        let script = format!(
            "read line; echo '{HANDSHAKE_REPLY}'; read n; read line; \
             echo '{{\"jsonrpc\":\"2.0\",\"id\":2,\"error\":{{\"code\":-32601,\"message\":\"Method not found\"}}}}'; \
             sleep 5"
        );
        let session = scripted_session(&script);
        session
            .initialize(client_info(), ClientCapabilities::default())
            .await
            .unwrap();

        let err = session.call("no/such/method", None).await.unwrap_err();
        match err {
            SessionError::Rpc { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
        // The session stays healthy after a method error.
        assert!(session.is_connected());
        session.close().await;
    }

    #[tokio::test]
    async fn call_times_out_without_response() {
        let script = format!("read line; echo '{HANDSHAKE_REPLY}'; read n; sleep 10");
        let session = scripted_session(&script);
        session
            .initialize(client_info(), ClientCapabilities::default())
            .await
            .unwrap();

        let err = session
            .call_with_timeout("ping", None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));

        session.close().await;
    }

    #[tokio::test]
    async fn close_releases_pending_waiters() {
        let script = format!("read line; echo '{HANDSHAKE_REPLY}'; read n; sleep 10");
        let session = Arc::new(scripted_session(&script));
        session
            .initialize(client_info(), ClientCapabilities::default())
            .await
            .unwrap();

        let caller = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.call("ping", None).await })
        };
        // Give the call a moment to park in the pending map.
        tokio::time::sleep(Duration::from_millis(50)).await;

        session.close().await;

        let result = caller.await.unwrap();
        assert!(matches!(result, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn server_exit_fails_the_session() {
        let script = format!("read line; echo '{HANDSHAKE_REPLY}'; read n");
        let session = scripted_session(&script);
        session
            .initialize(client_info(), ClientCapabilities::default())
            .await
            .unwrap();

        // The script exits after consuming the initialized notification.
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.state() == SessionState::Connected {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session should observe the exit");

        assert_eq!(session.state(), SessionState::Failed);
        session.close().await;
    }

    #[tokio::test]
    async fn notifications_reach_the_sink() {
        let script = format!(
            "read line; echo '{HANDSHAKE_REPLY}'; \
             echo '{{\"jsonrpc\":\"2.0\",\"method\":\"notifications/tools/list_changed\"}}'; read n; sleep 1"
        );
        let session = scripted_session(&script);
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.set_notification_sink(tx);

        session
            .initialize(client_info(), ClientCapabilities::default())
            .await
            .unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("notification in time")
            .expect("sink open");
        assert_eq!(notification.method, "notifications/tools/list_changed");

        session.close().await;
    }
}
