//! JSON-RPC 2.0 framing for the Model Context Protocol.
//!
//! Every MCP message is a single JSON object terminated by a line feed.
//! This module owns the envelope types for both directions of a
//! connection:
//!
//! - **Inbound serving**: [`parse_message`] splits a frame into a
//!   [`JsonRpcRequest`] or a [`JsonRpcNotification`] and rejects
//!   malformed envelopes with the reserved JSON-RPC error codes.
//! - **Outbound calling**: [`parse_server_message`] classifies a frame
//!   from a remote server as a success [`JsonRpcResponse`], an error
//!   reply ([`JsonRpcError`]), or a server-originated notification.
//!
//! # Request id normalisation
//!
//! Wire ids may be integers or strings. JSON parsers in other runtimes
//! widen integers to floating point, so a peer may echo `1` back as
//! `1.0`. [`RequestId`] therefore normalises any integral number to
//! `i64` during deserialisation; response correlation keys on the
//! normalised form on both the encode and decode paths.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The JSON-RPC version tag carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// The MCP protocol revision this implementation targets.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Method name for the handshake request.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Notification emitted by the client once the handshake completes.
pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
/// Method name for listing a server's tool catalogue.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Method name for invoking a tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Reserved method name for listing resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Reserved method name for reading a resource.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// Reserved method name for listing prompts.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Reserved method name for fetching a prompt.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";
/// Method name for liveness checks.
pub const METHOD_PING: &str = "ping";

/// Reserved JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received (−32700).
    ParseError,
    /// The JSON sent is not a valid request object (−32600).
    InvalidRequest,
    /// The method does not exist (−32601).
    MethodNotFound,
    /// Invalid method parameters (−32602).
    InvalidParams,
    /// Internal JSON-RPC error (−32603).
    InternalError,
}

impl ErrorCode {
    /// Returns the numeric wire code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }
}

/// A JSON-RPC request identifier.
///
/// Integers and strings are both legal on the wire. Integral floats are
/// normalised to [`RequestId::Number`] during deserialisation (see the
/// module docs); non-integral numbers are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id. The session mints these.
    Number(i64),
    /// String id. Accepted from peers, never minted locally.
    Text(String),
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Self::Number(i));
                }
                if let Some(f) = n.as_f64() {
                    #[allow(clippy::cast_possible_truncation)]
                    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
                        return Ok(Self::Number(f as i64));
                    }
                }
                Err(D::Error::custom("request id must be an integral number"))
            }
            Value::String(s) => Ok(Self::Text(s)),
            _ => Err(D::Error::custom("request id must be a number or a string")),
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC request (carries an id and expects exactly one response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Version tag, always `"2.0"`.
    pub jsonrpc: String,

    /// Request identifier, echoed by the response.
    pub id: RequestId,

    /// Method name.
    pub method: String,

    /// Method parameters. Omitted from the wire when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request envelope.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC notification (no id, fire-and-forget, never answered).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Version tag, always `"2.0"`.
    pub jsonrpc: String,

    /// Method name.
    pub method: String,

    /// Method parameters. Omitted from the wire when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a notification envelope.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A successful JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Version tag, always `"2.0"`.
    pub jsonrpc: String,

    /// Identifier of the request being answered.
    pub id: RequestId,

    /// Result payload. May be any JSON value, including `null`.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// The error member of an error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcErrorData {
    /// Numeric error code.
    pub code: i32,

    /// Human-readable message.
    pub message: String,

    /// Optional additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates error data from a reserved code and message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attaches a `data` payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A JSON-RPC error response.
///
/// The id is `None` (serialised as `null`) when the offending frame's id
/// could not be recovered, e.g. on a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Version tag, always `"2.0"`.
    pub jsonrpc: String,

    /// Identifier of the request being answered, or `null`.
    pub id: Option<RequestId>,

    /// The error object.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates an error response.
    #[must_use]
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }
    }

    /// Parse error (−32700) with a null id.
    #[must_use]
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(
            None,
            JsonRpcErrorData::with_message(ErrorCode::ParseError, detail),
        )
    }

    /// Invalid request (−32600).
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>, detail: impl Into<String>) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, detail),
        )
    }

    /// Method not found (−32601).
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::MethodNotFound, "Method not found")
                .with_data(Value::String(method.to_string())),
        )
    }

    /// Invalid params (−32602).
    #[must_use]
    pub fn invalid_params(id: RequestId, detail: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, detail),
        )
    }

    /// Internal error (−32603) carrying the handler's message in `data`.
    #[must_use]
    pub fn internal_error(id: RequestId, detail: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InternalError, "Internal error")
                .with_data(Value::String(detail.into())),
        )
    }
}

/// A parsed inbound frame on the serving side.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification; must not be answered.
    Notification(JsonRpcNotification),
}

/// A parsed inbound frame on the calling side.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// A success response to one of our requests.
    Response(JsonRpcResponse),
    /// An error response to one of our requests.
    Error(JsonRpcError),
    /// A server-originated notification.
    Notification(JsonRpcNotification),
}

/// Errors raised while decoding frames on the calling side.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame was JSON but not a valid JSON-RPC 2.0 envelope.
    #[error("invalid JSON-RPC envelope: {reason}")]
    InvalidEnvelope {
        /// Description of the violation.
        reason: String,
    },
}

/// Loose envelope used to classify inbound frames before validation.
#[derive(Debug, Deserialize)]
struct RawMessage {
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

/// Parses one inbound frame on the serving side.
///
/// # Errors
///
/// Returns a ready-to-send [`JsonRpcError`]: parse error (−32700) for
/// invalid JSON, invalid request (−32600) for a wrong version tag or a
/// missing/empty method.
pub fn parse_message(line: &str) -> Result<IncomingMessage, JsonRpcError> {
    let raw: RawMessage =
        serde_json::from_str(line).map_err(|e| JsonRpcError::parse_error(e.to_string()))?;

    if raw.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::invalid_request(
            raw.id,
            "missing or unsupported jsonrpc version",
        ));
    }

    let Some(method) = raw.method.filter(|m| !m.is_empty()) else {
        return Err(JsonRpcError::invalid_request(
            raw.id,
            "missing or empty method",
        ));
    };

    match raw.id {
        Some(id) => Ok(IncomingMessage::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method,
            params: raw.params,
        })),
        None => Ok(IncomingMessage::Notification(JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method,
            params: raw.params,
        })),
    }
}

/// Parses one inbound frame on the calling side.
///
/// A frame with an id and a `result` member is a success response; with
/// an id and an `error` member, an error response; with a method and no
/// id, a notification.
///
/// The frame is inspected as a raw JSON object so that a *present*
/// `result` key can be told apart from an absent one: `"result": null`
/// is a legal success response and must not be mistaken for a frame
/// without a result. A null `id`, by contrast, genuinely means "no id".
///
/// # Errors
///
/// Returns [`ProtocolError`] for invalid JSON, a wrong version tag, or
/// an envelope that is none of the three shapes above.
pub fn parse_server_message(line: &str) -> Result<ServerMessage, ProtocolError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(mut frame) = value else {
        return Err(ProtocolError::InvalidEnvelope {
            reason: "frame is not a JSON object".to_string(),
        });
    };

    if frame.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(ProtocolError::InvalidEnvelope {
            reason: "missing or unsupported jsonrpc version".to_string(),
        });
    }

    let id = match frame.remove("id") {
        None | Some(Value::Null) => None,
        Some(id) => Some(serde_json::from_value::<RequestId>(id).map_err(|e| {
            ProtocolError::InvalidEnvelope {
                reason: format!("invalid request id: {e}"),
            }
        })?),
    };

    if let Some(error) = frame.remove("error").filter(|v| !v.is_null()) {
        let error: JsonRpcErrorData =
            serde_json::from_value(error).map_err(|e| ProtocolError::InvalidEnvelope {
                reason: format!("invalid error object: {e}"),
            })?;
        return Ok(ServerMessage::Error(JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }));
    }

    // Key presence, not value: a null result is still a result.
    let result = frame.remove("result");
    let method = frame.remove("method");

    match (id, result, method) {
        (Some(id), Some(result), _) => Ok(ServerMessage::Response(JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        })),
        (None, None, Some(Value::String(method))) => {
            Ok(ServerMessage::Notification(JsonRpcNotification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method,
                params: frame.remove("params").filter(|v| !v.is_null()),
            }))
        }
        _ => Err(ProtocolError::InvalidEnvelope {
            reason: "frame is neither a response nor a notification".to_string(),
        }),
    }
}

/// Serialises a frame as one JSON object followed by a line feed.
///
/// # Errors
///
/// Returns an error if the value cannot be serialised.
pub fn to_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

// =============================================================================
// MCP wire types
// =============================================================================

/// Client identity sent with `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// Server identity returned by `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

/// Capability flag carried by several sub-capabilities.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    /// Whether the list can change during the session.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub list_changed: bool,
}

/// Resource-specific capability flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// Whether resource subscriptions are supported.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub subscribe: bool,
    /// Whether the resource list can change during the session.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub list_changed: bool,
}

/// Capabilities declared by a client during `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Filesystem-roots capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<ListChangedCapability>,
    /// Sampling capability (opaque).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

/// Capabilities declared by a server during `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool capability flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,
    /// Resource capability flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// Prompt capability flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,
    /// Logging capability (opaque).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by the client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Client identity.
    pub client_info: ClientInfo,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server speaks.
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server identity.
    pub server_info: ServerInfo,
}

/// One entry of a server's tool catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input. Passed through uncritically.
    #[serde(default)]
    pub input_schema: Value,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// The server's tool catalogue.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// One content block in a tool call result.
///
/// Only `text` blocks are interpreted by this core; every other block
/// type is carried through unmodified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text.
        text: String,
    },
    /// Any other block type (image, resource, ...), passed through raw.
    #[serde(untagged)]
    Other(Value),
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content blocks returned by the tool.
    #[serde(default)]
    pub content: Vec<ToolContent>,
    /// Whether the tool reported a failure. Always written on the
    /// wire, `false` included; only decoding tolerates its absence.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful single-text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates a failed single-text result.
    ///
    /// Tool failures travel inside the result; the outer envelope is
    /// still a success response.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Returns the first text block, if any.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ToolContent::Text { text } => Some(text.as_str()),
            ToolContent::Other(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_id_normalises_integral_floats() {
        let id: RequestId = serde_json::from_str("7.0").unwrap();
        assert_eq!(id, RequestId::Number(7));

        let id: RequestId = serde_json::from_str("7").unwrap();
        assert_eq!(id, RequestId::Number(7));

        let id: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id, RequestId::Text("abc".to_string()));
    }

    #[test]
    fn request_id_rejects_fractional_numbers() {
        assert!(serde_json::from_str::<RequestId>("7.5").is_err());
        assert!(serde_json::from_str::<RequestId>("true").is_err());
    }

    #[test]
    fn parse_request_with_params() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo"}}"#).unwrap();
        let IncomingMessage::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.method, "tools/call");
        assert_eq!(req.params.unwrap()["name"], "echo");
    }

    #[test]
    fn parse_notification_has_no_id() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(msg, IncomingMessage::Notification(n) if n.method == NOTIFICATION_INITIALIZED));
    }

    #[test]
    fn parse_invalid_json_is_parse_error() {
        let err = parse_message("not json").unwrap_err();
        assert_eq!(err.error.code, ErrorCode::ParseError.code());
        assert!(err.id.is_none());
    }

    #[test]
    fn parse_wrong_version_is_invalid_request() {
        let err = parse_message(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
        assert_eq!(err.id, Some(RequestId::Number(1)));
    }

    #[test]
    fn parse_empty_method_is_invalid_request() {
        let err = parse_message(r#"{"jsonrpc":"2.0","id":1,"method":""}"#).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
    }

    #[test]
    fn parse_server_response_success() {
        let msg = parse_server_message(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).unwrap();
        let ServerMessage::Response(resp) = msg else {
            panic!("expected response");
        };
        assert_eq!(resp.id, RequestId::Number(3));
        assert_eq!(resp.result["ok"], json!(true));
    }

    #[test]
    fn parse_server_response_with_null_result() {
        // A present-but-null result is a success response, not garbage.
        let msg = parse_server_message(r#"{"jsonrpc":"2.0","id":5,"result":null}"#).unwrap();
        let ServerMessage::Response(resp) = msg else {
            panic!("expected response");
        };
        assert_eq!(resp.id, RequestId::Number(5));
        assert_eq!(resp.result, Value::Null);
    }

    #[test]
    fn parse_server_response_error() {
        let msg = parse_server_message(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        let ServerMessage::Error(err) = msg else {
            panic!("expected error");
        };
        assert_eq!(err.error.code, -32601);
        assert_eq!(err.id, Some(RequestId::Number(4)));
    }

    #[test]
    fn parse_server_notification() {
        let msg = parse_server_message(r#"{"jsonrpc":"2.0","method":"log","params":{"level":"info"}}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Notification(n) if n.method == "log"));
    }

    #[test]
    fn parse_server_rejects_requestless_garbage() {
        assert!(parse_server_message(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
        assert!(parse_server_message(r#"{"jsonrpc":"2.0"}"#).is_err());
    }

    #[test]
    fn request_round_trips_through_a_line() {
        let request = JsonRpcRequest::new(
            RequestId::Number(42),
            METHOD_TOOLS_LIST,
            Some(json!({"cursor": null})),
        );
        let line = to_line(&request).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let IncomingMessage::Request(parsed) = parse_message(line.trim_end()).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(parsed.id, request.id);
        assert_eq!(parsed.method, request.method);
        assert_eq!(parsed.params, request.params);
    }

    #[test]
    fn notification_omits_id_and_absent_params() {
        let notification = JsonRpcNotification::new(NOTIFICATION_INITIALIZED, None);
        let line = to_line(&notification).unwrap();
        assert!(!line.contains("\"id\""));
        assert!(!line.contains("\"params\""));
    }

    #[test]
    fn error_envelope_serialises_null_id() {
        let err = JsonRpcError::parse_error("bad frame");
        let line = to_line(&err).unwrap();
        assert!(line.contains("\"id\":null"));
        assert!(line.contains("-32700"));
    }

    #[test]
    fn tool_call_result_first_text_skips_foreign_blocks() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "image", "data": "...", "mimeType": "image/png"},
                {"type": "text", "text": "hello"}
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(result.first_text(), Some("hello"));
        assert!(!result.is_error);
    }

    #[test]
    fn tool_call_result_error_flag_round_trips() {
        let result = ToolCallResult::error("boom");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["isError"], json!(true));

        // Success still carries the flag explicitly.
        let ok = ToolCallResult::text("fine");
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["isError"], json!(false));
    }

    #[test]
    fn initialize_result_parses_capability_flags() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {"listChanged": true},
                "resources": {"subscribe": true},
                "logging": {}
            },
            "serverInfo": {"name": "probe", "version": "0.1.0"}
        }))
        .unwrap();
        assert_eq!(result.protocol_version, MCP_PROTOCOL_VERSION);
        assert!(result.capabilities.tools.unwrap().list_changed);
        assert!(result.capabilities.resources.unwrap().subscribe);
        assert!(result.capabilities.logging.is_some());
        assert!(result.capabilities.prompts.is_none());
    }
}
