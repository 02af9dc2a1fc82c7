//! JSON-RPC 2.0 envelope and MCP result types.
//!
//! Only the envelope is modelled; method parameters and results stay
//! `serde_json::Value` until a handler needs them.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::GatewayError;

/// JSON-RPC version tag.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol versions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

// Standard JSON-RPC 2.0 error codes
/// Body is not valid JSON.
pub const PARSE_ERROR: i32 = -32700;
/// Body is JSON but not a valid JSON-RPC message.
pub const INVALID_REQUEST: i32 = -32600;
/// Unknown method.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Parameters failed validation.
pub const INVALID_PARAMS: i32 = -32602;
/// Unexpected server failure.
pub const INTERNAL_ERROR: i32 = -32603;
/// Session-level failure reported by the transport.
pub const SESSION_ERROR: i32 = -32000;

/// Negotiate the protocol version for an `initialize` request.
///
/// A supported version is echoed back; anything else gets the newest.
#[must_use]
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|version| {
            SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .copied()
                .find(|supported| *supported == version)
        })
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// A JSON-RPC request that expects a response.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    /// Request identifier, echoed in the response.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Parameters, `Null` if absent.
    pub params: Value,
}

/// One inbound JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Request expecting a response.
    Request(JsonRpcRequest),
    /// Notification; no response.
    Notification {
        /// Method name.
        method: String,
        /// Parameters, `Null` if absent.
        params: Value,
    },
    /// Response to a server-initiated request.
    Response {
        /// Identifier of the answered request.
        id: Value,
    },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "present")]
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<Value>,
}

/// Keeps an explicit `"id": null` distinguishable from a missing id.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl InboundMessage {
    /// Classify a decoded JSON body.
    ///
    /// # Errors
    ///
    /// Returns a JSON-RPC error response if the value is not a single
    /// well-formed message.
    pub fn from_value(value: Value) -> Result<Self, Box<JsonRpcResponse>> {
        if value.is_array() {
            return Err(Box::new(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                "batch requests are not supported",
            )));
        }

        let raw: RawMessage = serde_json::from_value(value).map_err(|e| {
            Box::new(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                format!("invalid message: {e}"),
            ))
        })?;

        if raw.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Err(Box::new(JsonRpcResponse::error(
                raw.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            )));
        }

        match (raw.method, raw.id) {
            (Some(method), _) if method.is_empty() => Err(Box::new(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                "method must not be empty",
            ))),
            (Some(method), Some(id)) => Ok(Self::Request(JsonRpcRequest {
                id,
                method,
                params: raw.params,
            })),
            (Some(method), None) => Ok(Self::Notification {
                method,
                params: raw.params,
            }),
            (None, Some(id)) if raw.result.is_some() || raw.error.is_some() => {
                Ok(Self::Response { id })
            }
            (None, id) => Err(Box::new(JsonRpcResponse::error(
                id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "message has neither method nor result",
            ))),
        }
    }

    /// Whether this is an `initialize` request.
    #[must_use]
    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Request(request) if request.method == "initialize")
    }

    /// Method name, if any.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    /// Request identifier, if the message expects a response.
    #[must_use]
    pub fn request_id(&self) -> Option<&Value> {
        match self {
            Self::Request(request) => Some(&request.id),
            _ => None,
        }
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// A JSON-RPC 2.0 success/error response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Identifier of the answered request.
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Create a success response.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Create a parse error response (id is null because we couldn't parse it).
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::error(Value::Null, PARSE_ERROR, message)
    }

    /// Create an error response carrying a gateway error's structured body.
    #[must_use]
    pub fn gateway_error(id: Value, code: i32, error: &GatewayError) -> Self {
        let mut response = Self::error(id, code, error.to_string());
        if let Some(err) = response.error.as_mut() {
            err.data = Some(error.to_json());
        }
        response
    }
}

/// Build a server notification.
#[must_use]
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

// =============================================================================
// Tool Results
// =============================================================================

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
}

/// Result of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Content blocks.
    pub content: Vec<Content>,
    /// Whether the tool failed.
    pub is_error: bool,
}

impl ToolResult {
    /// Successful result rendering `value` as pretty-printed JSON text.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self {
            content: vec![Content::Text {
                text: render(value),
            }],
            is_error: false,
        }
    }

    /// Failed result carrying the error's structured body.
    #[must_use]
    pub fn error(error: &GatewayError) -> Self {
        Self {
            content: vec![Content::Text {
                text: render(&error.to_json()),
            }],
            is_error: true,
        }
    }
}

fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Tool description advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: &'static str,
    /// What the tool does.
    pub description: &'static str,
    /// JSON Schema of the arguments object.
    pub input_schema: Value,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(raw: &str) -> Result<InboundMessage, Box<JsonRpcResponse>> {
        InboundMessage::from_value(serde_json::from_str(raw).unwrap())
    }

    #[test]
    fn parse_request() {
        let message = classify(r#"{"jsonrpc":"2.0","method":"tools/list","params":{},"id":1}"#)
            .unwrap();
        assert_eq!(message.method(), Some("tools/list"));
        assert_eq!(message.request_id(), Some(&json!(1)));
        assert!(!message.is_initialize());
    }

    #[test]
    fn parse_request_without_params() {
        let message = classify(r#"{"jsonrpc":"2.0","method":"ping","id":"a"}"#).unwrap();
        let InboundMessage::Request(request) = message else {
            panic!("expected request");
        };
        assert_eq!(request.params, Value::Null);
    }

    #[test]
    fn null_id_is_still_a_request() {
        let message = classify(r#"{"jsonrpc":"2.0","method":"ping","id":null}"#).unwrap();
        assert!(matches!(message, InboundMessage::Request(_)));
    }

    #[test]
    fn parse_notification() {
        let message =
            classify(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(message, InboundMessage::Notification { .. }));
        assert_eq!(message.request_id(), None);
    }

    #[test]
    fn parse_client_response() {
        let message = classify(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#).unwrap();
        assert_eq!(message, InboundMessage::Response { id: json!(7) });
    }

    #[test]
    fn rejects_wrong_version_and_batches() {
        let err = classify(r#"{"jsonrpc":"1.0","method":"ping","id":1}"#).unwrap_err();
        assert_eq!(err.error.as_ref().unwrap().code, INVALID_REQUEST);
        assert_eq!(err.id, json!(1));

        let err = classify(r#"[{"jsonrpc":"2.0","method":"ping","id":1}]"#).unwrap_err();
        assert_eq!(err.error.as_ref().unwrap().code, INVALID_REQUEST);

        let err = classify(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.error.as_ref().unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn version_negotiation() {
        assert_eq!(negotiate_protocol_version(Some("2024-11-05")), "2024-11-05");
        assert_eq!(negotiate_protocol_version(Some("1999-01-01")), "2025-06-18");
        assert_eq!(negotiate_protocol_version(None), "2025-06-18");
    }

    #[test]
    fn error_response_serialization() {
        let resp = JsonRpcResponse::error(json!(1), METHOD_NOT_FOUND, "Method not found");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"result\""));
        assert!(json.contains("-32601"));
    }

    #[test]
    fn parse_error_has_null_id() {
        let json = serde_json::to_string(&JsonRpcResponse::parse_error("bad json")).unwrap();
        assert!(json.contains("\"id\":null"));
        assert!(json.contains("-32700"));
    }

    #[test]
    fn tool_result_shape() {
        let ok = serde_json::to_value(ToolResult::json(&json!({"a": 1}))).unwrap();
        assert_eq!(ok["isError"], false);
        assert_eq!(ok["content"][0]["type"], "text");

        let err = ToolResult::error(&GatewayError::invalid_arguments("symbol is required"));
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(err["isError"], true);
        let body: Value =
            serde_json::from_str(err["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["error"], "INVALID_ARGUMENTS");
    }
}
