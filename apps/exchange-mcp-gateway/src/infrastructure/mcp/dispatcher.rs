//! RPC Dispatcher
//!
//! Routes one JSON-RPC message, already bound to a session, to its
//! handler.
//!
//! | Method | Handling |
//! |--------|----------|
//! | `initialize` | Negotiate protocol version, record client info |
//! | `ping` | Empty result |
//! | `tools/list` | Tool descriptors |
//! | `tools/call` | Run a tool; tool failures become `isError` results |
//! | `logging/setLevel` | Same as the `set-log-level` tool, cache kept |
//! | `notifications/*` | Logged, no response |
//!
//! Successful configuration changes are announced to every live session
//! as a `notifications/message` log entry.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::Instrument;

use super::protocol::{
    INTERNAL_ERROR, INVALID_PARAMS, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, ToolResult,
    negotiate_protocol_version, notification,
};
use super::tools::{ToolContext, ToolRegistry};
use crate::domain::session::{ClientInfo, Session, SessionRegistry};
use crate::infrastructure::metrics::{self, Outcome};

const SERVER_NAME: &str = "exchange-mcp-gateway";

const CONFIG_TOOLS: &[&str] = &["set-proxy-config", "set-market-type", "set-log-level"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    protocol_version: Option<String>,
    client_info: Option<ClientInfoParams>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientInfoParams {
    name: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct SetLevelParams {
    level: String,
}

/// Routes requests to method handlers and tools.
#[derive(Debug)]
pub struct Dispatcher {
    tools: ToolRegistry,
    ctx: ToolContext,
    announce: Option<Arc<SessionRegistry>>,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new(tools: ToolRegistry, ctx: ToolContext) -> Self {
        Self {
            tools,
            ctx,
            announce: None,
        }
    }

    /// Announce configuration changes to the sessions in `registry`.
    #[must_use]
    pub fn with_announcements(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.announce = Some(registry);
        self
    }

    /// Handle a request and build its response.
    pub async fn handle_request(
        &self,
        session: &Session,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let JsonRpcRequest { id, method, params } = request;

        let response = match method.as_str() {
            "initialize" => Self::initialize(session, id, params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => {
                JsonRpcResponse::success(id, json!({ "tools": self.tools.descriptors() }))
            }
            "tools/call" => self.call_tool(session, id, params).await,
            "logging/setLevel" => self.set_level(id, params),
            other => {
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Unknown method: {other}"))
            }
        };

        let outcome = if response.error.is_some() {
            Outcome::Error
        } else {
            Outcome::Ok
        };
        metrics::record_request(&method, outcome);
        response
    }

    /// Handle a notification or a client response.
    pub fn handle_notification(&self, session: &Session, method: Option<&str>, params: &Value) {
        match method {
            Some("notifications/initialized") => {
                tracing::info!(session_id = %session.id(), "Client initialized");
            }
            Some("notifications/cancelled") => {
                let request_id = params.get("requestId").cloned().unwrap_or_default();
                tracing::debug!(
                    session_id = %session.id(),
                    request_id = %request_id,
                    "Client cancelled request"
                );
            }
            Some(other) => {
                tracing::debug!(
                    session_id = %session.id(),
                    method = other,
                    "Ignoring notification"
                );
            }
            None => {
                tracing::debug!(session_id = %session.id(), "Ignoring client response");
            }
        }
    }

    fn initialize(session: &Session, id: Value, params: Value) -> JsonRpcResponse {
        let params: InitializeParams = if params.is_null() {
            InitializeParams::default()
        } else {
            match serde_json::from_value(params) {
                Ok(params) => params,
                Err(e) => return JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string()),
            }
        };

        let protocol_version = negotiate_protocol_version(params.protocol_version.as_deref());
        let client = params.client_info.unwrap_or_default();
        tracing::info!(
            session_id = %session.id(),
            protocol_version,
            client = client.name.as_deref().unwrap_or("unknown"),
            "Session initialized"
        );
        session.set_client_info(ClientInfo {
            protocol_version: protocol_version.to_string(),
            name: client.name,
            version: client.version,
        });

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": protocol_version,
                "capabilities": {
                    "tools": { "listChanged": false },
                    "logging": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    async fn call_tool(&self, session: &Session, id: Value, params: Value) -> JsonRpcResponse {
        let params: CallToolParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    format!("invalid tools/call params: {e}"),
                );
            }
        };

        let Some(tool) = self.tools.get(&params.name) else {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            );
        };

        let span =
            tracing::info_span!("tool_call", tool = %params.name, session_id = %session.id());
        let started = Instant::now();
        let result = tool.call(&self.ctx, params.arguments).instrument(span).await;
        let elapsed = started.elapsed();

        let result = match result {
            Ok(value) => {
                metrics::record_tool_call(&params.name, Outcome::Ok, elapsed);
                self.announce_change(&params.name, &value);
                ToolResult::json(&value)
            }
            Err(err) => {
                metrics::record_tool_call(&params.name, Outcome::Error, elapsed);
                tracing::warn!(
                    tool = %params.name,
                    code = %err.code(),
                    error = %err,
                    "Tool call failed"
                );
                ToolResult::error(&err)
            }
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
        }
    }

    fn set_level(&self, id: Value, params: Value) -> JsonRpcResponse {
        let params: SetLevelParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => return JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string()),
        };

        match self.ctx.config.set_log_level(&params.level, false) {
            Ok(_) => JsonRpcResponse::success(id, json!({})),
            Err(err) => JsonRpcResponse::gateway_error(id, INVALID_PARAMS, &err),
        }
    }

    fn announce_change(&self, tool: &str, update: &Value) {
        let Some(registry) = &self.announce else {
            return;
        };
        if !CONFIG_TOOLS.contains(&tool) {
            return;
        }
        let delivered = registry.broadcast(&notification(
            "notifications/message",
            json!({
                "level": "info",
                "logger": "config",
                "data": {
                    "tool": tool,
                    "current": update["current"],
                    "cacheCleared": update["cacheCleared"]
                }
            }),
        ));
        tracing::debug!(tool, delivered, "Announced configuration change");
    }

    /// Tool context shared by every call.
    #[must_use]
    pub const fn context(&self) -> &ToolContext {
        &self.ctx
    }
}
