//! Streamable HTTP Transport
//!
//! Serves every MCP session over one listener and one path.
//!
//! # Endpoints
//!
//! - `POST {path}` - One JSON-RPC message. `initialize` without a session
//!   header opens a session and returns its id in `Mcp-Session-Id`
//! - `GET {path}` - Server-sent events carrying the session's notifications
//! - `DELETE {path}` - Close the session (idempotent)
//!
//! # Status Codes
//!
//! | Situation | Status |
//! |-----------|--------|
//! | Request answered | 200 |
//! | Notification or client response accepted | 202 |
//! | Session closed | 204 |
//! | Missing session header, malformed body | 400 |
//! | Unknown session, or session closed mid-request | 404 |

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use super::protocol::{
    INTERNAL_ERROR, InboundMessage, JsonRpcRequest, JsonRpcResponse, SESSION_ERROR,
};
use crate::domain::session::{Session, SessionError, SessionId, SessionRegistry};
use crate::error::GatewayError;
use crate::infrastructure::metrics::{self, Outcome, SessionEvent};

/// Session header name.
pub const SESSION_HEADER: &str = "mcp-session-id";

// =============================================================================
// Transport State
// =============================================================================

/// Shared state for the transport handlers.
#[derive(Debug)]
pub struct McpState {
    sessions: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl McpState {
    /// Create transport state.
    #[must_use]
    pub const fn new(sessions: Arc<SessionRegistry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            sessions,
            dispatcher,
        }
    }

    /// Session registry.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}

/// Build the transport router.
pub fn router(state: Arc<McpState>, path: &str) -> Router {
    Router::new()
        .route(
            path,
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// MCP transport HTTP server.
pub struct McpServer {
    path: String,
    state: Arc<McpState>,
    cancel: CancellationToken,
}

impl McpServer {
    /// Create the server.
    #[must_use]
    pub const fn new(path: String, state: Arc<McpState>, cancel: CancellationToken) -> Self {
        Self {
            path,
            state,
            cancel,
        }
    }

    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the address is unavailable.
    pub async fn bind(addr: &str) -> Result<TcpListener, McpServerError> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| McpServerError::BindFailed(addr.to_string(), e.to_string()))
    }

    /// Serve sessions on `listener` until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerFailed` if the HTTP server fails while running.
    pub async fn serve(self, listener: TcpListener) -> Result<(), McpServerError> {
        let addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        tracing::info!(addr = %addr, path = %self.path, "MCP transport listening");

        let app = router(self.state, &self.path);
        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| McpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("MCP transport stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn handle_post(
    State(state): State<Arc<McpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return rpc_response(
                StatusCode::BAD_REQUEST,
                None,
                &JsonRpcResponse::parse_error(format!("Parse error: {e}")),
            );
        }
    };

    let message = match InboundMessage::from_value(value) {
        Ok(message) => message,
        Err(response) => return rpc_response(StatusCode::BAD_REQUEST, None, &response),
    };

    let resolved = match state
        .sessions
        .resolve(session_header(&headers), message.is_initialize())
    {
        Ok(resolved) => resolved,
        Err(err) => {
            metrics::record_request(message.method().unwrap_or("response"), Outcome::Error);
            return session_error(message.request_id().cloned(), &err);
        }
    };

    let session = resolved.session;
    if resolved.created {
        metrics::record_session(SessionEvent::Opened, state.sessions.len());
        tracing::info!(session_id = %session.id(), "Session opened");
    }
    session.touch();

    match message {
        InboundMessage::Request(request) => {
            dispatch(&state, &session, request, resolved.created).await
        }
        InboundMessage::Notification { method, params } => {
            state
                .dispatcher
                .handle_notification(&session, Some(&method), &params);
            accepted(&session)
        }
        InboundMessage::Response { .. } => {
            state
                .dispatcher
                .handle_notification(&session, None, &Value::Null);
            accepted(&session)
        }
    }
}

/// Run one request on its own task, admitted in arrival order.
///
/// The result is discarded if the session closes first; the task itself
/// runs to completion. A session opened by a failed `initialize` is closed.
async fn dispatch(
    state: &McpState,
    session: &Arc<Session>,
    request: JsonRpcRequest,
    opened: bool,
) -> Response {
    let id = request.id.clone();
    let method = request.method.clone();
    let cancel = session.cancellation();

    let admission = session.admit().await;
    if session.is_closed() {
        return session_gone(&method, id, session.id());
    }

    let (started_tx, started_rx) = oneshot::channel::<()>();
    let dispatcher = Arc::clone(&state.dispatcher);
    let task_session = Arc::clone(session);
    let task = tokio::spawn(async move {
        let _ = started_tx.send(());
        dispatcher.handle_request(&task_session, request).await
    });
    // Hold admission until the dispatcher has the request.
    let _ = started_rx.await;
    drop(admission);

    tokio::select! {
        biased;
        () = cancel.cancelled() => session_gone(&method, id, session.id()),
        joined = task => match joined {
            Ok(_) if session.is_closed() => session_gone(&method, id, session.id()),
            Ok(response) if opened && response.error.is_some() => {
                close_session(&state.sessions, &session.id());
                rpc_response(StatusCode::OK, None, &response)
            }
            Ok(response) => rpc_response(StatusCode::OK, Some(session), &response),
            Err(e) => {
                tracing::error!(
                    session_id = %session.id(),
                    method = %method,
                    error = %e,
                    "Dispatch task failed"
                );
                rpc_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some(session),
                    &JsonRpcResponse::error(id, INTERNAL_ERROR, "internal error"),
                )
            }
        },
    }
}

async fn handle_get(State(state): State<Arc<McpState>>, headers: HeaderMap) -> Response {
    let session = match state.sessions.resolve(session_header(&headers), false) {
        Ok(resolved) => resolved.session,
        Err(err) => return session_error(None, &err),
    };
    session.touch();
    tracing::debug!(session_id = %session.id(), "Notification stream opened");

    let session_id = session.id();
    let stream = BroadcastStream::new(session.subscribe())
        .filter_map(move |message| async move {
            match message {
                Ok(value) => Event::default()
                    .event("message")
                    .json_data(value)
                    .ok()
                    .map(Ok::<Event, Infallible>),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(session_id = %session_id, skipped, "Notification stream lagged");
                    None
                }
            }
        })
        .take_until(session.cancellation().cancelled_owned());

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    attach_session_header(&mut response, &session);
    response
}

async fn handle_delete(State(state): State<Arc<McpState>>, headers: HeaderMap) -> Response {
    let Some(raw) = session_header(&headers) else {
        return session_error(None, &SessionError::MissingSessionId);
    };

    if let Ok(id) = raw.parse::<SessionId>() {
        close_session(&state.sessions, &id);
    }
    StatusCode::NO_CONTENT.into_response()
}

// =============================================================================
// Helpers
// =============================================================================

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn close_session(sessions: &SessionRegistry, id: &SessionId) {
    if sessions.close(id) {
        metrics::record_session(SessionEvent::Closed, sessions.len());
        tracing::info!(session_id = %id, "Session closed");
    }
}

fn attach_session_header(response: &mut Response, session: &Session) {
    if let Ok(value) = HeaderValue::from_str(&session.id().to_string()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
}

fn rpc_response(status: StatusCode, session: Option<&Session>, body: &JsonRpcResponse) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Some(session) = session {
        attach_session_header(&mut response, session);
    }
    response
}

fn accepted(session: &Session) -> Response {
    let mut response = StatusCode::ACCEPTED.into_response();
    attach_session_header(&mut response, session);
    response
}

fn session_error(id: Option<Value>, err: &SessionError) -> Response {
    let status = match err {
        SessionError::MissingSessionId | SessionError::Transport(_) => StatusCode::BAD_REQUEST,
        SessionError::UnknownSession(_) | SessionError::Closed(_) => StatusCode::NOT_FOUND,
    };
    tracing::debug!(error = %err, status = %status, "Rejected request");
    rpc_response(
        status,
        None,
        &JsonRpcResponse::gateway_error(
            id.unwrap_or(Value::Null),
            SESSION_ERROR,
            &GatewayError::from(err.clone()),
        ),
    )
}

fn session_gone(method: &str, id: Value, session_id: SessionId) -> Response {
    metrics::record_request(method, Outcome::Discarded);
    tracing::debug!(session_id = %session_id, method, "Discarding result for closed session");
    session_error(Some(id), &SessionError::Closed(session_id))
}

// =============================================================================
// Errors
// =============================================================================

/// Transport server errors.
#[derive(Debug, thiserror::Error)]
pub enum McpServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::mcp::tools::ToolRegistry;
    use crate::infrastructure::mcp::tools::testing::context;

    fn app() -> (Router, Arc<McpState>) {
        let (ctx, _) = context();
        let state = Arc::new(McpState::new(
            Arc::new(SessionRegistry::default()),
            Arc::new(Dispatcher::new(ToolRegistry::standard(), ctx)),
        ));
        (router(Arc::clone(&state), "/mcp"), state)
    }

    fn post(session: Option<&str>, body: &Value) -> Request<Body> {
        let mut builder = Request::post("/mcp").header("content-type", "application/json");
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let (app, state) = app();
        let response = app
            .oneshot(
                Request::post("/mcp")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], -32700);
        assert!(state.sessions().is_empty());
    }

    #[tokio::test]
    async fn notifications_are_accepted() {
        let (app, state) = app();
        let init = app
            .clone()
            .oneshot(post(
                None,
                &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
            ))
            .await
            .unwrap();
        let id = init.headers()[SESSION_HEADER].to_str().unwrap().to_string();

        let response = app
            .oneshot(post(
                Some(&id),
                &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(state.sessions().len(), 1);
    }

    #[tokio::test]
    async fn failed_initialize_does_not_leak_a_session() {
        let (app, state) = app();
        let response = app
            .oneshot(post(
                None,
                &json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {"protocolVersion": 7}
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(json_body(response).await["error"].is_object());
        assert!(state.sessions().is_empty());
    }

    #[tokio::test]
    async fn delete_without_header_is_bad_request() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::delete("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn closed_session_discards_in_flight_result() {
        let (_, state) = app();
        let session = state.sessions().resolve(None, true).unwrap().session;
        let admission = session.admit().await;

        let request = JsonRpcRequest {
            id: json!(9),
            method: "ping".to_string(),
            params: Value::Null,
        };
        let pending = {
            let state = Arc::clone(&state);
            let session = Arc::clone(&session);
            tokio::spawn(async move { dispatch(&state, &session, request, false).await })
        };

        state.sessions().close(&session.id());
        drop(admission);
        let response = pending.await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["data"]["error"], "TRANSPORT_ERROR");
    }
}
