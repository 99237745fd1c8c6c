// crates/ledger-bridge-mcp/src/server.rs
// ============================================================================
// Module: MCP Server
// Description: MCP server bootstrap and transport handling.
// Purpose: Serve JSON-RPC tool calls over stdio or HTTP.
// Dependencies: ledger-bridge-core, axum, tokio, rand
// ============================================================================

//! ## Overview
//! The MCP server accepts JSON-RPC 2.0 requests and forwards tool calls to
//! [`ToolRouter`]. The stdio transport serves the single session `stdio`;
//! the HTTP transport serves `POST /mcp` with the session carried in the
//! `mcp-session-id` header and closes sessions on `DELETE /mcp`.
//!
//! ## Invariants
//! - HTTP `initialize` without a session issues a new random identifier only
//!   when the pool can admit another session.
//! - Core errors reach the client with their original message.
//! - The pool is shut down exactly once when serving ends.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::post;
use ledger_bridge_core::BridgeError;
use ledger_bridge_core::ConnectionPool;
use ledger_bridge_core::SessionId;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncWrite;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::time::Instant;

use crate::audit::AuditSinks;
use crate::audit::McpAuditEvent;
use crate::audit::McpAuditEventParams;
use crate::audit::McpAuditSink;
use crate::config::LedgerBridgeConfig;
use crate::config::ServerTransport;
use crate::engine::build_engine;
use crate::framing::FrameError;
use crate::framing::read_frame;
use crate::framing::write_frame;
use crate::tools::RequestContext;
use crate::tools::STDIO_SESSION_ID;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;
use crate::tools::ToolRouter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// HTTP header carrying the session identifier.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP route serving JSON-RPC.
pub const MCP_PATH: &str = "/mcp";

/// MCP protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Fallback body used when a response cannot be serialized.
const SERIALIZATION_FAILED_BODY: &str = concat!(
    "{\"jsonrpc\":\"2.0\",\"id\":null,",
    "\"error\":{\"code\":-32060,\"message\":\"serialization failed\"}}"
);

// ============================================================================
// SECTION: MCP Server
// ============================================================================

/// MCP server instance.
pub struct McpServer {
    /// Server configuration.
    config: LedgerBridgeConfig,
    /// State shared with transport handlers.
    state: Arc<ServerState>,
}

/// Shared server state for request handlers.
struct ServerState {
    /// Tool router over the connection pool.
    router: ToolRouter,
    /// Request audit sink.
    audit: Arc<dyn McpAuditSink>,
    /// Maximum request body size.
    max_body_bytes: usize,
}

impl McpServer {
    /// Builds a new MCP server from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when configuration is invalid, a secret
    /// cannot be resolved, or the audit sink cannot be opened.
    pub fn from_config(config: LedgerBridgeConfig) -> Result<Self, McpServerError> {
        config.validate().map_err(|err| McpServerError::Config(err.to_string()))?;
        let options = config.pool_options().map_err(|err| McpServerError::Config(err.to_string()))?;
        let sinks = AuditSinks::from_config(&config.audit)
            .map_err(|err| McpServerError::Init(format!("audit sink unavailable: {err}")))?;
        let pool = ConnectionPool::new(options, build_engine(&config.engine), sinks.pool);
        Ok(Self::new(config, pool, sinks.mcp))
    }

    /// Builds a server over an existing pool.
    #[must_use]
    pub fn new(
        config: LedgerBridgeConfig,
        pool: ConnectionPool,
        audit: Arc<dyn McpAuditSink>,
    ) -> Self {
        let max_body_bytes = config.server.max_body_bytes;
        Self {
            config,
            state: Arc::new(ServerState {
                router: ToolRouter::new(pool),
                audit,
                max_body_bytes,
            }),
        }
    }

    /// Returns the connection pool behind the server.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        self.state.router.pool()
    }

    /// Serves requests on the configured transport until the client
    /// disconnects or ctrl-c is received, then shuts the pool down.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when the transport fails.
    pub async fn serve(self) -> Result<(), McpServerError> {
        self.pool().start();
        let result = match self.config.server.transport {
            ServerTransport::Stdio => {
                let reader = BufReader::new(tokio::io::stdin());
                let writer = tokio::io::stdout();
                tokio::select! {
                    result = self.serve_stream(reader, writer) => result,
                    () = shutdown_signal() => Ok(()),
                }
            }
            ServerTransport::Http => {
                let addr = self
                    .config
                    .server
                    .bind_addr()
                    .map_err(|err| McpServerError::Config(err.to_string()))?;
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|_| McpServerError::Transport("http bind failed".to_string()))?;
                self.serve_http(listener, shutdown_signal()).await
            }
        };
        self.pool().shutdown_all().await;
        result
    }

    /// Serves framed JSON-RPC on a byte stream for the `stdio` session.
    ///
    /// Returns when the peer closes the stream between frames.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError::Transport`] on malformed frames or write
    /// failures.
    pub async fn serve_stream<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
    ) -> Result<(), McpServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let session = SessionId::new(STDIO_SESSION_ID);
        loop {
            let bytes = match read_frame(&mut reader, self.state.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(FrameError::Closed) => return Ok(()),
                Err(err) => return Err(McpServerError::Transport(err.to_string())),
            };
            let reply =
                dispatch(&self.state, ServerTransport::Stdio, Some(session.clone()), &bytes).await;
            if let Some(body) = reply.body {
                write_frame(&mut writer, &body)
                    .await
                    .map_err(|err| McpServerError::Transport(err.to_string()))?;
            }
        }
    }

    /// Serves HTTP on `listener` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError::Transport`] when the HTTP server fails.
    pub async fn serve_http<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), McpServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.http_app().into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|_| McpServerError::Transport("http server failed".to_string()))
    }

    /// Builds the HTTP router.
    fn http_app(&self) -> Router {
        Router::new()
            .route(MCP_PATH, post(handle_http_post).delete(handle_http_delete))
            .layer(DefaultBodyLimit::max(self.state.max_body_bytes))
            .with_state(Arc::clone(&self.state))
    }
}

/// Resolves on ctrl-c; never resolves when the handler cannot be installed.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// Handles `POST /mcp`.
async fn handle_http_post(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let reply = match session_from_headers(&headers) {
        Ok(session) => dispatch(&state, ServerTransport::Http, session, &body).await,
        Err(message) => Reply::encode(Outcome::error(
            Value::Null,
            StatusCode::BAD_REQUEST,
            -32600,
            message,
            None,
        )),
    };
    let mut response = match reply.body {
        Some(body) => (reply.status, [(CONTENT_TYPE, "application/json")], body).into_response(),
        None => reply.status.into_response(),
    };
    if let Some(session) = reply.issued_session
        && let Ok(value) = HeaderValue::from_str(session.as_str())
    {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Handles `DELETE /mcp` by closing the header's session.
async fn handle_http_delete(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> StatusCode {
    match session_from_headers(&headers) {
        Ok(Some(session)) => {
            if state.router.pool().shutdown_connection(&session).await {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::NOT_FOUND
            }
        }
        Ok(None) | Err(_) => StatusCode::BAD_REQUEST,
    }
}

/// Reads the session header, if present.
fn session_from_headers(headers: &HeaderMap) -> Result<Option<SessionId>, String> {
    let Some(value) = headers.get(SESSION_HEADER) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| format!("invalid {SESSION_HEADER} header"))?;
    let session = SessionId::new(value.trim());
    if !session.is_valid() {
        return Err(format!("invalid {SESSION_HEADER} header"));
    }
    Ok(Some(session))
}

// ============================================================================
// SECTION: JSON-RPC Handling
// ============================================================================

/// Incoming JSON-RPC request payload.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    jsonrpc: String,
    /// Request identifier; absent for notifications.
    #[serde(default)]
    id: Option<Value>,
    /// Method name.
    method: String,
    /// Optional parameters payload.
    #[serde(default)]
    params: Option<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    jsonrpc: &'static str,
    /// Request identifier.
    id: Value,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    /// Error code.
    code: i64,
    /// Error message.
    message: String,
    /// Structured error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Tool call parameters.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    /// Tool name.
    name: String,
    /// Tool arguments payload.
    #[serde(default)]
    arguments: Value,
}

/// Tool list response payload.
#[derive(Debug, Serialize)]
struct ToolListResult {
    /// Tool definitions.
    tools: Vec<ToolDefinition>,
}

/// Routed request outcome before encoding.
struct Outcome {
    /// HTTP status for the HTTP transport.
    status: StatusCode,
    /// Response envelope; `None` for notifications.
    response: Option<JsonRpcResponse>,
    /// Session issued by `initialize`.
    issued_session: Option<SessionId>,
}

impl Outcome {
    /// Builds a success outcome.
    const fn result(id: Value, result: Value) -> Self {
        Self {
            status: StatusCode::OK,
            response: Some(JsonRpcResponse {
                jsonrpc: "2.0",
                id,
                result: Some(result),
                error: None,
            }),
            issued_session: None,
        }
    }

    /// Builds an error outcome.
    const fn error(
        id: Value,
        status: StatusCode,
        code: i64,
        message: String,
        data: Option<Value>,
    ) -> Self {
        Self {
            status,
            response: Some(JsonRpcResponse {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(JsonRpcError {
                    code,
                    message,
                    data,
                }),
            }),
            issued_session: None,
        }
    }

    /// Builds the outcome for a notification.
    const fn accepted() -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            response: None,
            issued_session: None,
        }
    }
}

/// Encoded reply ready for a transport.
struct Reply {
    /// HTTP status for the HTTP transport.
    status: StatusCode,
    /// Serialized response; `None` for notifications.
    body: Option<Vec<u8>>,
    /// Session issued by `initialize`.
    issued_session: Option<SessionId>,
    /// JSON-RPC error code, when the reply is an error.
    error_code: Option<i64>,
}

impl Reply {
    /// Serializes an outcome.
    fn encode(outcome: Outcome) -> Self {
        let error_code = outcome
            .response
            .as_ref()
            .and_then(|response| response.error.as_ref())
            .map(|error| error.code);
        let body = outcome.response.map(|response| {
            serde_json::to_vec(&response)
                .unwrap_or_else(|_| SERIALIZATION_FAILED_BODY.as_bytes().to_vec())
        });
        Self {
            status: outcome.status,
            body,
            issued_session: outcome.issued_session,
            error_code,
        }
    }
}

/// Request details captured for auditing.
#[derive(Default)]
struct RequestTrace {
    /// JSON-RPC method.
    method: String,
    /// Tool name for `tools/call`.
    tool: Option<String>,
    /// Request identifier.
    request_id: Option<String>,
}

/// Routes one request and records its audit event.
async fn dispatch(
    state: &ServerState,
    transport: ServerTransport,
    session: Option<SessionId>,
    bytes: &[u8],
) -> Reply {
    let started = Instant::now();
    let mut trace = RequestTrace::default();
    let outcome = route(state, transport, session.clone(), bytes, &mut trace).await;
    let reply = Reply::encode(outcome);
    let session_id = reply.issued_session.as_ref().or(session.as_ref()).map(ToString::to_string);
    state.audit.record(&McpAuditEvent::new(McpAuditEventParams {
        request_id: trace.request_id,
        transport,
        session_id,
        method: trace.method,
        tool: trace.tool,
        error_code: reply.error_code,
        request_bytes: bytes.len(),
        response_bytes: reply.body.as_ref().map_or(0, Vec::len),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }));
    reply
}

/// Routes one request to its handler.
async fn route(
    state: &ServerState,
    transport: ServerTransport,
    session: Option<SessionId>,
    bytes: &[u8],
    trace: &mut RequestTrace,
) -> Outcome {
    if bytes.len() > state.max_body_bytes {
        return Outcome::error(
            Value::Null,
            StatusCode::PAYLOAD_TOO_LARGE,
            -32070,
            "request body too large".to_string(),
            None,
        );
    }
    let Ok(request) = serde_json::from_slice::<JsonRpcRequest>(bytes) else {
        return Outcome::error(
            Value::Null,
            StatusCode::BAD_REQUEST,
            -32600,
            "invalid json-rpc request".to_string(),
            None,
        );
    };
    trace.method.clone_from(&request.method);
    if request.jsonrpc != "2.0" {
        return Outcome::error(
            request.id.unwrap_or(Value::Null),
            StatusCode::BAD_REQUEST,
            -32600,
            "invalid json-rpc version".to_string(),
            None,
        );
    }
    let Some(id) = request.id else {
        return Outcome::accepted();
    };
    trace.request_id = Some(id.to_string());
    match request.method.as_str() {
        "initialize" => initialize(state, transport, session.as_ref(), id),
        "ping" => Outcome::result(id, json!({})),
        "tools/list" => match serde_json::to_value(ToolListResult {
            tools: state.router.list_tools(),
        }) {
            Ok(value) => Outcome::result(id, value),
            Err(_) => jsonrpc_error(id, ToolError::Serialization),
        },
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let Ok(call) = serde_json::from_value::<ToolCallParams>(params) else {
                return jsonrpc_error(
                    id,
                    ToolError::InvalidParams("invalid tools/call params".to_string()),
                );
            };
            trace.tool = Some(call.name.clone());
            let Some(session_id) = session else {
                return Outcome::error(
                    id,
                    StatusCode::BAD_REQUEST,
                    -32600,
                    format!("missing {SESSION_HEADER} header"),
                    None,
                );
            };
            let context = RequestContext {
                transport,
                session_id,
                request_id: trace.request_id.clone(),
            };
            match state.router.handle_tool_call(&context, &call.name, call.arguments).await {
                Ok(value) => tool_result(id, value),
                Err(err) => jsonrpc_error(id, err),
            }
        }
        _ => Outcome::error(
            id,
            StatusCode::BAD_REQUEST,
            -32601,
            "method not found".to_string(),
            None,
        ),
    }
}

/// Handles `initialize`, issuing an HTTP session when none was supplied.
fn initialize(
    state: &ServerState,
    transport: ServerTransport,
    session: Option<&SessionId>,
    id: Value,
) -> Outcome {
    let issued = if transport == ServerTransport::Http && session.is_none() {
        let pool = state.router.pool();
        if pool.is_closed() {
            return jsonrpc_error(id, ToolError::Bridge(BridgeError::PoolShutdown));
        }
        if !pool.can_accept_new_session() {
            let stats = pool.stats();
            return jsonrpc_error(
                id,
                ToolError::Bridge(BridgeError::CapacityExceeded {
                    current: stats.admitted_sessions,
                    max: stats.max_sessions,
                }),
            );
        }
        Some(new_session_id())
    } else {
        None
    };
    let mut outcome = Outcome::result(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "ledger-bridge", "version": env!("CARGO_PKG_VERSION") }
        }),
    );
    outcome.issued_session = issued;
    outcome
}

/// Generates a random 128-bit session identifier.
fn new_session_id() -> SessionId {
    let value: u128 = rand::random();
    SessionId::new(format!("{value:032x}"))
}

/// Wraps a tool result in MCP content.
fn tool_result(id: Value, value: Value) -> Outcome {
    let Ok(text) = serde_json::to_string(&value) else {
        return jsonrpc_error(id, ToolError::Serialization);
    };
    Outcome::result(
        id,
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": value,
            "isError": false
        }),
    )
}

/// Builds a JSON-RPC error outcome for a tool failure.
fn jsonrpc_error(id: Value, error: ToolError) -> Outcome {
    let (status, code, data) = match &error {
        ToolError::UnknownTool(_) => (StatusCode::BAD_REQUEST, -32601, None),
        ToolError::InvalidParams(_) => (StatusCode::BAD_REQUEST, -32602, None),
        ToolError::Serialization => (StatusCode::OK, -32060, None),
        ToolError::Bridge(err) => {
            let (status, code, mut data) = match err {
                BridgeError::CapacityExceeded {
                    current,
                    max,
                } => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    -32010,
                    json!({ "current": current, "max": max }),
                ),
                BridgeError::Validation {
                    diagnostics,
                } => (StatusCode::BAD_REQUEST, -32602, json!({ "diagnostics": diagnostics })),
                BridgeError::Initialization {
                    ..
                }
                | BridgeError::Engine {
                    ..
                } => (StatusCode::OK, -32030, json!({})),
                BridgeError::PartialBatchFailure {
                    failed_step,
                    applied,
                    ..
                } => (
                    StatusCode::OK,
                    -32040,
                    json!({ "failed_step": failed_step, "applied": applied }),
                ),
                BridgeError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, -32602, json!({})),
                BridgeError::PoolShutdown => (StatusCode::SERVICE_UNAVAILABLE, -32050, json!({})),
                BridgeError::SessionClosed(_) | BridgeError::Io(_) | BridgeError::Internal(_) => {
                    (StatusCode::OK, -32050, json!({}))
                }
            };
            if let Some(object) = data.as_object_mut() {
                object.insert("kind".to_string(), Value::String(err.kind().to_string()));
            }
            (status, code, Some(data))
        }
    };
    Outcome::error(id, status, code, error.to_string(), data)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// MCP server errors.
#[derive(Debug, thiserror::Error)]
pub enum McpServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
