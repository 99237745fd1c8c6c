// crates/ledger-bridge-mcp/src/server/tests.rs
// ============================================================================
// Module: MCP Server Unit Tests
// Description: JSON-RPC routing, error mapping, and request auditing.
// Purpose: Validate request handling without binding a transport.
// Dependencies: ledger-bridge-core, tempfile, tokio
// ============================================================================

//! ## Overview
//! Drives the transport-independent dispatcher directly with raw request
//! bytes over an in-memory pool.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use axum::http::StatusCode;
use ledger_bridge_core::ConnectionPool;
use ledger_bridge_core::InMemoryLedgerEngine;
use ledger_bridge_core::NoopAuditSink;
use ledger_bridge_core::PoolOptions;
use ledger_bridge_core::SessionId;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

use super::McpServer;
use super::Reply;
use super::dispatch;
use crate::audit::McpAuditEvent;
use crate::audit::McpAuditSink;
use crate::config::LedgerBridgeConfig;
use crate::config::ServerTransport;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Audit sink retaining request events.
#[derive(Default)]
struct RecordingSink {
    /// Recorded events.
    events: Mutex<Vec<McpAuditEvent>>,
}

impl McpAuditSink for RecordingSink {
    fn record(&self, event: &McpAuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Server plus its backing resources.
struct Fixture {
    /// Data directory root; kept alive for the test.
    _dir: TempDir,
    /// Server under test.
    server: McpServer,
    /// Request audit events.
    audit: Arc<RecordingSink>,
}

/// Builds a server over an in-memory pool admitting `max_sessions`.
fn fixture(max_sessions: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let options = PoolOptions {
        max_sessions,
        data_dir: dir.path().to_path_buf(),
        ..PoolOptions::default()
    };
    let pool =
        ConnectionPool::new(options, Arc::new(InMemoryLedgerEngine::new()), Arc::new(NoopAuditSink));
    let mut config = LedgerBridgeConfig::default();
    config.server.max_body_bytes = 4096;
    let audit = Arc::new(RecordingSink::default());
    let server = McpServer::new(config, pool, audit.clone());
    Fixture {
        _dir: dir,
        server,
        audit,
    }
}

/// Sends a request and decodes the response body.
async fn send(
    fx: &Fixture,
    transport: ServerTransport,
    session: Option<&str>,
    request: &Value,
) -> (Reply, Value) {
    let bytes = serde_json::to_vec(request).unwrap();
    let reply = dispatch(&fx.server.state, transport, session.map(SessionId::new), &bytes).await;
    let body = reply.body.as_ref().map_or(Value::Null, |body| serde_json::from_slice(body).unwrap());
    (reply, body)
}

/// Builds a `tools/call` request.
fn tool_call(name: &str, arguments: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
}

// ============================================================================
// SECTION: Protocol
// ============================================================================

#[tokio::test(start_paused = true)]
async fn notifications_get_no_response() {
    let fx = fixture(2);
    let request = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    let (reply, body) = send(&fx, ServerTransport::Stdio, Some("stdio"), &request).await;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    assert!(reply.body.is_none());
    assert_eq!(body, Value::Null);
}

#[tokio::test(start_paused = true)]
async fn wrong_version_and_unknown_methods_are_rejected() {
    let fx = fixture(2);
    let (reply, body) =
        send(&fx, ServerTransport::Stdio, Some("stdio"), &json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }))
            .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32600);

    let (_, body) = send(
        &fx,
        ServerTransport::Stdio,
        Some("stdio"),
        &json!({ "jsonrpc": "2.0", "id": 2, "method": "resources/list" }),
    )
    .await;
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(body["id"], 2);
}

#[tokio::test(start_paused = true)]
async fn oversized_requests_are_rejected() {
    let fx = fixture(2);
    let padding = "x".repeat(5000);
    let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping", "params": { "pad": padding } });
    let (reply, body) = send(&fx, ServerTransport::Stdio, Some("stdio"), &request).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], -32070);
}

#[tokio::test(start_paused = true)]
async fn tools_list_returns_definitions() {
    let fx = fixture(2);
    let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
    let (_, body) = send(&fx, ServerTransport::Stdio, Some("stdio"), &request).await;
    let tools = body["result"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|tool| tool["name"] == "budget_transfer"));
}

// ============================================================================
// SECTION: Sessions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn http_initialize_issues_sessions_until_capacity() {
    let fx = fixture(1);
    let initialize = json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" });
    let (reply, body) = send(&fx, ServerTransport::Http, None, &initialize).await;
    assert_eq!(body["result"]["protocolVersion"], super::PROTOCOL_VERSION);
    let issued = reply.issued_session.unwrap();
    assert_eq!(issued.as_str().len(), 32);

    let list = tool_call("ledger_list", &json!({ "entity": "payees" }));
    let (_, body) = send(&fx, ServerTransport::Http, Some(issued.as_str()), &list).await;
    assert_eq!(body["result"]["isError"], false);

    let (reply, body) = send(&fx, ServerTransport::Http, None, &initialize).await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(reply.issued_session.is_none());
    assert_eq!(body["error"]["code"], -32010);
    assert_eq!(body["error"]["data"], json!({ "current": 1, "max": 1, "kind": "capacity_exceeded" }));
}

#[tokio::test(start_paused = true)]
async fn http_tool_calls_require_a_session() {
    let fx = fixture(2);
    let list = tool_call("ledger_list", &json!({ "entity": "payees" }));
    let (reply, body) = send(&fx, ServerTransport::Http, None, &list).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(fx.server.pool().session_count(), 0);
}

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

#[tokio::test(start_paused = true)]
async fn validation_errors_carry_diagnostics() {
    let fx = fixture(2);
    let query = tool_call("ledger_query", &json!({ "query": "SELECT payeeName FROM transactions" }));
    let (_, body) = send(&fx, ServerTransport::Stdio, Some("stdio"), &query).await;
    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(body["error"]["data"]["kind"], "validation_failed");
    assert_eq!(body["error"]["data"]["diagnostics"][0]["suggestion"], "payee.name");
}

#[tokio::test(start_paused = true)]
async fn partial_batches_report_applied_steps() {
    let fx = fixture(2);
    let batch = tool_call(
        "ledger_batch",
        &json!({ "operations": [
            { "operation": "create", "arguments": { "entity": "payees", "data": { "name": "A" } } },
            { "operation": "delete", "arguments": { "entity": "payees", "id": "missing" } }
        ] }),
    );
    let (_, body) = send(&fx, ServerTransport::Stdio, Some("stdio"), &batch).await;
    assert_eq!(body["error"]["code"], -32040);
    assert_eq!(body["error"]["data"]["failed_step"], 1);
    assert_eq!(body["error"]["data"]["applied"], 1);
}

#[tokio::test(start_paused = true)]
async fn engine_errors_keep_their_message() {
    let fx = fixture(2);
    let get = tool_call("ledger_get", &json!({ "entity": "payees", "id": "nope" }));
    let (_, body) = send(&fx, ServerTransport::Stdio, Some("stdio"), &get).await;
    assert_eq!(body["error"]["code"], -32030);
    assert!(body["error"]["message"].as_str().unwrap().contains("payees nope not found"));
}

#[tokio::test(start_paused = true)]
async fn successful_calls_return_text_and_structured_content() {
    let fx = fixture(2);
    let create = tool_call("ledger_create", &json!({ "entity": "payees", "data": { "name": "A" } }));
    let (_, body) = send(&fx, ServerTransport::Stdio, Some("stdio"), &create).await;
    let structured = &body["result"]["structuredContent"];
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert_eq!(&serde_json::from_str::<Value>(text).unwrap(), structured);
    assert!(structured["id"].is_string());
}

// ============================================================================
// SECTION: Auditing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn every_request_is_audited() {
    let fx = fixture(2);
    let create = tool_call("ledger_create", &json!({ "entity": "payees", "data": { "name": "A" } }));
    send(&fx, ServerTransport::Stdio, Some("stdio"), &create).await;
    send(&fx, ServerTransport::Stdio, Some("stdio"), &tool_call("ledger_nope", &json!({}))).await;

    let events = fx.audit.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].tool.as_deref(), Some("ledger_create"));
    assert_eq!(events[0].session_id.as_deref(), Some("stdio"));
    assert_eq!(events[0].error_code, None);
    assert_eq!(events[1].error_code, Some(-32601));
    assert!(events.iter().all(|event| event.method == "tools/call" && event.request_bytes > 0));
}
