// crates/ledger-bridge-mcp/tests/http_transport.rs
// ============================================================================
// Module: HTTP Transport Tests
// Description: Session issuance, tool calls, and session close over HTTP.
// Purpose: Validate the axum transport end to end on a loopback socket.
// Dependencies: ledger-bridge-mcp, tokio
// ============================================================================

//! ## Overview
//! Binds the HTTP transport to an ephemeral loopback port and drives it with
//! a minimal HTTP/1.1 client.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions are permitted."
)]

mod common;

use std::net::SocketAddr;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::common::Harness;
use crate::common::harness;
use crate::common::http;
use crate::common::request;
use crate::common::tool_call;

/// Running HTTP server.
struct Running {
    /// Bound address.
    addr: SocketAddr,
    /// Shutdown trigger.
    stop: oneshot::Sender<()>,
    /// Server task.
    task: JoinHandle<()>,
}

/// Starts the harness server on an ephemeral port.
async fn start(h: &Harness) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = h.server.clone();
    let task = tokio::spawn(async move {
        server
            .serve_http(listener, async move {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    Running {
        addr,
        stop,
        task,
    }
}

impl Running {
    /// Stops the server and waits for it to exit.
    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap();
    }
}

#[tokio::test]
async fn initialize_issues_a_session_used_by_tool_calls() {
    let h = harness(4);
    let server = start(&h).await;

    let init = http(server.addr, "POST", None, &request(1, "initialize", json!({})).to_string()).await;
    assert_eq!(init.status, 200);
    let session = init.header("mcp-session-id").unwrap().to_string();
    assert_eq!(init.json()["result"]["protocolVersion"], "2024-11-05");

    let create = tool_call(2, "ledger_create", json!({ "entity": "payees", "data": { "name": "A" } }));
    let reply = http(server.addr, "POST", Some(&session), &create.to_string()).await;
    assert_eq!(reply.status, 200);
    assert!(reply.json()["result"]["structuredContent"]["id"].is_string());
    assert!(reply.header("mcp-session-id").is_none());

    let stats = h.server.pool().stats();
    assert_eq!(stats.sessions[0].session_id, session);
    server.stop().await;
}

#[tokio::test]
async fn delete_closes_the_session_once() {
    let h = harness(4);
    let server = start(&h).await;
    let list = tool_call(1, "ledger_list", json!({ "entity": "payees" })).to_string();
    assert_eq!(http(server.addr, "POST", Some("client-a"), &list).await.status, 200);

    assert_eq!(http(server.addr, "DELETE", Some("client-a"), "").await.status, 204);
    assert_eq!(http(server.addr, "DELETE", Some("client-a"), "").await.status, 404);
    assert_eq!(http(server.addr, "DELETE", None, "").await.status, 400);
    assert_eq!(h.server.pool().session_count(), 0);
    assert_eq!(h.audit.count("session_closed"), 1);
    server.stop().await;
}

#[tokio::test]
async fn capacity_is_reported_at_initialize() {
    let h = harness(1);
    let server = start(&h).await;
    let list = tool_call(1, "ledger_list", json!({ "entity": "payees" })).to_string();
    assert_eq!(http(server.addr, "POST", Some("first"), &list).await.status, 200);

    let init = http(server.addr, "POST", None, &request(2, "initialize", json!({})).to_string()).await;
    assert_eq!(init.status, 503);
    assert!(init.header("mcp-session-id").is_none());
    assert_eq!(init.json()["error"]["code"], -32010);

    let reply = http(server.addr, "POST", Some("second"), &list).await;
    assert_eq!(reply.json()["error"]["code"], -32010);
    assert_eq!(h.audit.count("session_rejected"), 1);
    server.stop().await;
}

#[tokio::test]
async fn tool_calls_without_a_session_are_bad_requests() {
    let h = harness(4);
    let server = start(&h).await;
    let list = tool_call(1, "ledger_list", json!({ "entity": "payees" })).to_string();
    let reply = http(server.addr, "POST", None, &list).await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.json()["error"]["code"], -32600);
    server.stop().await;
}
