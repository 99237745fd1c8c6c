// crates/ledger-bridge-mcp/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared server harness and raw protocol clients.
// Purpose: Build MCP servers over the in-memory engine and talk to them.
// Dependencies: ledger-bridge-mcp, ledger-bridge-core, tempfile, tokio
// ============================================================================

//! ## Overview
//! Provides a server harness over an in-memory pool, a Content-Length frame
//! encoder for stdio tests, and a minimal HTTP/1.1 client for HTTP tests.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::unwrap_in_result,
    reason = "Test fixtures favor direct unwraps for setup clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use ledger_bridge_core::ConnectionPool;
use ledger_bridge_core::InMemoryLedgerEngine;
use ledger_bridge_core::MemoryAuditSink;
use ledger_bridge_core::PoolOptions;
use ledger_bridge_mcp::LedgerBridgeConfig;
use ledger_bridge_mcp::McpServer;
use ledger_bridge_mcp::NoopAuditSink;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Server plus the collaborators tests inspect.
pub struct Harness {
    /// Data directory root.
    pub dir: TempDir,
    /// Engine shared with the pool.
    pub engine: InMemoryLedgerEngine,
    /// Pool lifecycle audit records.
    pub audit: Arc<MemoryAuditSink>,
    /// Server under test.
    pub server: Arc<McpServer>,
}

/// Builds a server admitting `max_sessions` over an in-memory pool.
pub fn harness(max_sessions: usize) -> Harness {
    let dir = TempDir::new().unwrap();
    let options = PoolOptions {
        max_sessions,
        data_dir: dir.path().to_path_buf(),
        ledger_id: "household".to_string(),
        ..PoolOptions::default()
    };
    let engine = InMemoryLedgerEngine::new();
    let audit = Arc::new(MemoryAuditSink::new());
    let pool = ConnectionPool::new(options, Arc::new(engine.clone()), audit.clone());
    let server = McpServer::new(LedgerBridgeConfig::default(), pool, Arc::new(NoopAuditSink));
    Harness {
        dir,
        engine,
        audit,
        server: Arc::new(server),
    }
}

/// Builds a JSON-RPC request.
pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Builds a `tools/call` request.
pub fn tool_call(id: u64, name: &str, arguments: Value) -> Value {
    request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

// ============================================================================
// SECTION: Stdio Framing
// ============================================================================

/// Encodes requests as consecutive Content-Length frames.
pub fn frames(requests: &[Value]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for request in requests {
        let payload = serde_json::to_vec(request).unwrap();
        bytes.extend_from_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
        bytes.extend_from_slice(&payload);
    }
    bytes
}

// ============================================================================
// SECTION: HTTP Client
// ============================================================================

/// Parsed HTTP response.
pub struct HttpReply {
    /// Status code.
    pub status: u16,
    /// Lower-cased header names with their values.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: String,
}

impl HttpReply {
    /// Returns the first value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Sends one request to `/mcp` on a fresh connection.
pub async fn http(addr: SocketAddr, method: &str, session: Option<&str>, body: &str) -> HttpReply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut head = format!(
        "{method} /mcp HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Type: \
         application/json\r\nContent-Length: {}\r\n",
        body.len()
    );
    if let Some(session) = session {
        write!(head, "mcp-session-id: {session}\r\n").unwrap();
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    let mut lines = head.lines();
    let status = lines.next().unwrap().split_whitespace().nth(1).unwrap().parse().unwrap();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    HttpReply {
        status,
        headers,
        body: body.to_string(),
    }
}
