// crates/ledger-bridge-mcp/src/process_engine/tests.rs
// ============================================================================
// Module: Process Engine Unit Tests
// Description: Sidecar request framing and error classification.
// Purpose: Validate the sidecar protocol against an in-process fake.
// Dependencies: ledger-bridge-core, tempfile, tokio
// ============================================================================

//! ## Overview
//! Connects [`SidecarHandle`] to a fake sidecar over an in-memory duplex pipe
//! and checks request encoding, result decoding, and retry classification.

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

use ledger_bridge_core::EngineErrorKind;
use ledger_bridge_core::EngineOpenRequest;
use ledger_bridge_core::EngineOperation;
use ledger_bridge_core::LedgerEngine;
use ledger_bridge_core::LedgerHandle;
use serde_json::Value;
use serde_json::json;
use tokio::io::BufReader;

use super::ProcessLedgerEngine;
use super::SidecarHandle;
use crate::framing::read_frame;
use crate::framing::write_frame;

// ============================================================================
// SECTION: Fake Sidecar
// ============================================================================

/// Connects a handle to a fake sidecar answering with `respond`.
fn fake_sidecar<F>(respond: F) -> SidecarHandle
where
    F: Fn(&Value) -> Value + Send + 'static,
{
    let (client, sidecar) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let (sidecar_read, mut sidecar_write) = tokio::io::split(sidecar);
    tokio::spawn(async move {
        let mut reader = BufReader::new(sidecar_read);
        while let Ok(bytes) = read_frame(&mut reader, 1024 * 1024).await {
            let request: Value = serde_json::from_slice(&bytes).unwrap();
            let response = respond(&request);
            let payload = serde_json::to_vec(&response).unwrap();
            if write_frame(&mut sidecar_write, &payload).await.is_err() {
                break;
            }
        }
    });
    SidecarHandle::new(client_read, client_write, None)
}

/// Builds a success response echoing the request.
fn echo(request: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "result": { "method": request["method"], "params": request["params"] }
    })
}

// ============================================================================
// SECTION: Requests
// ============================================================================

#[tokio::test]
async fn invoke_sends_the_operation_and_returns_the_result() {
    let handle = fake_sidecar(echo);
    let operation = EngineOperation::mutation("create", json!({ "entity": "payees" }));
    let result = handle.invoke(&operation).await.unwrap();
    assert_eq!(result["method"], "invoke");
    assert_eq!(result["params"]["name"], "create");
    assert_eq!(result["params"]["kind"], "mutation");
    assert_eq!(result["params"]["arguments"]["entity"], "payees");
}

#[tokio::test]
async fn request_ids_increase_per_call() {
    let handle = fake_sidecar(|request| {
        json!({ "jsonrpc": "2.0", "id": request["id"], "result": request["id"] })
    });
    assert_eq!(handle.call("synchronize", json!({})).await.unwrap(), 1);
    assert_eq!(handle.call("synchronize", json!({})).await.unwrap(), 2);
}

#[tokio::test]
async fn load_replica_passes_ledger_and_password() {
    let handle = fake_sidecar(|request| {
        assert_eq!(request["params"], json!({ "ledger_id": "household", "password": "pw" }));
        json!({ "jsonrpc": "2.0", "id": request["id"], "result": null })
    });
    handle.load_replica("household", Some("pw")).await.unwrap();
}

// ============================================================================
// SECTION: Error Classification
// ============================================================================

#[tokio::test]
async fn sidecar_errors_follow_the_transient_flag() {
    let handle = fake_sidecar(|request| {
        let transient = request["method"] == "synchronize";
        json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": { "code": -1, "message": "server busy", "data": { "transient": transient } }
        })
    });
    let error = handle.synchronize().await.unwrap_err();
    assert_eq!(error.kind, EngineErrorKind::Transient);
    assert_eq!(error.message, "server busy");

    let error = handle.load_replica("household", None).await.unwrap_err();
    assert_eq!(error.kind, EngineErrorKind::Permanent);
}

#[tokio::test]
async fn mismatched_response_ids_are_permanent() {
    let handle = fake_sidecar(|_| json!({ "jsonrpc": "2.0", "id": 999, "result": {} }));
    let error = handle.synchronize().await.unwrap_err();
    assert_eq!(error.kind, EngineErrorKind::Permanent);
    assert!(error.message.contains("id mismatch"));
}

#[tokio::test]
async fn closed_pipes_are_transient() {
    let (client, sidecar) = tokio::io::duplex(1024);
    drop(sidecar);
    let (client_read, client_write) = tokio::io::split(client);
    let handle = SidecarHandle::new(client_read, client_write, None);
    let error = handle.synchronize().await.unwrap_err();
    assert_eq!(error.kind, EngineErrorKind::Transient);
}

// ============================================================================
// SECTION: Spawning
// ============================================================================

#[tokio::test]
async fn missing_sidecar_binary_is_permanent() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ProcessLedgerEngine::new(vec!["/nonexistent/ledger-sidecar".to_string()]);
    let request = EngineOpenRequest {
        working_dir: dir.path().to_path_buf(),
        server_url: "http://localhost:5006".to_string(),
        credential: None,
    };
    let Err(error) = engine.open(request).await else {
        panic!("expected spawn failure");
    };
    assert_eq!(error.kind, EngineErrorKind::Permanent);
    assert!(error.message.contains("ledger-sidecar"));
}

#[tokio::test]
async fn empty_command_is_permanent() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ProcessLedgerEngine::new(Vec::new());
    let request = EngineOpenRequest {
        working_dir: dir.path().to_path_buf(),
        server_url: "http://localhost:5006".to_string(),
        credential: None,
    };
    let Err(error) = engine.open(request).await else {
        panic!("expected empty command failure");
    };
    assert_eq!(error.kind, EngineErrorKind::Permanent);
}
