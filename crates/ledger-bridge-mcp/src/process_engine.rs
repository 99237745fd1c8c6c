// crates/ledger-bridge-mcp/src/process_engine.rs
// ============================================================================
// Module: Process Ledger Engine
// Description: Ledger engine backed by a sidecar process per session.
// Purpose: Drive an external ledger runtime over framed JSON-RPC on stdio.
// Dependencies: ledger-bridge-core, tokio, serde_json
// ============================================================================

//! ## Overview
//! [`ProcessLedgerEngine`] spawns the configured command once per session
//! with the session's working directory as its current directory. Requests
//! are JSON-RPC 2.0 messages in Content-Length frames: `open`,
//! `load_replica`, `invoke`, `synchronize`, and `shutdown`.
//!
//! ## Invariants
//! - One request is outstanding per sidecar at a time.
//! - Sidecar errors with `data.transient == true` are transient; all other
//!   sidecar errors are permanent.
//! - A closed or failing pipe is transient.
//! - The child is killed when its handle is dropped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use ledger_bridge_core::EngineError;
use ledger_bridge_core::EngineOpenRequest;
use ledger_bridge_core::EngineOperation;
use ledger_bridge_core::LedgerEngine;
use ledger_bridge_core::LedgerHandle;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::framing::FrameError;
use crate::framing::read_frame;
use crate::framing::write_frame;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest sidecar response accepted.
pub const MAX_SIDECAR_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Time a sidecar gets to exit after `shutdown` before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Engine that runs one sidecar process per session.
#[derive(Debug, Clone)]
pub struct ProcessLedgerEngine {
    /// Program followed by its arguments.
    command: Vec<String>,
}

impl ProcessLedgerEngine {
    /// Creates an engine that launches `command`.
    #[must_use]
    pub const fn new(command: Vec<String>) -> Self {
        Self {
            command,
        }
    }

    /// Spawns the sidecar for one session.
    fn spawn(&self, request: &EngineOpenRequest) -> Result<Child, EngineError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| EngineError::permanent("sidecar command is empty"))?;
        Command::new(program)
            .args(args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| spawn_error(program, &err))
    }
}

#[async_trait]
impl LedgerEngine for ProcessLedgerEngine {
    async fn open(&self, request: EngineOpenRequest) -> Result<Arc<dyn LedgerHandle>, EngineError> {
        let mut child = self.spawn(&request)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::permanent("sidecar stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::permanent("sidecar stdout unavailable"))?;
        let handle = SidecarHandle::new(stdout, stdin, Some(child));
        let params = json!({
            "working_dir": request.working_dir.display().to_string(),
            "server_url": request.server_url,
            "credential": request.credential,
        });
        if let Err(err) = handle.call("open", params).await {
            handle.terminate(Duration::ZERO).await;
            return Err(err);
        }
        Ok(Arc::new(handle))
    }
}

/// Classifies a spawn failure.
fn spawn_error(program: &str, err: &io::Error) -> EngineError {
    let message = format!("failed to start sidecar `{program}`: {err}");
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            EngineError::permanent(message)
        }
        _ => EngineError::transient(message),
    }
}

// ============================================================================
// SECTION: Handle
// ============================================================================

/// Boxed sidecar output stream.
type SidecarReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Boxed sidecar input stream.
type SidecarWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Request and response streams of one sidecar.
struct SidecarChannel {
    /// Sidecar stdout.
    reader: SidecarReader,
    /// Sidecar stdin.
    writer: SidecarWriter,
}

/// Session-bound handle speaking JSON-RPC to one sidecar.
pub(crate) struct SidecarHandle {
    /// Streams, locked for the duration of one request.
    channel: Mutex<SidecarChannel>,
    /// Child process, when the handle owns one.
    child: Mutex<Option<Child>>,
    /// Next request identifier.
    next_id: AtomicU64,
}

/// JSON-RPC response from a sidecar.
#[derive(Debug, Deserialize)]
struct SidecarResponse {
    /// Echoed request identifier.
    id: Value,
    /// Result payload on success.
    #[serde(default)]
    result: Option<Value>,
    /// Error payload on failure.
    #[serde(default)]
    error: Option<SidecarError>,
}

/// JSON-RPC error from a sidecar.
#[derive(Debug, Deserialize)]
struct SidecarError {
    /// Error message.
    message: String,
    /// Optional structured data carrying `transient`.
    #[serde(default)]
    data: Option<Value>,
}

impl SidecarError {
    /// Converts the sidecar error into an engine error.
    fn into_engine_error(self) -> EngineError {
        let transient = self
            .data
            .as_ref()
            .and_then(|data| data.get("transient"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if transient {
            EngineError::transient(self.message)
        } else {
            EngineError::permanent(self.message)
        }
    }
}

impl SidecarHandle {
    /// Wraps sidecar streams.
    pub(crate) fn new<R, W>(reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            channel: Mutex::new(SidecarChannel {
                reader: BufReader::new(reader),
                writer: Box::new(writer),
            }),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
        }
    }

    /// Sends one request and waits for its response.
    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let payload = serde_json::to_vec(&request).map_err(|err| {
            EngineError::permanent(format!("sidecar request encoding failed: {err}"))
        })?;
        let mut channel = self.channel.lock().await;
        write_frame(&mut channel.writer, &payload)
            .await
            .map_err(|err| frame_error(method, &err))?;
        let bytes = read_frame(&mut channel.reader, MAX_SIDECAR_FRAME_BYTES)
            .await
            .map_err(|err| frame_error(method, &err))?;
        drop(channel);
        let response: SidecarResponse = serde_json::from_slice(&bytes).map_err(|err| {
            EngineError::permanent(format!("sidecar {method} response invalid: {err}"))
        })?;
        if response.id.as_u64() != Some(id) {
            return Err(EngineError::permanent(format!("sidecar {method} response id mismatch")));
        }
        match (response.result, response.error) {
            (_, Some(error)) => Err(error.into_engine_error()),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }

    /// Waits up to `grace` for the child to exit, then kills it.
    async fn terminate(&self, grace: Duration) {
        let mut child = self.child.lock().await;
        if let Some(mut process) = child.take()
            && tokio::time::timeout(grace, process.wait()).await.is_err()
        {
            let _ = process.kill().await;
        }
    }
}

/// Maps a framing failure to an engine error.
fn frame_error(method: &str, err: &FrameError) -> EngineError {
    let message = format!("sidecar {method} failed: {err}");
    match err {
        FrameError::Closed | FrameError::Io(_) => EngineError::transient(message),
        FrameError::Invalid(_) | FrameError::TooLarge {
            ..
        } => EngineError::permanent(message),
    }
}

#[async_trait]
impl LedgerHandle for SidecarHandle {
    async fn load_replica(
        &self,
        ledger_id: &str,
        password: Option<&str>,
    ) -> Result<(), EngineError> {
        self.call("load_replica", json!({ "ledger_id": ledger_id, "password": password }))
            .await
            .map(|_| ())
    }

    async fn invoke(&self, operation: &EngineOperation) -> Result<Value, EngineError> {
        let params = serde_json::to_value(operation).map_err(|err| {
            EngineError::permanent(format!("operation encoding failed: {err}"))
        })?;
        self.call("invoke", params).await
    }

    async fn synchronize(&self) -> Result<(), EngineError> {
        self.call("synchronize", json!({})).await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        let result = self.call("shutdown", json!({})).await.map(|_| ());
        self.terminate(EXIT_GRACE).await;
        result
    }
}

#[cfg(test)]
mod tests;
