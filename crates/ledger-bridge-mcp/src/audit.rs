// crates/ledger-bridge-mcp/src/audit.rs
// ============================================================================
// Module: MCP Audit Logging
// Description: Structured audit events and sinks for requests and the pool.
// Purpose: Emit JSON-line audit records without a logging framework.
// Dependencies: ledger-bridge-core, serde
// ============================================================================

//! ## Overview
//! Request events ([`McpAuditEvent`]) and pool lifecycle records
//! ([`PoolAuditRecord`]) share the same sinks. Each sink implements both
//! [`McpAuditSink`] and [`BridgeAuditSink`]; [`AuditSinks::from_config`]
//! builds one sink and hands out both views of it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use ledger_bridge_core::BridgeAuditSink;
use ledger_bridge_core::PoolAuditRecord;
use ledger_bridge_core::now_unix_ms;
use serde::Serialize;

use crate::config::AuditConfig;
use crate::config::AuditSinkKind;
use crate::config::ServerTransport;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of a JSON-RPC request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum McpOutcome {
    /// Request produced a result.
    Ok,
    /// Request produced a JSON-RPC error.
    Error,
}

/// MCP request audit event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct McpAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Session the request was routed to.
    pub session_id: Option<String>,
    /// JSON-RPC method.
    pub method: String,
    /// Tool name for `tools/call`.
    pub tool: Option<String>,
    /// Request outcome.
    pub outcome: McpOutcome,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
    /// Handling duration in milliseconds.
    pub duration_ms: u64,
}

/// Inputs for building an [`McpAuditEvent`].
pub struct McpAuditEventParams {
    /// Request identifier when provided.
    pub request_id: Option<String>,
    /// Transport used for the request.
    pub transport: ServerTransport,
    /// Session the request was routed to.
    pub session_id: Option<String>,
    /// JSON-RPC method.
    pub method: String,
    /// Tool name for `tools/call`.
    pub tool: Option<String>,
    /// JSON-RPC error code when present.
    pub error_code: Option<i64>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
    /// Handling duration in milliseconds.
    pub duration_ms: u64,
}

impl McpAuditEvent {
    /// Builds a `tool_call` event stamped with the current time.
    #[must_use]
    pub fn new(params: McpAuditEventParams) -> Self {
        Self {
            event: "tool_call",
            timestamp_ms: now_unix_ms(),
            request_id: params.request_id,
            transport: params.transport,
            session_id: params.session_id,
            method: params.method,
            tool: params.tool,
            outcome: if params.error_code.is_some() { McpOutcome::Error } else { McpOutcome::Ok },
            error_code: params.error_code,
            request_bytes: params.request_bytes,
            response_bytes: params.response_bytes,
            duration_ms: params.duration_ms,
        }
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for MCP request events.
pub trait McpAuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &McpAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl StderrAuditSink {
    /// Writes one serialized payload line.
    fn emit(payload: &impl Serialize) {
        if let Ok(line) = serde_json::to_string(payload) {
            let _ = writeln!(io::stderr(), "{line}");
        }
    }
}

impl McpAuditSink for StderrAuditSink {
    fn record(&self, event: &McpAuditEvent) {
        Self::emit(event);
    }
}

impl BridgeAuditSink for StderrAuditSink {
    fn record_pool(&self, record: &PoolAuditRecord) {
        Self::emit(record);
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one serialized payload line.
    fn emit(&self, payload: &impl Serialize) {
        if let Ok(line) = serde_json::to_string(payload) {
            let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }
    }
}

impl McpAuditSink for FileAuditSink {
    fn record(&self, event: &McpAuditEvent) {
        self.emit(event);
    }
}

impl BridgeAuditSink for FileAuditSink {
    fn record_pool(&self, record: &PoolAuditRecord) {
        self.emit(record);
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl McpAuditSink for NoopAuditSink {
    fn record(&self, _event: &McpAuditEvent) {}
}

impl BridgeAuditSink for NoopAuditSink {
    fn record_pool(&self, _record: &PoolAuditRecord) {}
}

// ============================================================================
// SECTION: Sink Selection
// ============================================================================

/// Request and pool views of one configured sink.
#[derive(Clone)]
pub struct AuditSinks {
    /// Sink for request events.
    pub mcp: Arc<dyn McpAuditSink>,
    /// Sink for pool lifecycle records.
    pub pool: Arc<dyn BridgeAuditSink>,
}

impl AuditSinks {
    /// Shares one sink between both views.
    fn shared<S>(sink: S) -> Self
    where
        S: McpAuditSink + BridgeAuditSink + 'static,
    {
        let sink = Arc::new(sink);
        Self {
            mcp: sink.clone(),
            pool: sink,
        }
    }

    /// Builds the sink selected by `[audit]`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file sink cannot open its path.
    pub fn from_config(config: &AuditConfig) -> io::Result<Self> {
        match config.sink {
            AuditSinkKind::Stderr => Ok(Self::shared(StderrAuditSink)),
            AuditSinkKind::None => Ok(Self::shared(NoopAuditSink)),
            AuditSinkKind::File => {
                let path = config.path.as_deref().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "audit.path is required")
                })?;
                Ok(Self::shared(FileAuditSink::new(Path::new(path))?))
            }
        }
    }

    /// Builds a sink pair that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::shared(NoopAuditSink)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

    use ledger_bridge_core::CloseReason;
    use ledger_bridge_core::PoolAuditEvent;
    use serde_json::Value;

    use super::*;

    #[test]
    fn file_sink_writes_request_and_pool_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sinks = AuditSinks::from_config(&AuditConfig {
            sink: AuditSinkKind::File,
            path: Some(path.display().to_string()),
        })
        .unwrap();

        sinks.mcp.record(&McpAuditEvent::new(McpAuditEventParams {
            request_id: Some("1".to_string()),
            transport: ServerTransport::Stdio,
            session_id: Some("stdio".to_string()),
            method: "tools/call".to_string(),
            tool: Some("ledger_list".to_string()),
            error_code: Some(-32030),
            request_bytes: 10,
            response_bytes: 20,
            duration_ms: 3,
        }));
        sinks.pool.record_pool(&PoolAuditRecord::now(PoolAuditEvent::SessionClosed {
            session_id: "stdio".to_string(),
            reason: CloseReason::Teardown,
        }));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> =
            content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "tool_call");
        assert_eq!(lines[0]["outcome"], "error");
        assert_eq!(lines[1]["event"], "session_closed");
        assert_eq!(lines[1]["reason"], "teardown");
        assert!(lines[1]["timestamp_ms"].is_u64());
    }

    #[test]
    fn file_sink_requires_a_path() {
        let result = AuditSinks::from_config(&AuditConfig {
            sink: AuditSinkKind::File,
            path: None,
        });
        assert!(result.is_err());
    }
}
