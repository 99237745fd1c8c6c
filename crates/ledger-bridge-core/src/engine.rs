// crates/ledger-bridge-core/src/engine.rs
// ============================================================================
// Module: Ledger Engine Interfaces
// Description: Async seams between connections and the external ledger engine.
// Purpose: Abstract the single-instance engine behind open/invoke/sync calls.
// Dependencies: async-trait, serde, serde_json
// ============================================================================

//! ## Overview
//! The external ledger engine is reached through two traits. A
//! [`LedgerEngine`] opens a [`LedgerHandle`] bound to one session's working
//! directory; the handle then loads a replica of a named ledger, invokes
//! normalized operations, synchronizes with the remote server, and shuts down.
//!
//! Engine failures carry an [`EngineErrorKind`] so the retry layer can tell
//! transient faults (network blips, busy engine) from permanent ones (bad
//! arguments, unknown ledger).
//!
//! ## Invariants
//! - A handle is used by exactly one connection.
//! - Every handle call is made while holding a concurrency gate permit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Classification of a normalized engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Read-only lookup.
    Read,
    /// Mutating operation that is followed by a synchronization.
    Mutation,
    /// Free-form query that is validated before dispatch.
    Query,
}

/// Normalized engine operation issued by a connection.
///
/// # Invariants
/// - `name` identifies an engine entry point; `arguments` is its JSON payload.
/// - Query operations carry their query text in `arguments.query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOperation {
    /// Engine entry point name.
    pub name: String,
    /// Operation classification.
    pub kind: OperationKind,
    /// JSON arguments for the entry point.
    pub arguments: Value,
}

impl EngineOperation {
    /// Creates a read operation.
    #[must_use]
    pub fn read(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::Read,
            arguments,
        }
    }

    /// Creates a mutation operation.
    #[must_use]
    pub fn mutation(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::Mutation,
            arguments,
        }
    }

    /// Creates a query operation carrying `query` as its text.
    #[must_use]
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            name: "query".to_string(),
            kind: OperationKind::Query,
            arguments: serde_json::json!({ "query": query.into() }),
        }
    }

    /// Returns the query text for query operations.
    #[must_use]
    pub fn query_text(&self) -> Option<&str> {
        self.arguments.get("query").and_then(Value::as_str)
    }

    /// Returns true when the operation mutates ledger state.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.kind == OperationKind::Mutation
    }
}

/// Parameters used to open an engine handle for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOpenRequest {
    /// Private working directory for the session.
    pub working_dir: PathBuf,
    /// Remote ledger server URL.
    pub server_url: String,
    /// Credential for the remote server, when configured.
    pub credential: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Retry classification for engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    /// Failure that may succeed when retried.
    Transient,
    /// Failure that will not succeed when retried.
    Permanent,
}

/// Engine failure reported by a [`LedgerEngine`] or [`LedgerHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// Retry classification.
    pub kind: EngineErrorKind,
    /// Human-readable failure message.
    pub message: String,
}

impl EngineError {
    /// Creates a transient engine error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Creates a permanent engine error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Returns true when the failure may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == EngineErrorKind::Transient
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Factory for session-bound engine handles.
#[async_trait]
pub trait LedgerEngine: Send + Sync {
    /// Opens a handle rooted at the request's working directory.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine cannot start for the session.
    async fn open(&self, request: EngineOpenRequest) -> Result<Arc<dyn LedgerHandle>, EngineError>;
}

/// Session-bound engine handle.
#[async_trait]
pub trait LedgerHandle: Send + Sync {
    /// Downloads or opens a local replica of `ledger_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the replica cannot be loaded.
    async fn load_replica(
        &self,
        ledger_id: &str,
        password: Option<&str>,
    ) -> Result<(), EngineError>;

    /// Invokes a normalized operation and returns its JSON result.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine rejects or fails the operation.
    async fn invoke(&self, operation: &EngineOperation) -> Result<Value, EngineError>;

    /// Pushes local changes to the remote server.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when synchronization fails.
    async fn synchronize(&self) -> Result<(), EngineError>;

    /// Releases engine resources held by the handle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine reports a shutdown failure.
    async fn shutdown(&self) -> Result<(), EngineError>;
}

/// Shared engine factory used by the pool.
pub type SharedLedgerEngine = Arc<dyn LedgerEngine>;
