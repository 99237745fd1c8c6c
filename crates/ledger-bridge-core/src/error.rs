// crates/ledger-bridge-core/src/error.rs
// ============================================================================
// Module: Bridge Errors
// Description: Error taxonomy surfaced by the connection pool and connections.
// Purpose: Give transports a stable, classifiable error for every failure.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`BridgeError`] is the single error type returned by pool and connection
//! operations. Each variant maps to one failure class a transport can report
//! distinctly: capacity, initialization, engine, validation, partial batch,
//! and lifecycle errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::query::Diagnostic;
use crate::session::SessionId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors surfaced by the connection pool and per-session connections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The pool already holds the maximum number of admitted sessions.
    #[error("connection pool at capacity ({current}/{max} sessions)")]
    CapacityExceeded {
        /// Sessions currently admitted (ready plus initializing).
        current: usize,
        /// Configured session limit.
        max: usize,
    },
    /// Session initialization failed after retries.
    #[error("session {session} failed to initialize: {message}")]
    Initialization {
        /// Session that failed to initialize.
        session: SessionId,
        /// Underlying failure message.
        message: String,
    },
    /// An engine operation failed after retries.
    #[error("engine operation failed: {message}")]
    Engine {
        /// Underlying engine failure message.
        message: String,
    },
    /// A query failed static validation and was not sent to the engine.
    #[error("query validation failed: {}", render_diagnostics(.diagnostics))]
    Validation {
        /// Structured validation diagnostics.
        diagnostics: Vec<Diagnostic>,
    },
    /// A batch failed after some of its mutations were applied.
    #[error(
        "batch failed at step {failed_step} after {applied} applied mutation(s): {message}"
    )]
    PartialBatchFailure {
        /// Zero-based index of the failing mutation.
        failed_step: usize,
        /// Number of mutations applied before the failure.
        applied: usize,
        /// Underlying failure message.
        message: String,
    },
    /// The session's connection is shutting down or closed.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),
    /// The request was malformed for the requested operation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The pool has been shut down and accepts no new sessions.
    #[error("connection pool is shut down")]
    PoolShutdown,
    /// Local filesystem failure while preparing session state.
    #[error("io error: {0}")]
    Io(String),
    /// Internal invariant failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns a stable, machine-readable label for the error class.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CapacityExceeded {
                ..
            } => "capacity_exceeded",
            Self::Initialization {
                ..
            } => "initialization_failed",
            Self::Engine {
                ..
            } => "engine_error",
            Self::Validation {
                ..
            } => "validation_failed",
            Self::PartialBatchFailure {
                ..
            } => "partial_batch_failure",
            Self::SessionClosed(_) => "session_closed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::PoolShutdown => "pool_shutdown",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Returns the underlying failure message without the class prefix.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Initialization {
                message, ..
            }
            | Self::Engine {
                message,
            }
            | Self::PartialBatchFailure {
                message, ..
            } => message.clone(),
            Self::InvalidRequest(message) | Self::Io(message) | Self::Internal(message) => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Renders validation diagnostics into a single line.
fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
