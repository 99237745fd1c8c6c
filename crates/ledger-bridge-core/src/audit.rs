// crates/ledger-bridge-core/src/audit.rs
// ============================================================================
// Module: Pool Audit Logging
// Description: Structured lifecycle events emitted by the pool and connections.
// Purpose: Make session lifecycle and degraded paths observable as JSON lines.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The pool reports session lifecycle transitions and degraded paths (retries,
//! swallowed teardown failures, sync failures, partial batches) as
//! [`PoolAuditEvent`] values wrapped in a timestamped [`PoolAuditRecord`].
//! Sinks decide where records go; the transport crate provides stderr and
//! file sinks, and this module provides no-op and in-memory sinks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Reason a session connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Closed on explicit client request.
    Explicit,
    /// Evicted by the idle sweep.
    Idle,
    /// Closed during pool teardown.
    Teardown,
}

/// Pool lifecycle and degradation events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolAuditEvent {
    /// A session connection finished initialization.
    SessionOpened {
        /// Session identifier.
        session_id: String,
        /// Initialization duration in milliseconds.
        init_ms: u64,
    },
    /// A session connection failed to initialize.
    SessionInitFailed {
        /// Session identifier.
        session_id: String,
        /// Failure message.
        message: String,
    },
    /// A new session was refused because the pool is full.
    SessionRejected {
        /// Session identifier.
        session_id: String,
        /// Sessions admitted at the time of rejection.
        current: usize,
        /// Configured session limit.
        max: usize,
    },
    /// A session connection was closed.
    SessionClosed {
        /// Session identifier.
        session_id: String,
        /// Close reason.
        reason: CloseReason,
    },
    /// An engine call failed and is about to be retried.
    EngineRetry {
        /// Session identifier.
        session_id: String,
        /// Operation label.
        operation: String,
        /// Attempt that failed (1-based).
        attempt: u32,
        /// Maximum attempts allowed.
        max_attempts: u32,
        /// Backoff before the next attempt in milliseconds.
        delay_ms: u64,
        /// Failure message.
        message: String,
    },
    /// A teardown step failed and was swallowed.
    TeardownError {
        /// Session identifier.
        session_id: String,
        /// Failure message.
        message: String,
    },
    /// A post-mutation synchronization failed and was swallowed.
    SyncFailed {
        /// Session identifier.
        session_id: String,
        /// Failure message.
        message: String,
    },
    /// A batch failed after applying some mutations.
    BatchPartialFailure {
        /// Session identifier.
        session_id: String,
        /// Zero-based index of the failing mutation.
        failed_step: usize,
        /// Mutations applied before the failure.
        applied: usize,
        /// Failure message.
        message: String,
    },
}

impl PoolAuditEvent {
    /// Returns the event label used in the serialized `event` field.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SessionOpened {
                ..
            } => "session_opened",
            Self::SessionInitFailed {
                ..
            } => "session_init_failed",
            Self::SessionRejected {
                ..
            } => "session_rejected",
            Self::SessionClosed {
                ..
            } => "session_closed",
            Self::EngineRetry {
                ..
            } => "engine_retry",
            Self::TeardownError {
                ..
            } => "teardown_error",
            Self::SyncFailed {
                ..
            } => "sync_failed",
            Self::BatchPartialFailure {
                ..
            } => "batch_partial_failure",
        }
    }
}

/// Timestamped audit record written by sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolAuditRecord {
    /// Record timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Event payload.
    #[serde(flatten)]
    pub event: PoolAuditEvent,
}

impl PoolAuditRecord {
    /// Wraps an event with the current wall-clock timestamp.
    #[must_use]
    pub fn now(event: PoolAuditEvent) -> Self {
        Self {
            timestamp_ms: now_unix_ms(),
            event,
        }
    }
}

/// Returns the current wall-clock time in milliseconds since the epoch.
#[must_use]
pub fn now_unix_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for pool lifecycle events.
pub trait BridgeAuditSink: Send + Sync {
    /// Record a pool audit record.
    fn record_pool(&self, record: &PoolAuditRecord);
}

/// No-op pool audit sink.
pub struct NoopAuditSink;

impl BridgeAuditSink for NoopAuditSink {
    fn record_pool(&self, _record: &PoolAuditRecord) {}
}

/// Audit sink that retains records in memory for inspection.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded audit records in arrival order.
    records: Mutex<Vec<PoolAuditRecord>>,
}

impl MemoryAuditSink {
    /// Creates an empty in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<PoolAuditEvent> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|record| record.event.clone())
            .collect()
    }

    /// Returns the number of recorded events carrying `label`.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|record| record.event.label() == label)
            .count()
    }
}

impl BridgeAuditSink for MemoryAuditSink {
    fn record_pool(&self, record: &PoolAuditRecord) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record.clone());
    }
}
