// crates/ledger-bridge-core/src/lib.rs
// ============================================================================
// Module: Ledger Bridge Core
// Description: Session-scoped connection pool around an external ledger engine.
// Purpose: Let many client sessions share a single-instance engine safely.
// Dependencies: async-trait, serde, sha2, thiserror, tokio
// ============================================================================

//! ## Overview
//! Ledger Bridge Core owns the concurrency and resilience layer between remote
//! tool-calling sessions and the external ledger engine. The engine keeps
//! process-wide working state, so every session receives its own
//! [`connection::Connection`] with a private working directory, and every call
//! into the engine passes through one shared [`gate::ConcurrencyGate`].
//!
//! ## Layer Responsibilities
//! - [`pool::ConnectionPool`]: admission control, lazy initialization, idle
//!   eviction, statistics, and teardown.
//! - [`connection::Connection`]: per-session state machine and normalized
//!   engine operations.
//! - [`retry::RetryExecutor`], [`gate::ConcurrencyGate`],
//!   [`batch::BatchCoordinator`]: resilience primitives composed around
//!   engine calls.
//! - [`query::validate_query`]: static query checks against a
//!   [`schema::QuerySchema`] before a query reaches the engine.
//!
//! ## Invariants
//! - At most one connection exists per session identifier.
//! - Ready plus initializing connections never exceed the configured maximum.
//! - Gate permits are released on every exit path.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod batch;
pub mod connection;
pub mod engine;
pub mod error;
pub mod gate;
pub mod memory;
pub mod pool;
pub mod query;
pub mod retry;
pub mod schema;
pub mod session;


// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::BridgeAuditSink;
pub use audit::CloseReason;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::PoolAuditEvent;
pub use audit::PoolAuditRecord;
pub use audit::now_unix_ms;
pub use batch::BatchCoordinator;
pub use connection::Connection;
pub use connection::ConnectionDeps;
pub use connection::ConnectionSettings;
pub use connection::ConnectionSnapshot;
pub use connection::ConnectionState;
pub use engine::EngineError;
pub use engine::EngineErrorKind;
pub use engine::EngineOpenRequest;
pub use engine::EngineOperation;
pub use engine::LedgerEngine;
pub use engine::LedgerHandle;
pub use engine::OperationKind;
pub use engine::SharedLedgerEngine;
pub use error::BridgeError;
pub use gate::ConcurrencyGate;
pub use gate::GatePermit;
pub use gate::GateSnapshot;
pub use memory::FaultPoint;
pub use memory::InMemoryLedgerEngine;
pub use memory::MemoryEngineStats;
pub use pool::ConnectionPool;
pub use pool::PoolOptions;
pub use pool::PoolStats;
pub use pool::SessionSummary;
pub use query::Diagnostic;
pub use query::DiagnosticKind;
pub use query::ParsedQuery;
pub use query::ValidationResult;
pub use query::parse_query;
pub use query::validate_query;
pub use retry::RetryExecutor;
pub use retry::RetryNotice;
pub use retry::RetryPolicy;
pub use schema::QuerySchema;
pub use schema::TableSchema;
pub use session::SessionId;
pub use session::session_working_dir;
