// crates/ledger-bridge-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared pool harness for core integration tests.
// Purpose: Build pools over the in-memory engine with recorded audit events.
// Dependencies: ledger-bridge-core, tempfile
// ============================================================================

//! ## Overview
//! Provides a [`Harness`] bundling a pool, its in-memory engine, the audit
//! sink, and the temporary data directory backing session working dirs.

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

use std::sync::Arc;
use std::time::Duration;

use ledger_bridge_core::ConnectionPool;
use ledger_bridge_core::EngineOperation;
use ledger_bridge_core::InMemoryLedgerEngine;
use ledger_bridge_core::MemoryAuditSink;
use ledger_bridge_core::PoolOptions;
use ledger_bridge_core::RetryPolicy;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Ledger loaded by every harness session.
pub const LEDGER_ID: &str = "household";

/// Pool plus the collaborators tests inspect.
pub struct Harness {
    /// Data directory root.
    pub dir: TempDir,
    /// Engine shared with the pool.
    pub engine: InMemoryLedgerEngine,
    /// Recorded audit events.
    pub audit: Arc<MemoryAuditSink>,
    /// Pool under test.
    pub pool: ConnectionPool,
}

/// Pool options with short backoff suitable for tests.
pub fn test_options(dir: &TempDir) -> PoolOptions {
    PoolOptions {
        max_sessions: 8,
        idle_timeout: Duration::from_secs(30),
        sweep_interval: Duration::from_secs(5),
        active_window: Duration::from_secs(10),
        data_dir: dir.path().to_path_buf(),
        ledger_id: LEDGER_ID.to_string(),
        init_retry: RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(50)),
        call_retry: RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(50)),
        ..PoolOptions::default()
    }
}

/// Builds a harness after applying `configure` to [`test_options`].
pub fn harness(configure: impl FnOnce(&mut PoolOptions)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut options = test_options(&dir);
    configure(&mut options);
    let engine = InMemoryLedgerEngine::new();
    let audit = Arc::new(MemoryAuditSink::new());
    let pool = ConnectionPool::new(options, Arc::new(engine.clone()), audit.clone());
    Harness {
        dir,
        engine,
        audit,
        pool,
    }
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Creates a record in `entity`.
pub fn create(entity: &str, data: serde_json::Value) -> EngineOperation {
    EngineOperation::mutation("create", json!({ "entity": entity, "data": data }))
}

/// Lists records in `entity`.
pub fn list(entity: &str) -> EngineOperation {
    EngineOperation::read("list", json!({ "entity": entity }))
}

/// Adjusts a category budget for a month.
pub fn budget_adjust(month: &str, category: &str, amount: i64) -> EngineOperation {
    EngineOperation::mutation(
        "budget_adjust",
        json!({ "month": month, "category": category, "amount": amount }),
    )
}
