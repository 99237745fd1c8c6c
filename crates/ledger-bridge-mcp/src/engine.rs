// crates/ledger-bridge-mcp/src/engine.rs
// ============================================================================
// Module: Engine Selection
// Description: Builds the configured ledger engine.
// Purpose: Map `[engine]` configuration onto a core engine implementation.
// Dependencies: ledger-bridge-core, ledger-bridge-config
// ============================================================================

//! ## Overview
//! `memory` selects the in-process reference engine; `process` selects the
//! sidecar engine running `engine.command`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use ledger_bridge_core::InMemoryLedgerEngine;
use ledger_bridge_core::SharedLedgerEngine;

use crate::config::EngineConfig;
use crate::config::EngineType;
use crate::process_engine::ProcessLedgerEngine;

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builds the engine selected by `config`.
#[must_use]
pub fn build_engine(config: &EngineConfig) -> SharedLedgerEngine {
    match config.engine_type {
        EngineType::Memory => Arc::new(InMemoryLedgerEngine::new()),
        EngineType::Process => Arc::new(ProcessLedgerEngine::new(config.command.clone())),
    }
}
