// crates/ledger-bridge-mcp/src/config.rs
// ============================================================================
// Module: Ledger Bridge MCP Configuration
// Description: Re-exports the canonical config model for MCP usage.
// Purpose: Keep MCP code bound to the shared config crate.
// Dependencies: ledger-bridge-config
// ============================================================================

//! ## Overview
//! This module re-exports [`ledger_bridge_config`] so MCP code and downstream
//! users share one configuration model.

pub use ledger_bridge_config::*;
