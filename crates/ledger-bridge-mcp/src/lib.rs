// crates/ledger-bridge-mcp/src/lib.rs
// ============================================================================
// Module: Ledger Bridge MCP
// Description: MCP server and engine adapters for Ledger Bridge.
// Purpose: Expose per-session ledger connections through MCP tools.
// Dependencies: ledger-bridge-core, ledger-bridge-config, axum, tokio
// ============================================================================

//! ## Overview
//! Ledger Bridge MCP serves JSON-RPC tool calls over stdio or HTTP and routes
//! them into [`ledger_bridge_core::ConnectionPool`]. Every tool is a thin
//! wrapper over a pool operation for the caller's session.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod config;
pub mod engine;
pub mod framing;
pub mod process_engine;
pub mod server;
pub mod tools;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditSinks;
pub use audit::FileAuditSink;
pub use audit::McpAuditEvent;
pub use audit::McpAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use config::LedgerBridgeConfig;
pub use engine::build_engine;
pub use process_engine::ProcessLedgerEngine;
pub use server::McpServer;
pub use server::McpServerError;
pub use tools::RequestContext;
pub use tools::ToolDefinition;
pub use tools::ToolError;
pub use tools::ToolRouter;
