// crates/ledger-bridge-config/src/lib.rs
// ============================================================================
// Module: Ledger Bridge Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for ledger-bridge.toml semantics.
// Dependencies: ledger-bridge-core, serde, toml
// ============================================================================

//! ## Overview
//! `ledger-bridge-config` defines the configuration model for the ledger
//! bridge server. Loading is strict and fail-closed: oversized files, unknown
//! keys, out-of-range limits, and non-loopback binds are all rejected before
//! any session is created.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
