// crates/ledger-bridge-core/tests/proptest_resilience.rs
// ============================================================================
// Module: Resilience Property-Based Tests
// Description: Property checks for backoff, query validation, and paths.
// Purpose: Ensure pure helpers stay bounded and never panic on hostile input.
// Dependencies: ledger-bridge-core, proptest
// ============================================================================

//! ## Overview
//! - Backoff delays never shrink between attempts and never exceed the cap.
//! - The query validator returns diagnostics instead of panicking.
//! - Session working directories stay one component below `sessions/`.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::time::Duration;

use ledger_bridge_core::QuerySchema;
use ledger_bridge_core::RetryPolicy;
use ledger_bridge_core::SessionId;
use ledger_bridge_core::session_working_dir;
use ledger_bridge_core::validate_query;
use proptest::prelude::*;

proptest! {
    #[test]
    fn backoff_is_monotonic_and_capped(
        base_ms in 1_u64 .. 10_000,
        cap_ms in 1_u64 .. 60_000,
        attempts in 1_u32 .. 64,
    ) {
        let policy = RetryPolicy::new(
            attempts,
            Duration::from_millis(base_ms),
            Duration::from_millis(cap_ms),
        );
        let mut previous = Duration::ZERO;
        for attempt in 1 ..= attempts {
            let delay = policy.backoff_for(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= Duration::from_millis(cap_ms));
            previous = delay;
        }
    }

    #[test]
    fn validator_handles_random_text(query in ".{0,256}") {
        let schema = QuerySchema::ledger_default();
        let result = validate_query(&query, &schema);
        prop_assert_eq!(result.valid, result.diagnostics.is_empty());
    }

    #[test]
    fn validator_handles_select_shaped_text(
        fields in "[a-zA-Z_.*, ()]{0,64}",
        table in "[a-zA-Z_]{0,16}",
        tail in "[a-zA-Z0-9_ ='<>]{0,64}",
    ) {
        let schema = QuerySchema::ledger_default();
        let query = format!("SELECT {fields} FROM {table} WHERE {tail}");
        let result = validate_query(&query, &schema);
        prop_assert_eq!(result.valid, result.diagnostics.is_empty());
    }

    #[test]
    fn working_dirs_stay_under_sessions_root(id in "\\PC{1,128}") {
        let root = Path::new("/data");
        let sessions = root.join("sessions");
        let dir = session_working_dir(root, &SessionId::new(id));
        prop_assert_eq!(dir.parent(), Some(sessions.as_path()));
        let name = dir.file_name().and_then(|name| name.to_str()).unwrap();
        prop_assert!(name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
    }
}
