//! Config limit validation tests for ledger-bridge-config.
// crates/ledger-bridge-config/tests/limits_validation.rs
// =============================================================================
// Module: Config Limits Validation Tests
// Description: Validate range checks and cross-field rules.
// Purpose: Ensure out-of-range settings fail closed with clear messages.
// =============================================================================

use ledger_bridge_config::LedgerBridgeConfig;

type TestResult = Result<(), String>;

fn assert_rejected(content: &str, needle: &str) -> TestResult {
    match LedgerBridgeConfig::from_toml_str(content) {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err(format!("expected rejection for: {content}")),
    }
}

fn assert_accepted(content: &str) -> TestResult {
    LedgerBridgeConfig::from_toml_str(content).map(|_| ()).map_err(|err| err.to_string())
}

#[test]
fn max_sessions_bounds() -> TestResult {
    assert_rejected("[pool]\nmax_sessions = 0", "pool.max_sessions")?;
    assert_rejected("[pool]\nmax_sessions = 5000", "pool.max_sessions")?;
    assert_accepted("[pool]\nmax_sessions = 1024")
}

#[test]
fn idle_and_sweep_timing() -> TestResult {
    assert_rejected("[pool]\nidle_timeout_ms = 500", "pool.idle_timeout_ms")?;
    assert_rejected("[pool]\nsweep_interval_ms = 50", "pool.sweep_interval_ms")?;
    assert_rejected(
        "[pool]\nidle_timeout_ms = 2000\nsweep_interval_ms = 3000",
        "pool.sweep_interval_ms",
    )?;
    assert_rejected("[pool]\nactive_window_ms = 0", "pool.active_window_ms")?;
    assert_accepted("[pool]\nidle_timeout_ms = 2000\nsweep_interval_ms = 2000")
}

#[test]
fn gate_limit_bounds() -> TestResult {
    assert_rejected("[gate]\nmax_concurrent = 0", "gate.max_concurrent")?;
    assert_rejected("[gate]\nmax_concurrent = 65", "gate.max_concurrent")?;
    assert_accepted("[gate]\nmax_concurrent = 64")
}

#[test]
fn retry_bounds() -> TestResult {
    assert_rejected("[retry.init]\nmax_attempts = 0", "retry.init.max_attempts")?;
    assert_rejected("[retry.call]\nmax_attempts = 11", "retry.call.max_attempts")?;
    assert_rejected("[retry.call]\nmax_backoff_ms = 60001", "retry.call.max_backoff_ms")?;
    assert_rejected(
        "[retry.init]\nbase_backoff_ms = 3000\nmax_backoff_ms = 1000",
        "retry.init.base_backoff_ms",
    )
}

#[test]
fn http_bind_must_be_loopback() -> TestResult {
    assert_rejected("[server]\ntransport = \"http\"", "requires bind address")?;
    assert_rejected("[server]\ntransport = \"http\"\nbind = \"nope\"", "invalid bind address")?;
    assert_rejected(
        "[server]\ntransport = \"http\"\nbind = \"0.0.0.0:8080\"",
        "non-loopback bind disallowed",
    )?;
    assert_rejected("[server]\nbind = \"127.0.0.1:8080\"", "stdio transport")?;
    assert_accepted("[server]\ntransport = \"http\"\nbind = \"[::1]:8080\"")
}

#[test]
fn body_limit_bounds() -> TestResult {
    assert_rejected("[server]\nmax_body_bytes = 0", "server.max_body_bytes")?;
    assert_rejected("[server]\nmax_body_bytes = 16777217", "server.max_body_bytes")
}

#[test]
fn engine_rules() -> TestResult {
    assert_rejected("[engine]\ntype = \"process\"", "engine.command is required")?;
    assert_rejected("[engine]\ncommand = [\"sidecar\"]", "only valid for the process engine")?;
    assert_rejected("[engine]\nserver_url = \"ftp://x\"", "engine.server_url")?;
    assert_rejected("[engine]\nledger_id = \"  \"", "engine.ledger_id")?;
    assert_rejected("[engine]\ndata_dir = \"\"", "engine.data_dir")?;
    assert_rejected("[engine]\ncredential_env = \"1BAD\"", "engine.credential_env")
}

#[test]
fn audit_rules() -> TestResult {
    assert_rejected("[audit]\nsink = \"file\"", "audit.path is required")?;
    assert_rejected("[audit]\nsink = \"stderr\"\npath = \"/tmp/a\"", "only valid for the file sink")?;
    assert_accepted("[audit]\nsink = \"none\"")
}

#[test]
fn secrets_resolve_from_environment() -> TestResult {
    let config = LedgerBridgeConfig::from_toml_str("[engine]\ncredential_env = \"PATH\"")
        .map_err(|err| err.to_string())?;
    let credential = config.engine.resolve_credential().map_err(|err| err.to_string())?;
    if credential.is_none() {
        return Err("PATH should resolve".to_string());
    }
    let config = LedgerBridgeConfig::from_toml_str(
        "[engine]\nledger_password_env = \"LEDGER_BRIDGE_TEST_SURELY_UNSET_VAR\"",
    )
    .map_err(|err| err.to_string())?;
    match config.pool_options() {
        Err(error) if error.to_string().contains("unset variable") => Ok(()),
        Err(error) => Err(format!("unexpected error {error}")),
        Ok(_) => Err("unset password variable should fail".to_string()),
    }
}
