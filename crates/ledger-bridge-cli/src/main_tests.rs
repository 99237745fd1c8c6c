// crates/ledger-bridge-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for argument parsing and the offline check commands.
// Purpose: Ensure config checks fail closed and query reports are well formed.
// Dependencies: clap, serde_json, tempfile
// ============================================================================

//! ## Overview
//! Covers command-line parsing, `config check` against temporary files, and
//! the JSON report produced by `query validate`.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;

use clap::Parser;
use serde_json::Value;
use tempfile::TempDir;

use super::Cli;
use super::Commands;
use super::ConfigCommand;
use super::QueryCommand;
use super::check_config;
use super::query_report;

// ============================================================================
// SECTION: Parsing
// ============================================================================

#[test]
fn serve_accepts_an_optional_config_path() {
    let cli = Cli::try_parse_from(["ledger-bridge", "serve", "--config", "bridge.toml"]).unwrap();
    let Commands::Serve(command) = cli.command else {
        panic!("expected serve command");
    };
    assert_eq!(command.config.unwrap().to_str(), Some("bridge.toml"));

    let cli = Cli::try_parse_from(["ledger-bridge", "serve"]).unwrap();
    let Commands::Serve(command) = cli.command else {
        panic!("expected serve command");
    };
    assert!(command.config.is_none());
}

#[test]
fn nested_commands_parse() {
    let cli = Cli::try_parse_from(["ledger-bridge", "config", "check"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommand::Check(_)
        }
    ));

    let cli = Cli::try_parse_from(["ledger-bridge", "query", "validate", "SELECT * FROM payees"])
        .unwrap();
    let Commands::Query {
        command: QueryCommand::Validate(command),
    } = cli.command
    else {
        panic!("expected query validate");
    };
    assert_eq!(command.query, "SELECT * FROM payees");
}

#[test]
fn missing_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["ledger-bridge"]).is_err());
    assert!(Cli::try_parse_from(["ledger-bridge", "query", "validate"]).is_err());
}

// ============================================================================
// SECTION: Config Check
// ============================================================================

#[test]
fn config_check_summarizes_effective_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger-bridge.toml");
    fs::write(
        &path,
        "[server]\ntransport = \"http\"\nbind = \"127.0.0.1:8080\"\n[pool]\nmax_sessions = 3\n\
         [engine]\nledger_id = \"household\"\n",
    )
    .unwrap();

    let summary: Value = serde_json::from_str(&check_config(Some(&path)).unwrap()).unwrap();
    assert_eq!(summary["valid"], true);
    assert_eq!(summary["transport"], "http");
    assert_eq!(summary["engine"], "memory");
    assert_eq!(summary["max_sessions"], 3);
    assert_eq!(summary["ledger_id"], "household");
}

#[test]
fn config_check_rejects_non_loopback_binds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger-bridge.toml");
    fs::write(&path, "[server]\ntransport = \"http\"\nbind = \"0.0.0.0:8080\"\n").unwrap();

    let err = check_config(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("non-loopback"));
}

#[test]
fn config_check_reports_missing_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let err = check_config(Some(&path)).unwrap_err();
    assert!(err.to_string().starts_with("failed to load config"));
}

// ============================================================================
// SECTION: Query Validate
// ============================================================================

#[test]
fn valid_queries_report_no_diagnostics() {
    let (valid, report) = query_report("SELECT payee.name, amount FROM transactions").unwrap();
    assert!(valid);
    let report: Value = serde_json::from_str(&report).unwrap();
    assert_eq!(report["valid"], true);
    assert_eq!(report["diagnostics"], Value::Array(Vec::new()));
}

#[test]
fn invalid_queries_report_suggestions() {
    let (valid, report) = query_report("SELECT payeeName FROM transactions").unwrap();
    assert!(!valid);
    let report: Value = serde_json::from_str(&report).unwrap();
    assert_eq!(report["diagnostics"][0]["kind"], "field");
    assert_eq!(report["diagnostics"][0]["suggestion"], "payee.name");
}
