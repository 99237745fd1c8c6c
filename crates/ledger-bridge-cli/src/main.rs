// crates/ledger-bridge-cli/src/main.rs
// ============================================================================
// Module: Ledger Bridge CLI Entry Point
// Description: Command dispatcher for the ledger bridge server and tooling.
// Purpose: Run the MCP server and offline config/query checks.
// Dependencies: clap, ledger-bridge-config, ledger-bridge-core, ledger-bridge-mcp, tokio.
// ============================================================================

//! ## Overview
//! The `ledger-bridge` binary starts the MCP server over the configured
//! transport and offers offline checks for configuration files and ledger
//! queries. In stdio mode stdout carries protocol frames only; diagnostics
//! go to stderr.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use ledger_bridge_config::LedgerBridgeConfig;
use ledger_bridge_core::QuerySchema;
use ledger_bridge_core::validate_query;
use ledger_bridge_mcp::McpServer;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "ledger-bridge", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the ledger bridge MCP server.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Ledger query utilities.
    Query {
        /// Selected query subcommand.
        #[command(subcommand)]
        command: QueryCommand,
    },
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path (defaults to ledger-bridge.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate a configuration file.
    Check(ConfigCheckCommand),
}

/// Arguments for `config check`.
#[derive(Args, Debug)]
struct ConfigCheckCommand {
    /// Optional config file path (defaults to ledger-bridge.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Query subcommands.
#[derive(Subcommand, Debug)]
enum QueryCommand {
    /// Validate a query against the default ledger schema.
    Validate(QueryValidateCommand),
}

/// Arguments for `query validate`.
#[derive(Args, Debug)]
struct QueryValidateCommand {
    /// Query text, e.g. `SELECT payee.name FROM transactions`.
    #[arg(value_name = "QUERY")]
    query: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a display message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Config {
            command: ConfigCommand::Check(command),
        } => command_config_check(&command),
        Commands::Query {
            command: QueryCommand::Validate(command),
        } => command_query_validate(&command),
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.as_deref())?;
    let server = McpServer::from_config(config)
        .map_err(|err| CliError::new(format!("server init failed: {err}")))?;
    server.serve().await.map_err(|err| CliError::new(format!("server failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Config Command
// ============================================================================

/// Executes `config check`.
fn command_config_check(command: &ConfigCheckCommand) -> CliResult<ExitCode> {
    let summary = check_config(command.config.as_deref())?;
    write_stdout_line(&summary).map_err(|err| output_error("stdout", &err))?;
    Ok(ExitCode::SUCCESS)
}

/// Loads a config and renders its effective settings as one JSON line.
fn check_config(path: Option<&Path>) -> CliResult<String> {
    let config = load_config(path)?;
    let options =
        config.pool_options().map_err(|err| CliError::new(format!("invalid config: {err}")))?;
    let summary = json!({
        "valid": true,
        "transport": config.server.transport,
        "engine": config.engine.engine_type,
        "audit": config.audit.sink,
        "max_sessions": options.max_sessions,
        "max_concurrent": options.max_concurrent_calls,
        "data_dir": options.data_dir.display().to_string(),
        "ledger_id": options.ledger_id,
    });
    Ok(summary.to_string())
}

/// Loads and validates configuration from `path` or the default locations.
fn load_config(path: Option<&Path>) -> CliResult<LedgerBridgeConfig> {
    LedgerBridgeConfig::load(path)
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

// ============================================================================
// SECTION: Query Command
// ============================================================================

/// Executes `query validate`; exits non-zero when diagnostics are reported.
fn command_query_validate(command: &QueryValidateCommand) -> CliResult<ExitCode> {
    let (valid, report) = query_report(&command.query)?;
    write_stdout_line(&report).map_err(|err| output_error("stdout", &err))?;
    Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Validates `query` against the default schema and renders the result.
fn query_report(query: &str) -> CliResult<(bool, String)> {
    let result = validate_query(query, &QuerySchema::ledger_default());
    let report = serde_json::to_string_pretty(&result)
        .map_err(|err| CliError::new(format!("failed to render diagnostics: {err}")))?;
    Ok((result.valid, report))
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Builds an error for a failed write to `stream`.
fn output_error(stream: &str, error: &std::io::Error) -> CliError {
    CliError::new(format!("failed to write to {stream}: {error}"))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
