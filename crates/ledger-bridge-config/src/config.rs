// crates/ledger-bridge-config/src/config.rs
// ============================================================================
// Module: Ledger Bridge Configuration
// Description: Configuration loading and validation for the ledger bridge.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: ledger-bridge-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! The file location resolves from the CLI flag, then the
//! `LEDGER_BRIDGE_CONFIG` environment variable, then `ledger-bridge.toml` in
//! the working directory. Secrets are never stored in the file: the engine
//! section names environment variables that hold them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use ledger_bridge_core::PoolOptions;
use ledger_bridge_core::QuerySchema;
use ledger_bridge_core::RetryPolicy;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "ledger-bridge.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "LEDGER_BRIDGE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of concurrent sessions.
pub const MAX_SESSIONS_LIMIT: usize = 1024;
/// Minimum idle timeout in milliseconds.
pub const MIN_IDLE_TIMEOUT_MS: u64 = 1_000;
/// Minimum sweep interval in milliseconds.
pub const MIN_SWEEP_INTERVAL_MS: u64 = 100;
/// Maximum concurrent engine calls.
pub const MAX_GATE_LIMIT: usize = 64;
/// Maximum retry attempts per operation.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 60_000;
/// Maximum request body size in bytes.
pub const MAX_BODY_BYTES_LIMIT: usize = 16 * 1024 * 1024;
/// Maximum length of the ledger identifier.
pub(crate) const MAX_LEDGER_ID_LENGTH: usize = 256;
/// Maximum number of sidecar command arguments.
pub(crate) const MAX_COMMAND_ARGS: usize = 64;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Ledger bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerBridgeConfig {
    /// Server transport configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Engine call gate configuration.
    #[serde(default)]
    pub gate: GateConfig,
    /// Retry policies.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Ledger engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Audit sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl LedgerBridgeConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.pool.validate()?;
        self.gate.validate()?;
        self.retry.init.validate("retry.init")?;
        self.retry.call.validate("retry.call")?;
        self.engine.validate()?;
        self.audit.validate()?;
        Ok(())
    }

    /// Builds pool options, resolving secrets from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a configured secret variable is unset.
    pub fn pool_options(&self) -> Result<PoolOptions, ConfigError> {
        Ok(PoolOptions {
            max_sessions: self.pool.max_sessions,
            idle_timeout: Duration::from_millis(self.pool.idle_timeout_ms),
            sweep_interval: Duration::from_millis(self.pool.sweep_interval_ms),
            active_window: Duration::from_millis(self.pool.active_window_ms),
            max_concurrent_calls: self.gate.max_concurrent,
            data_dir: PathBuf::from(self.engine.data_dir.trim()),
            server_url: self.engine.server_url.trim().to_string(),
            credential: self.engine.resolve_credential()?,
            ledger_id: self.engine.ledger_id.trim().to_string(),
            ledger_password: self.engine.resolve_ledger_password()?,
            init_retry: self.retry.init.to_policy(),
            call_retry: self.retry.call.to_policy(),
            query_schema: QuerySchema::ledger_default(),
        })
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Transport used to serve MCP requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// Single-session stdio transport.
    #[default]
    Stdio,
    /// Multi-session HTTP transport.
    Http,
}

/// Server transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Transport type.
    #[serde(default)]
    pub transport: ServerTransport,
    /// Bind address for the HTTP transport.
    #[serde(default)]
    pub bind: Option<String>,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: ServerTransport::Stdio,
            bind: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// Validates server transport configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_BODY_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes must be between 1 and {MAX_BODY_BYTES_LIMIT}"
            )));
        }
        match self.transport {
            ServerTransport::Http => {
                self.bind_addr()?;
            }
            ServerTransport::Stdio => {
                if self.bind.is_some() {
                    return Err(ConfigError::Invalid(
                        "stdio transport does not accept a bind address".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Parses the HTTP bind address, requiring loopback.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the address is missing, malformed, or not
    /// loopback.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let bind = self.bind.as_deref().unwrap_or_default().trim();
        if bind.is_empty() {
            return Err(ConfigError::Invalid("http transport requires bind address".to_string()));
        }
        let addr: SocketAddr =
            bind.parse().map_err(|_| ConfigError::Invalid("invalid bind address".to_string()))?;
        if !addr.ip().is_loopback() {
            return Err(ConfigError::Invalid("non-loopback bind disallowed".to_string()));
        }
        Ok(addr)
    }
}

// ============================================================================
// SECTION: Pool and Gate
// ============================================================================

/// Session pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum ready plus initializing sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Idle time before a session is closed, in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Interval between idle sweeps, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Window within which a session counts as active, in milliseconds.
    #[serde(default = "default_active_window_ms")]
    pub active_window_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            idle_timeout_ms: default_idle_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            active_window_ms: default_active_window_ms(),
        }
    }
}

impl PoolConfig {
    /// Validates pool limits.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 || self.max_sessions > MAX_SESSIONS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "pool.max_sessions must be between 1 and {MAX_SESSIONS_LIMIT}"
            )));
        }
        if self.idle_timeout_ms < MIN_IDLE_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "pool.idle_timeout_ms must be at least {MIN_IDLE_TIMEOUT_MS}"
            )));
        }
        if self.sweep_interval_ms < MIN_SWEEP_INTERVAL_MS
            || self.sweep_interval_ms > self.idle_timeout_ms
        {
            return Err(ConfigError::Invalid(format!(
                "pool.sweep_interval_ms must be between {MIN_SWEEP_INTERVAL_MS} and \
                 pool.idle_timeout_ms"
            )));
        }
        if self.active_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "pool.active_window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Engine call gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Maximum concurrent engine calls across all sessions.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl GateConfig {
    /// Validates the gate limit.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 || self.max_concurrent > MAX_GATE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "gate.max_concurrent must be between 1 and {MAX_GATE_LIMIT}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Retry policies for initialization and calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Policy for opening the engine and loading the replica.
    #[serde(default)]
    pub init: RetryPolicyConfig,
    /// Policy for operations and synchronization.
    #[serde(default)]
    pub call: RetryPolicyConfig,
}

/// One retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicyConfig {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff after the first failure, in milliseconds.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Backoff cap, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicyConfig {
    /// Validates attempt and backoff bounds.
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "{section}.max_attempts must be between 1 and {MAX_RETRY_ATTEMPTS}"
            )));
        }
        if self.max_backoff_ms > MAX_BACKOFF_MS {
            return Err(ConfigError::Invalid(format!(
                "{section}.max_backoff_ms must be at most {MAX_BACKOFF_MS}"
            )));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "{section}.base_backoff_ms must not exceed {section}.max_backoff_ms"
            )));
        }
        Ok(())
    }

    /// Converts to a core retry policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Ledger engine implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    /// In-process reference engine.
    #[default]
    Memory,
    /// External sidecar process speaking JSON-RPC over stdio.
    Process,
}

/// Ledger engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine implementation.
    #[serde(rename = "type", default)]
    pub engine_type: EngineType,
    /// Sidecar command and arguments (process engine only).
    #[serde(default)]
    pub command: Vec<String>,
    /// Root directory for session working directories.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Remote ledger server URL.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Environment variable holding the server credential.
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Ledger to load for every session.
    #[serde(default = "default_ledger_id")]
    pub ledger_id: String,
    /// Environment variable holding the ledger encryption password.
    #[serde(default)]
    pub ledger_password_env: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_type: EngineType::Memory,
            command: Vec::new(),
            data_dir: default_data_dir(),
            server_url: default_server_url(),
            credential_env: None,
            ledger_id: default_ledger_id(),
            ledger_password_env: None,
        }
    }
}

impl EngineConfig {
    /// Validates engine settings.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.engine_type {
            EngineType::Process => {
                let program = self.command.first().map_or("", |program| program.trim());
                if program.is_empty() {
                    return Err(ConfigError::Invalid(
                        "engine.command is required for the process engine".to_string(),
                    ));
                }
                if self.command.len() > MAX_COMMAND_ARGS {
                    return Err(ConfigError::Invalid(format!(
                        "engine.command accepts at most {MAX_COMMAND_ARGS} entries"
                    )));
                }
            }
            EngineType::Memory => {
                if !self.command.is_empty() {
                    return Err(ConfigError::Invalid(
                        "engine.command is only valid for the process engine".to_string(),
                    ));
                }
            }
        }
        validate_path_string("engine.data_dir", &self.data_dir)?;
        let url = self.server_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(
                "engine.server_url must include http:// or https://".to_string(),
            ));
        }
        let ledger_id = self.ledger_id.trim();
        if ledger_id.is_empty() || ledger_id.len() > MAX_LEDGER_ID_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "engine.ledger_id must be 1-{MAX_LEDGER_ID_LENGTH} characters"
            )));
        }
        validate_env_name("engine.credential_env", self.credential_env.as_deref())?;
        validate_env_name("engine.ledger_password_env", self.ledger_password_env.as_deref())?;
        Ok(())
    }

    /// Reads the server credential from its environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the variable is configured but unset.
    pub fn resolve_credential(&self) -> Result<Option<String>, ConfigError> {
        resolve_secret("engine.credential_env", self.credential_env.as_deref())
    }

    /// Reads the ledger password from its environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the variable is configured but unset.
    pub fn resolve_ledger_password(&self) -> Result<Option<String>, ConfigError> {
        resolve_secret("engine.ledger_password_env", self.ledger_password_env.as_deref())
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Discard audit events.
    None,
}

/// Audit logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Sink selection.
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// Output path for the file sink.
    #[serde(default)]
    pub path: Option<String>,
}

impl AuditConfig {
    /// Validates audit settings.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, self.path.as_deref()) {
            (AuditSinkKind::File, Some(path)) => validate_path_string("audit.path", path),
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("audit.path is required for the file sink".to_string()))
            }
            (_, Some(_)) => Err(ConfigError::Invalid(
                "audit.path is only valid for the file sink".to_string(),
            )),
            (_, None) => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates an environment variable name when one is configured.
fn validate_env_name(field: &str, name: Option<&str>) -> Result<(), ConfigError> {
    let Some(name) = name else {
        return Ok(());
    };
    let valid = !name.is_empty()
        && !name.starts_with(|ch: char| ch.is_ascii_digit())
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{field} must be a valid environment variable name")))
    }
}

/// Reads a secret from the named environment variable.
fn resolve_secret(field: &str, name: Option<&str>) -> Result<Option<String>, ConfigError> {
    let Some(name) = name else {
        return Ok(None);
    };
    env::var(name)
        .map(Some)
        .map_err(|_| ConfigError::Invalid(format!("{field} names unset variable {name}")))
}

/// Default maximum request body size.
pub(crate) const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Default session cap.
pub(crate) const fn default_max_sessions() -> usize {
    8
}

/// Default idle timeout (15 minutes).
pub(crate) const fn default_idle_timeout_ms() -> u64 {
    15 * 60 * 1_000
}

/// Default sweep interval (1 minute).
pub(crate) const fn default_sweep_interval_ms() -> u64 {
    60 * 1_000
}

/// Default active window (5 minutes).
pub(crate) const fn default_active_window_ms() -> u64 {
    5 * 60 * 1_000
}

/// Default gate limit.
pub(crate) const fn default_max_concurrent() -> usize {
    1
}

/// Default retry attempts.
pub(crate) const fn default_max_attempts() -> u32 {
    3
}

/// Default base backoff.
pub(crate) const fn default_base_backoff_ms() -> u64 {
    200
}

/// Default backoff cap.
pub(crate) const fn default_max_backoff_ms() -> u64 {
    5_000
}

/// Default data directory.
pub(crate) fn default_data_dir() -> String {
    "ledger-bridge-data".to_string()
}

/// Default remote server URL.
pub(crate) fn default_server_url() -> String {
    "http://localhost:5006".to_string()
}

/// Default ledger identifier.
pub(crate) fn default_ledger_id() -> String {
    "default".to_string()
}
