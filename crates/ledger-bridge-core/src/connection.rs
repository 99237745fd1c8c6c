// crates/ledger-bridge-core/src/connection.rs
// ============================================================================
// Module: Session Connection
// Description: One session's isolated engine binding and state machine.
// Purpose: Normalize engine operations behind gate, retry, and batch control.
// Dependencies: tokio, serde, serde_json
// ============================================================================

//! ## Overview
//! A [`Connection`] owns one session's engine handle, opened against the
//! session's private working directory. It moves through
//! `uninitialized → initializing → ready → shutting-down → closed`, with a
//! failure edge from `initializing` back to `uninitialized`.
//!
//! Initialization runs in a spawned task so every concurrent caller observes
//! the same outcome even if the caller that started it goes away. Every engine
//! call holds a [`crate::gate::ConcurrencyGate`] permit and runs under the
//! configured retry policy; successful mutations outside a batch are followed
//! by an automatic synchronization.
//!
//! ## Invariants
//! - Exactly one initialization runs at a time per connection.
//! - Operations are only admitted while `ready`.
//! - Idle shutdown is claimed under the same lock that admits operations, so an
//!   admitted operation is never cancelled by eviction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::audit::BridgeAuditSink;
use crate::audit::PoolAuditEvent;
use crate::audit::PoolAuditRecord;
use crate::audit::now_unix_ms;
use crate::batch::BatchCoordinator;
use crate::engine::EngineError;
use crate::engine::EngineOpenRequest;
use crate::engine::EngineOperation;
use crate::engine::LedgerHandle;
use crate::engine::OperationKind;
use crate::engine::SharedLedgerEngine;
use crate::error::BridgeError;
use crate::gate::ConcurrencyGate;
use crate::query::validate_query;
use crate::retry::RetryExecutor;
use crate::retry::RetryNotice;
use crate::retry::RetryPolicy;
use crate::schema::QuerySchema;
use crate::session::SessionId;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created; no engine handle.
    Uninitialized,
    /// Opening the engine and loading the replica.
    Initializing,
    /// Accepting operations.
    Ready,
    /// Flushing and releasing the engine handle.
    ShuttingDown,
    /// Engine handle released.
    Closed,
}

impl ConnectionState {
    /// Returns the snake-case state label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        }
    }

    /// Returns true once teardown has begun.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session engine parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Private working directory for the session.
    pub working_dir: PathBuf,
    /// Remote ledger server URL.
    pub server_url: String,
    /// Remote server credential, when configured.
    pub credential: Option<String>,
    /// Ledger to load a replica of.
    pub ledger_id: String,
    /// Ledger encryption password, when configured.
    pub ledger_password: Option<String>,
    /// Retry policy for opening the engine and loading the replica.
    pub init_retry: RetryPolicy,
    /// Retry policy for operations and synchronization.
    pub call_retry: RetryPolicy,
}

/// Collaborators shared by every connection in a pool.
#[derive(Clone)]
pub struct ConnectionDeps {
    /// Engine factory.
    pub engine: SharedLedgerEngine,
    /// Process-wide engine call gate.
    pub gate: ConcurrencyGate,
    /// Schema used to validate query operations.
    pub schema: Arc<QuerySchema>,
    /// Audit sink for lifecycle and degradation events.
    pub audit: Arc<dyn BridgeAuditSink>,
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Creation time (milliseconds since epoch).
    pub created_unix_ms: u128,
    /// Last activity (milliseconds since epoch).
    pub last_activity_unix_ms: u128,
    /// Time since last activity.
    pub idle: Duration,
    /// Operations currently admitted.
    pub in_flight: usize,
}

/// Shared initialization outcome; `None` until the attempt finishes.
type InitOutcome = Option<Result<(), BridgeError>>;

/// Mutable connection state guarded by the connection mutex.
struct ConnectionInner {
    /// Lifecycle state.
    state: ConnectionState,
    /// Engine handle while ready.
    handle: Option<Arc<dyn LedgerHandle>>,
    /// Outcome channel of the running initialization.
    init: Option<watch::Receiver<InitOutcome>>,
    /// Last activity on the runtime clock.
    last_activity: Instant,
    /// Last activity on the wall clock (milliseconds since epoch).
    last_activity_unix_ms: u128,
    /// Operations currently admitted.
    in_flight: usize,
}

impl ConnectionInner {
    /// Records activity now.
    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_unix_ms = now_unix_ms();
    }

    /// Moves to `shutting-down` and takes the engine handle.
    fn begin_shutdown(&mut self) -> ShutdownTicket {
        self.state = ConnectionState::ShuttingDown;
        self.init = None;
        ShutdownTicket {
            handle: self.handle.take(),
        }
    }
}

/// Claim on a connection's teardown, returned by the shutdown claim methods.
#[must_use = "a claimed shutdown must be completed"]
pub(crate) struct ShutdownTicket {
    /// Engine handle to flush and release, if the connection was ready.
    handle: Option<Arc<dyn LedgerHandle>>,
}

/// Admitted operation; releases admission and records activity on drop.
struct ActivityGuard<'a> {
    /// Connection the operation was admitted to.
    connection: &'a Connection,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.connection.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.touch();
    }
}

/// One session's engine binding.
pub struct Connection {
    /// Owning session.
    session_id: SessionId,
    /// Engine parameters.
    settings: ConnectionSettings,
    /// Shared collaborators.
    deps: ConnectionDeps,
    /// Batch nesting tracker.
    batches: BatchCoordinator,
    /// Creation time (milliseconds since epoch).
    created_unix_ms: u128,
    /// Mutable state.
    inner: Mutex<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .field("working_dir", &self.settings.working_dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

impl Connection {
    /// Creates an uninitialized connection.
    #[must_use]
    pub fn new(session_id: SessionId, settings: ConnectionSettings, deps: ConnectionDeps) -> Self {
        let now_ms = now_unix_ms();
        Self {
            session_id,
            settings,
            deps,
            batches: BatchCoordinator::new(),
            created_unix_ms: now_ms,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Uninitialized,
                handle: None,
                init: None,
                last_activity: Instant::now(),
                last_activity_unix_ms: now_ms,
                in_flight: 0,
            }),
        }
    }

    /// Returns the owning session.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns the session's private working directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.settings.working_dir
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Returns a point-in-time view of the connection.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.lock();
        ConnectionSnapshot {
            state: inner.state,
            created_unix_ms: self.created_unix_ms,
            last_activity_unix_ms: inner.last_activity_unix_ms,
            idle: inner.last_activity.elapsed(),
            in_flight: inner.in_flight,
        }
    }

    /// Records activity without running an operation.
    pub fn touch(&self) {
        self.lock().touch();
    }

    /// Opens the engine and loads the replica, once.
    ///
    /// Concurrent callers share the single in-progress attempt and its
    /// outcome. Calling this on a ready connection is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Initialization`] when the engine cannot be
    /// opened after retries, [`BridgeError::Io`] when the working directory
    /// cannot be created, and [`BridgeError::SessionClosed`] when teardown has
    /// begun.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), BridgeError> {
        let mut receiver = {
            let mut inner = self.lock();
            match inner.state {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::ShuttingDown | ConnectionState::Closed => {
                    return Err(BridgeError::SessionClosed(self.session_id.clone()));
                }
                ConnectionState::Initializing => match &inner.init {
                    Some(receiver) => receiver.clone(),
                    None => {
                        return Err(BridgeError::Internal(
                            "initialization in progress without an outcome channel".to_string(),
                        ));
                    }
                },
                ConnectionState::Uninitialized => {
                    let (sender, receiver) = watch::channel(None);
                    inner.state = ConnectionState::Initializing;
                    inner.init = Some(receiver.clone());
                    inner.touch();
                    let connection = Arc::clone(self);
                    tokio::spawn(async move {
                        let outcome = connection.run_initialization().await;
                        let _ = sender.send(Some(outcome));
                    });
                    receiver
                }
            }
        };
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            // The initialization task ended without reporting; reset for a fresh attempt.
            let mut inner = self.lock();
            if inner.state == ConnectionState::Initializing {
                inner.state = ConnectionState::Uninitialized;
                inner.init = None;
            }
            Err(BridgeError::Internal(format!(
                "initialization of session {} ended without an outcome",
                self.session_id
            )))
        })
    }

    /// Runs one initialization attempt and publishes the resulting state.
    async fn run_initialization(&self) -> Result<(), BridgeError> {
        let started = Instant::now();
        let opened = self.open_engine().await;
        let orphan = {
            let mut inner = self.lock();
            match opened {
                Ok(handle) if inner.state == ConnectionState::Initializing => {
                    inner.state = ConnectionState::Ready;
                    inner.handle = Some(handle);
                    inner.init = None;
                    inner.touch();
                    None
                }
                Ok(handle) => Some(Ok(handle)),
                Err(error) => {
                    if inner.state == ConnectionState::Initializing {
                        inner.state = ConnectionState::Uninitialized;
                        inner.init = None;
                    }
                    inner.touch();
                    Some(Err(error))
                }
            }
        };
        match orphan {
            None => {
                self.audit(PoolAuditEvent::SessionOpened {
                    session_id: self.session_id.to_string(),
                    init_ms: duration_ms(started.elapsed()),
                });
                Ok(())
            }
            Some(Ok(handle)) => {
                // Teardown began while the engine was opening.
                let _permit = self.deps.gate.acquire().await;
                if let Err(error) = handle.shutdown().await {
                    self.audit(PoolAuditEvent::TeardownError {
                        session_id: self.session_id.to_string(),
                        message: error.message,
                    });
                }
                Err(BridgeError::SessionClosed(self.session_id.clone()))
            }
            Some(Err(error)) => {
                self.audit(PoolAuditEvent::SessionInitFailed {
                    session_id: self.session_id.to_string(),
                    message: error.detail(),
                });
                Err(error)
            }
        }
    }

    /// Prepares the working directory, opens the engine, and loads the replica.
    async fn open_engine(&self) -> Result<Arc<dyn LedgerHandle>, BridgeError> {
        tokio::fs::create_dir_all(&self.settings.working_dir).await.map_err(|err| {
            BridgeError::Io(format!(
                "failed to create working directory {}: {err}",
                self.settings.working_dir.display()
            ))
        })?;
        let this = self;
        RetryExecutor::new(self.settings.init_retry)
            .retry_if(
                "initialize",
                move |_| async move {
                    let _permit = this.deps.gate.acquire().await;
                    let handle = this
                        .deps
                        .engine
                        .open(EngineOpenRequest {
                            working_dir: this.settings.working_dir.clone(),
                            server_url: this.settings.server_url.clone(),
                            credential: this.settings.credential.clone(),
                        })
                        .await?;
                    let loaded = handle
                        .load_replica(
                            &this.settings.ledger_id,
                            this.settings.ledger_password.as_deref(),
                        )
                        .await;
                    if let Err(error) = loaded {
                        if let Err(close_error) = handle.shutdown().await {
                            this.audit(PoolAuditEvent::TeardownError {
                                session_id: this.session_id.to_string(),
                                message: close_error.message,
                            });
                        }
                        return Err(error);
                    }
                    Ok(handle)
                },
                EngineError::is_transient,
                move |notice| this.audit_retry(&notice),
            )
            .await
            .map_err(|error| BridgeError::Initialization {
                session: self.session_id.clone(),
                message: error.message,
            })
    }

    /// Claims teardown unless it has already begun.
    pub(crate) fn claim_shutdown(&self) -> Option<ShutdownTicket> {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return None;
        }
        Some(inner.begin_shutdown())
    }

    /// Claims teardown when ready, idle for at least `idle_timeout`, and
    /// running no operation.
    pub(crate) fn claim_idle(
        &self,
        idle_timeout: Duration,
        now: Instant,
    ) -> Option<ShutdownTicket> {
        let mut inner = self.lock();
        let idle = now.saturating_duration_since(inner.last_activity);
        if inner.state != ConnectionState::Ready || inner.in_flight > 0 || idle < idle_timeout {
            return None;
        }
        Some(inner.begin_shutdown())
    }

    /// Flushes and releases the claimed engine handle, then marks `closed`.
    ///
    /// Both the flush and the release are attempted; the first failure is
    /// returned for the caller to record.
    pub(crate) async fn complete_shutdown(
        &self,
        ticket: ShutdownTicket,
    ) -> Result<(), BridgeError> {
        let mut first_error: Option<EngineError> = None;
        if let Some(handle) = ticket.handle {
            let _permit = self.deps.gate.acquire().await;
            if let Err(error) = handle.synchronize().await {
                first_error = Some(error);
            }
            if let Err(error) = handle.shutdown().await {
                first_error.get_or_insert(error);
            }
        }
        self.lock().state = ConnectionState::Closed;
        match first_error {
            Some(error) => Err(BridgeError::Engine {
                message: error.message,
            }),
            None => Ok(()),
        }
    }

    /// Flushes pending changes, releases the engine, and marks `closed`.
    ///
    /// Tolerates connections in any state; a connection already shutting
    /// down or closed is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Engine`] when the flush or release failed; the
    /// connection is closed regardless.
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        match self.claim_shutdown() {
            Some(ticket) => self.complete_shutdown(ticket).await,
            None => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Operations
// ============================================================================

impl Connection {
    /// Executes one normalized operation.
    ///
    /// Query operations are validated against the schema first. Successful
    /// mutations outside a batch are followed by a synchronization whose
    /// failure is recorded but does not fail the operation.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] for rejected queries,
    /// [`BridgeError::Engine`] when the engine call fails after retries, and
    /// [`BridgeError::SessionClosed`] when the connection is not accepting
    /// operations.
    pub async fn execute(&self, operation: &EngineOperation) -> Result<Value, BridgeError> {
        let (handle, _activity) = self.begin_operation()?;
        if operation.kind == OperationKind::Query {
            self.validate(operation)?;
        }
        let value = self.invoke_with_retry(&handle, operation).await?;
        if operation.is_mutation()
            && !self.batches.is_active()
            && let Err(error) = self.sync_handle(&handle).await
        {
            self.audit(PoolAuditEvent::SyncFailed {
                session_id: self.session_id.to_string(),
                message: error.detail(),
            });
        }
        Ok(value)
    }

    /// Runs mutations as one batch with a single trailing synchronization.
    ///
    /// Applied mutations stay applied when a later one fails.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidRequest`] when a non-mutation is
    /// included, the first mutation's own error when nothing was applied,
    /// [`BridgeError::PartialBatchFailure`] when a later mutation fails, and
    /// the synchronization error when every mutation succeeded but the flush
    /// failed.
    pub async fn run_batch(
        &self,
        operations: &[EngineOperation],
    ) -> Result<Vec<Value>, BridgeError> {
        if let Some(operation) = operations.iter().find(|operation| !operation.is_mutation()) {
            return Err(BridgeError::InvalidRequest(format!(
                "batch step `{}` is not a mutation",
                operation.name
            )));
        }
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        let (handle, _activity) = self.begin_operation()?;
        let handle = &handle;
        let this = self;
        self.batches
            .run_batch(
                async {
                    let mut results = Vec::with_capacity(operations.len());
                    for (step, operation) in operations.iter().enumerate() {
                        match self.invoke_with_retry(handle, operation).await {
                            Ok(value) => results.push(value),
                            Err(error) if step == 0 => return Err(error),
                            Err(error) => {
                                self.audit(PoolAuditEvent::BatchPartialFailure {
                                    session_id: self.session_id.to_string(),
                                    failed_step: step,
                                    applied: step,
                                    message: error.detail(),
                                });
                                return Err(BridgeError::PartialBatchFailure {
                                    failed_step: step,
                                    applied: step,
                                    message: error.detail(),
                                });
                            }
                        }
                    }
                    Ok(results)
                },
                move || async move {
                    let flushed = this.sync_handle(handle).await;
                    if let Err(error) = &flushed {
                        this.audit(PoolAuditEvent::SyncFailed {
                            session_id: self.session_id.to_string(),
                            message: error.detail(),
                        });
                    }
                    flushed
                },
            )
            .await
    }

    /// Pushes local changes to the remote server.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Engine`] when synchronization fails after
    /// retries and [`BridgeError::SessionClosed`] when the connection is not
    /// accepting operations.
    pub async fn synchronize(&self) -> Result<(), BridgeError> {
        let (handle, _activity) = self.begin_operation()?;
        self.sync_handle(&handle).await
    }

    /// Admits an operation if the connection is ready.
    fn begin_operation(&self) -> Result<(Arc<dyn LedgerHandle>, ActivityGuard<'_>), BridgeError> {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Ready => {}
            ConnectionState::ShuttingDown | ConnectionState::Closed => {
                return Err(BridgeError::SessionClosed(self.session_id.clone()));
            }
            ConnectionState::Uninitialized | ConnectionState::Initializing => {
                return Err(BridgeError::InvalidRequest(format!(
                    "session {} is not initialized",
                    self.session_id
                )));
            }
        }
        let handle = inner.handle.clone().ok_or_else(|| {
            BridgeError::Internal(format!("ready session {} has no engine handle", self.session_id))
        })?;
        inner.in_flight += 1;
        inner.touch();
        drop(inner);
        Ok((
            handle,
            ActivityGuard {
                connection: self,
            },
        ))
    }

    /// Rejects query operations that fail schema validation.
    fn validate(&self, operation: &EngineOperation) -> Result<(), BridgeError> {
        let query = operation.query_text().ok_or_else(|| {
            BridgeError::InvalidRequest("query operation requires a `query` string".to_string())
        })?;
        let result = validate_query(query, &self.deps.schema);
        if result.valid {
            Ok(())
        } else {
            Err(BridgeError::Validation {
                diagnostics: result.diagnostics,
            })
        }
    }

    /// Invokes an operation under the gate and the call retry policy.
    async fn invoke_with_retry(
        &self,
        handle: &Arc<dyn LedgerHandle>,
        operation: &EngineOperation,
    ) -> Result<Value, BridgeError> {
        let this = self;
        RetryExecutor::new(self.settings.call_retry)
            .retry_if(
                &operation.name,
                move |_| async move {
                    let _permit = this.deps.gate.acquire().await;
                    handle.invoke(operation).await
                },
                EngineError::is_transient,
                move |notice| this.audit_retry(&notice),
            )
            .await
            .map_err(|error| BridgeError::Engine {
                message: error.message,
            })
    }

    /// Synchronizes under the gate and the call retry policy.
    async fn sync_handle(&self, handle: &Arc<dyn LedgerHandle>) -> Result<(), BridgeError> {
        let this = self;
        RetryExecutor::new(self.settings.call_retry)
            .retry_if(
                "synchronize",
                move |_| async move {
                    let _permit = this.deps.gate.acquire().await;
                    handle.synchronize().await
                },
                EngineError::is_transient,
                move |notice| this.audit_retry(&notice),
            )
            .await
            .map_err(|error| BridgeError::Engine {
                message: error.message,
            })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

impl Connection {
    /// Locks connection state, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records an audit event.
    fn audit(&self, event: PoolAuditEvent) {
        self.deps.audit.record_pool(&PoolAuditRecord::now(event));
    }

    /// Records a scheduled retry.
    fn audit_retry(&self, notice: &RetryNotice<'_, EngineError>) {
        self.audit(PoolAuditEvent::EngineRetry {
            session_id: self.session_id.to_string(),
            operation: notice.label.to_string(),
            attempt: notice.attempt,
            max_attempts: notice.max_attempts,
            delay_ms: duration_ms(notice.delay),
            message: notice.error.message.clone(),
        });
    }
}

/// Converts a duration to whole milliseconds, saturating.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
