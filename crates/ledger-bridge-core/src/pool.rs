// crates/ledger-bridge-core/src/pool.rs
// ============================================================================
// Module: Connection Pool
// Description: Session-keyed registry of engine connections.
// Purpose: Bound live sessions, evict idle ones, and tear everything down.
// Dependencies: tokio, serde, serde_json
// ============================================================================

//! ## Overview
//! [`ConnectionPool`] maps session identifiers to [`Connection`]s. The first
//! request for a session creates its connection (subject to the session cap)
//! and initializes it; later requests reuse it. A background sweeper closes
//! connections that have been idle longer than the configured timeout, and
//! [`ConnectionPool::shutdown_all`] closes everything on process exit.
//!
//! ## Invariants
//! - Ready plus initializing sessions never exceed `max_sessions`.
//! - A connection running an operation is never evicted for idleness.
//! - Map entries are only removed by the caller that owns that exact
//!   connection instance, so a replacement is never dropped by mistake.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;

use crate::audit::BridgeAuditSink;
use crate::audit::CloseReason;
use crate::audit::PoolAuditEvent;
use crate::audit::PoolAuditRecord;
use crate::connection::Connection;
use crate::connection::ConnectionDeps;
use crate::connection::ConnectionSettings;
use crate::connection::ConnectionState;
use crate::connection::duration_ms;
use crate::engine::EngineOperation;
use crate::engine::SharedLedgerEngine;
use crate::error::BridgeError;
use crate::gate::ConcurrencyGate;
use crate::gate::GateSnapshot;
use crate::retry::RetryPolicy;
use crate::schema::QuerySchema;
use crate::session::SessionId;
use crate::session::session_working_dir;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Shortest idle sweep period; shorter configured periods are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Pool sizing, timing, and engine parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum ready plus initializing sessions.
    pub max_sessions: usize,
    /// Idle time after which a ready session is closed.
    pub idle_timeout: Duration,
    /// Interval between idle sweeps, raised to [`MIN_SWEEP_INTERVAL`].
    pub sweep_interval: Duration,
    /// Sessions with activity inside this window count as active in stats.
    pub active_window: Duration,
    /// Process-wide limit on concurrent engine calls.
    pub max_concurrent_calls: usize,
    /// Root directory under which session working directories are created.
    pub data_dir: PathBuf,
    /// Remote ledger server URL.
    pub server_url: String,
    /// Remote server credential.
    pub credential: Option<String>,
    /// Ledger to load for every session.
    pub ledger_id: String,
    /// Ledger encryption password.
    pub ledger_password: Option<String>,
    /// Retry policy for engine initialization.
    pub init_retry: RetryPolicy,
    /// Retry policy for operations and synchronization.
    pub call_retry: RetryPolicy,
    /// Schema used to validate query operations.
    pub query_schema: QuerySchema,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            idle_timeout: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
            active_window: Duration::from_secs(5 * 60),
            max_concurrent_calls: 1,
            data_dir: PathBuf::from("ledger-bridge-data"),
            server_url: "http://localhost:5006".to_string(),
            credential: None,
            ledger_id: "default".to_string(),
            ledger_password: None,
            init_retry: RetryPolicy::default(),
            call_retry: RetryPolicy::default(),
            query_schema: QuerySchema::ledger_default(),
        }
    }
}

// ============================================================================
// SECTION: Stats
// ============================================================================

/// Per-session entry in [`PoolStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Creation time (milliseconds since epoch).
    pub created_unix_ms: u128,
    /// Last activity (milliseconds since epoch).
    pub last_activity_unix_ms: u128,
    /// Milliseconds since last activity.
    pub idle_ms: u64,
    /// Operations currently running.
    pub in_flight: usize,
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Sessions tracked by the pool in any state.
    pub total_sessions: usize,
    /// Sessions with activity inside the active window.
    pub active_sessions: usize,
    /// Ready plus initializing sessions counted against the cap.
    pub admitted_sessions: usize,
    /// Session cap.
    pub max_sessions: usize,
    /// Engine call gate state.
    pub gate: GateSnapshot,
    /// Per-session detail, sorted by session identifier.
    pub sessions: Vec<SessionSummary>,
}

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Background idle sweeper.
struct Sweeper {
    /// Stop signal.
    stop: oneshot::Sender<()>,
    /// Sweeper task.
    task: JoinHandle<()>,
}

/// Shared pool state.
struct PoolInner {
    /// Pool configuration.
    options: PoolOptions,
    /// Collaborators handed to every connection.
    deps: ConnectionDeps,
    /// Session registry.
    sessions: Mutex<HashMap<SessionId, Arc<Connection>>>,
    /// Idle sweeper, once started.
    sweeper: Mutex<Option<Sweeper>>,
    /// Set once [`ConnectionPool::shutdown_all`] begins.
    closed: AtomicBool,
}

/// Session-keyed connection pool.
#[derive(Clone)]
pub struct ConnectionPool {
    /// Shared pool state.
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool; call [`ConnectionPool::start`] to begin idle sweeps.
    #[must_use]
    pub fn new(
        options: PoolOptions,
        engine: SharedLedgerEngine,
        audit: Arc<dyn BridgeAuditSink>,
    ) -> Self {
        let deps = ConnectionDeps {
            engine,
            gate: ConcurrencyGate::new(options.max_concurrent_calls),
            schema: Arc::new(options.query_schema.clone()),
            audit,
        };
        Self {
            inner: Arc::new(PoolInner {
                options,
                deps,
                sessions: Mutex::new(HashMap::new()),
                sweeper: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the pool options.
    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    /// Returns the shared engine call gate.
    #[must_use]
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.deps.gate
    }

    /// Returns the number of tracked sessions in any state.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Returns true once the pool has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Starts the background idle sweeper. Calling this twice is a no-op.
    pub fn start(&self) {
        if self.is_closed() {
            return;
        }
        let mut sweeper = self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_some() {
            return;
        }
        let (stop, stop_rx) = oneshot::channel();
        let interval = self.inner.options.sweep_interval.max(MIN_SWEEP_INTERVAL);
        let task = tokio::spawn(run_sweeper(Arc::downgrade(&self.inner), interval, stop_rx));
        *sweeper = Some(Sweeper {
            stop,
            task,
        });
    }

    /// Returns true when a new session would be admitted.
    #[must_use]
    pub fn can_accept_new_session(&self) -> bool {
        !self.is_closed() && admitted_count(&self.sessions()) < self.inner.options.max_sessions
    }

    /// Resolves the ready connection for `session`, creating and initializing
    /// it on first use.
    ///
    /// Concurrent first requests for the same session share one
    /// initialization and its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CapacityExceeded`] when the session cap is
    /// reached, [`BridgeError::Initialization`] when the engine cannot be
    /// opened, and [`BridgeError::PoolShutdown`] after shutdown.
    pub async fn get_connection(
        &self,
        session: &SessionId,
    ) -> Result<Arc<Connection>, BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::PoolShutdown);
        }
        if !session.is_valid() {
            return Err(BridgeError::InvalidRequest(
                "session identifier must be 1-256 bytes without control characters".to_string(),
            ));
        }
        let connection = {
            let mut sessions = self.sessions();
            // `shutdown_all` drains under this lock after setting the flag.
            if self.is_closed() {
                return Err(BridgeError::PoolShutdown);
            }
            match sessions.get(session) {
                Some(existing) if !existing.state().is_terminal() => {
                    existing.touch();
                    Arc::clone(existing)
                }
                _ => {
                    let current = admitted_count(&sessions);
                    let max = self.inner.options.max_sessions;
                    if current >= max {
                        drop(sessions);
                        self.audit(PoolAuditEvent::SessionRejected {
                            session_id: session.to_string(),
                            current,
                            max,
                        });
                        return Err(BridgeError::CapacityExceeded {
                            current,
                            max,
                        });
                    }
                    let connection = Arc::new(Connection::new(
                        session.clone(),
                        self.settings_for(session),
                        self.inner.deps.clone(),
                    ));
                    sessions.insert(session.clone(), Arc::clone(&connection));
                    connection
                }
            }
        };
        match connection.initialize().await {
            Ok(()) => Ok(connection),
            Err(error) => {
                self.remove_if(session, &connection, |state| {
                    state == ConnectionState::Uninitialized
                });
                Err(error)
            }
        }
    }

    /// Closes one session's connection, flushing pending changes first.
    ///
    /// Returns false when the session was not tracked.
    pub async fn shutdown_connection(&self, session: &SessionId) -> bool {
        let connection = self.sessions().get(session).cloned();
        let Some(connection) = connection else {
            return false;
        };
        if let Some(ticket) = connection.claim_shutdown() {
            let outcome = connection.complete_shutdown(ticket).await;
            self.record_close(session, outcome, CloseReason::Explicit);
        }
        self.remove_if(session, &connection, |_| true);
        true
    }

    /// Closes every connection idle for at least the idle timeout.
    ///
    /// Returns the number of sessions closed.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.inner.options.idle_timeout;
        let claimed: Vec<_> = self
            .sessions()
            .iter()
            .filter_map(|(session, connection)| {
                connection
                    .claim_idle(idle_timeout, now)
                    .map(|ticket| (session.clone(), Arc::clone(connection), ticket))
            })
            .collect();
        let closed = claimed.len();
        for (session, connection, ticket) in claimed {
            let outcome = connection.complete_shutdown(ticket).await;
            self.record_close(&session, outcome, CloseReason::Idle);
            self.remove_if(&session, &connection, |_| true);
        }
        closed
    }

    /// Stops the sweeper and closes every connection concurrently.
    ///
    /// Teardown failures are recorded and never abort the remaining
    /// teardowns. Later [`ConnectionPool::get_connection`] calls fail with
    /// [`BridgeError::PoolShutdown`].
    pub async fn shutdown_all(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let sweeper = self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.stop.send(());
            if let Err(error) = sweeper.task.await
                && !error.is_cancelled()
            {
                self.audit(PoolAuditEvent::TeardownError {
                    session_id: String::new(),
                    message: format!("idle sweeper failed: {error}"),
                });
            }
        }
        let drained: Vec<(SessionId, Arc<Connection>)> = self.sessions().drain().collect();
        let mut teardowns = JoinSet::new();
        for (session, connection) in drained {
            teardowns.spawn(async move {
                let outcome = match connection.claim_shutdown() {
                    Some(ticket) => Some(connection.complete_shutdown(ticket).await),
                    None => None,
                };
                (session, outcome)
            });
        }
        while let Some(joined) = teardowns.join_next().await {
            match joined {
                Ok((session, Some(outcome))) => {
                    self.record_close(&session, outcome, CloseReason::Teardown);
                }
                Ok((_, None)) => {}
                Err(error) => self.audit(PoolAuditEvent::TeardownError {
                    session_id: String::new(),
                    message: error.to_string(),
                }),
            }
        }
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let active_window = self.inner.options.active_window;
        let mut sessions: Vec<SessionSummary> = self
            .sessions()
            .iter()
            .map(|(session, connection)| {
                let snapshot = connection.snapshot();
                SessionSummary {
                    session_id: session.to_string(),
                    state: snapshot.state,
                    created_unix_ms: snapshot.created_unix_ms,
                    last_activity_unix_ms: snapshot.last_activity_unix_ms,
                    idle_ms: duration_ms(snapshot.idle),
                    in_flight: snapshot.in_flight,
                }
            })
            .collect();
        sessions.sort_by(|left, right| left.session_id.cmp(&right.session_id));
        let active_window_ms = duration_ms(active_window);
        PoolStats {
            total_sessions: sessions.len(),
            active_sessions: sessions
                .iter()
                .filter(|summary| {
                    !summary.state.is_terminal() && summary.idle_ms < active_window_ms
                })
                .count(),
            admitted_sessions: sessions
                .iter()
                .filter(|summary| !summary.state.is_terminal())
                .count(),
            max_sessions: self.inner.options.max_sessions,
            gate: self.inner.deps.gate.snapshot(),
            sessions,
        }
    }
}

// ============================================================================
// SECTION: Session Operations
// ============================================================================

impl ConnectionPool {
    /// Executes one operation in `session`.
    ///
    /// # Errors
    ///
    /// Returns any resolution error from [`ConnectionPool::get_connection`]
    /// and any operation error from [`Connection::execute`].
    pub async fn execute(
        &self,
        session: &SessionId,
        operation: &EngineOperation,
    ) -> Result<Value, BridgeError> {
        self.with_connection(session, move |connection| async move {
            connection.execute(operation).await
        })
        .await
    }

    /// Runs mutations as one batch in `session`.
    ///
    /// # Errors
    ///
    /// Returns any resolution error from [`ConnectionPool::get_connection`]
    /// and any batch error from [`Connection::run_batch`].
    pub async fn run_batch(
        &self,
        session: &SessionId,
        operations: &[EngineOperation],
    ) -> Result<Vec<Value>, BridgeError> {
        self.with_connection(session, move |connection| async move {
            connection.run_batch(operations).await
        })
        .await
    }

    /// Pushes `session`'s local changes to the remote server.
    ///
    /// # Errors
    ///
    /// Returns any resolution error from [`ConnectionPool::get_connection`]
    /// and any synchronization error from [`Connection::synchronize`].
    pub async fn synchronize(&self, session: &SessionId) -> Result<(), BridgeError> {
        self.with_connection(session, move |connection| async move {
            connection.synchronize().await
        })
        .await
    }

    /// Runs `call` on the session's connection, resolving once more if the
    /// connection was closed between resolution and admission.
    async fn with_connection<T, F, Fut>(
        &self,
        session: &SessionId,
        mut call: F,
    ) -> Result<T, BridgeError>
    where
        F: FnMut(Arc<Connection>) -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let connection = self.get_connection(session).await?;
        match call(connection).await {
            Err(BridgeError::SessionClosed(_)) => {
                let connection = self.get_connection(session).await?;
                call(connection).await
            }
            outcome => outcome,
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

impl ConnectionPool {
    /// Locks the session registry, recovering from poisoning.
    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Connection>>> {
        self.inner.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds per-session engine settings.
    fn settings_for(&self, session: &SessionId) -> ConnectionSettings {
        let options = &self.inner.options;
        ConnectionSettings {
            working_dir: session_working_dir(&options.data_dir, session),
            server_url: options.server_url.clone(),
            credential: options.credential.clone(),
            ledger_id: options.ledger_id.clone(),
            ledger_password: options.ledger_password.clone(),
            init_retry: options.init_retry,
            call_retry: options.call_retry,
        }
    }

    /// Removes `session` when it still maps to `connection` and the
    /// connection's state satisfies `predicate`.
    fn remove_if(
        &self,
        session: &SessionId,
        connection: &Arc<Connection>,
        predicate: impl FnOnce(ConnectionState) -> bool,
    ) {
        let mut sessions = self.sessions();
        let owned = sessions.get(session).is_some_and(|current| Arc::ptr_eq(current, connection));
        if owned && predicate(connection.state()) {
            sessions.remove(session);
        }
    }

    /// Records the outcome of a connection close.
    fn record_close(
        &self,
        session: &SessionId,
        outcome: Result<(), BridgeError>,
        reason: CloseReason,
    ) {
        if let Err(error) = outcome {
            self.audit(PoolAuditEvent::TeardownError {
                session_id: session.to_string(),
                message: error.detail(),
            });
        }
        self.audit(PoolAuditEvent::SessionClosed {
            session_id: session.to_string(),
            reason,
        });
    }

    /// Records an audit event.
    fn audit(&self, event: PoolAuditEvent) {
        self.inner.deps.audit.record_pool(&PoolAuditRecord::now(event));
    }
}

/// Counts sessions charged against the cap.
///
/// Connections that have been created but not yet started initializing are
/// counted as initializing.
fn admitted_count(sessions: &HashMap<SessionId, Arc<Connection>>) -> usize {
    sessions.values().filter(|connection| !connection.state().is_terminal()).count()
}

/// Sweeps idle sessions every `interval` until stopped or the pool is dropped.
async fn run_sweeper(pool: Weak<PoolInner>, interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                ConnectionPool { inner }.sweep_idle().await;
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
