// crates/ledger-bridge-core/src/memory.rs
// ============================================================================
// Module: In-Memory Ledger Engine
// Description: Reference ledger engine backed by process memory.
// Purpose: Drive the pool in tests and local demos without an external engine.
// Dependencies: async-trait, serde_json, tokio
// ============================================================================

//! ## Overview
//! [`InMemoryLedgerEngine`] implements the engine traits with shared in-memory
//! ledgers keyed by ledger id. It supports entity CRUD, budget adjustments,
//! and simple `SELECT` queries, counts every lifecycle call, and can inject
//! transient or permanent faults and artificial latency at each entry point.
//!
//! ## Operations
//! - `list {entity}`, `get {entity, id}`: reads.
//! - `create {entity, data}`, `update {entity, id, data}`,
//!   `delete {entity, id}`: mutations.
//! - `budget_adjust {month, category, amount}`: mutation; `budget_get
//!   {month, category}`: read.
//! - `query {query}`: `SELECT` with projection, `LIMIT`, and `OFFSET`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::engine::EngineError;
use crate::engine::EngineErrorKind;
use crate::engine::EngineOpenRequest;
use crate::engine::EngineOperation;
use crate::engine::LedgerEngine;
use crate::engine::LedgerHandle;
use crate::query::parse_query;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Engine entry points that accept injected faults and latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FaultPoint {
    /// [`LedgerEngine::open`].
    Open,
    /// [`LedgerHandle::load_replica`].
    LoadReplica,
    /// [`LedgerHandle::invoke`].
    Invoke,
    /// [`LedgerHandle::synchronize`].
    Synchronize,
    /// [`LedgerHandle::shutdown`].
    Shutdown,
}

impl FaultPoint {
    /// Returns the entry point name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::LoadReplica => "load_replica",
            Self::Invoke => "invoke",
            Self::Synchronize => "synchronize",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Lifecycle counters for the in-memory engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryEngineStats {
    /// Successful `open` calls.
    pub opens: u64,
    /// Successful replica loads.
    pub replicas_loaded: u64,
    /// Successful operation invocations.
    pub invocations: u64,
    /// Successful mutating invocations.
    pub mutations: u64,
    /// Successful synchronizations.
    pub syncs: u64,
    /// Successful shutdowns.
    pub shutdowns: u64,
    /// Handles opened and not yet shut down.
    pub live_handles: u64,
    /// Highest number of concurrently running engine calls observed.
    pub peak_concurrent_calls: u64,
}

/// Data held for one ledger.
#[derive(Debug, Default)]
struct LedgerData {
    /// Entity kind to id to record.
    tables: BTreeMap<String, BTreeMap<String, Value>>,
    /// `month/category` to budgeted amount in minor units.
    budgets: BTreeMap<String, i64>,
    /// Next generated record number.
    next_id: u64,
    /// Mutations applied since the last synchronization.
    unsynced: u64,
}

/// Shared engine state.
#[derive(Debug, Default)]
struct MemoryState {
    /// Ledgers keyed by ledger id.
    ledgers: BTreeMap<String, LedgerData>,
    /// Lifecycle counters.
    stats: MemoryEngineStats,
    /// Working directories passed to `open`, in call order.
    opened_dirs: Vec<PathBuf>,
    /// Remaining injected faults per entry point.
    faults: BTreeMap<FaultPoint, (u32, EngineErrorKind)>,
    /// Artificial latency per entry point.
    delays: BTreeMap<FaultPoint, Duration>,
    /// Engine calls currently running.
    concurrent_calls: u64,
}

impl MemoryState {
    /// Consumes one injected fault for `point`, if any remain.
    fn take_fault(&mut self, point: FaultPoint) -> Option<EngineError> {
        let (remaining, kind) = self.faults.get_mut(&point)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        let message = format!("injected {} failure", point.label());
        Some(match kind {
            EngineErrorKind::Transient => EngineError::transient(message),
            EngineErrorKind::Permanent => EngineError::permanent(message),
        })
    }
}

/// Shared-state reference engine.
#[derive(Clone, Default)]
pub struct InMemoryLedgerEngine {
    /// Engine state shared by every handle.
    state: Arc<Mutex<MemoryState>>,
}

/// Handle bound to one session's working directory.
struct MemoryLedgerHandle {
    /// Engine state shared with the factory.
    state: Arc<Mutex<MemoryState>>,
    /// Ledger loaded by `load_replica`.
    ledger_id: Mutex<Option<String>>,
    /// True once the handle has shut down.
    closed: AtomicBool,
}

/// Tracks one running engine call for peak-concurrency accounting.
struct CallScope {
    /// Engine state shared with the factory.
    state: Arc<Mutex<MemoryState>>,
}

impl CallScope {
    /// Registers a running call.
    fn enter(state: &Arc<Mutex<MemoryState>>) -> Result<Self, EngineError> {
        {
            let mut guard = lock_state(state)?;
            guard.concurrent_calls += 1;
            guard.stats.peak_concurrent_calls =
                guard.stats.peak_concurrent_calls.max(guard.concurrent_calls);
        }
        Ok(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.state.lock() {
            guard.concurrent_calls = guard.concurrent_calls.saturating_sub(1);
        }
    }
}

/// Locks engine state, mapping poisoning to a permanent error.
fn lock_state(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>, EngineError> {
    state.lock().map_err(|_| EngineError::permanent("memory engine state mutex poisoned"))
}

// ============================================================================
// SECTION: Engine Controls
// ============================================================================

impl InMemoryLedgerEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls at `point` fail with `kind`.
    pub fn inject_faults(&self, point: FaultPoint, count: u32, kind: EngineErrorKind) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.insert(point, (count, kind));
        }
    }

    /// Adds artificial latency to every call at `point`.
    pub fn set_delay(&self, point: FaultPoint, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.delays.insert(point, delay);
        }
    }

    /// Returns lifecycle counters.
    #[must_use]
    pub fn stats(&self) -> MemoryEngineStats {
        self.state.lock().map(|state| state.stats).unwrap_or_default()
    }

    /// Returns the working directories passed to `open`, in call order.
    #[must_use]
    pub fn opened_dirs(&self) -> Vec<PathBuf> {
        self.state.lock().map(|state| state.opened_dirs.clone()).unwrap_or_default()
    }

    /// Returns the number of mutations not yet synchronized for a ledger.
    #[must_use]
    pub fn unsynced_mutations(&self, ledger_id: &str) -> u64 {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.ledgers.get(ledger_id).map(|ledger| ledger.unsynced))
            .unwrap_or_default()
    }

    /// Applies the fault and delay configured for `point`.
    async fn enter_point(
        state: &Arc<Mutex<MemoryState>>,
        point: FaultPoint,
    ) -> Result<(), EngineError> {
        let (fault, delay) = {
            let mut guard = lock_state(state)?;
            (guard.take_fault(point), guard.delays.get(&point).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        fault.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl LedgerEngine for InMemoryLedgerEngine {
    async fn open(&self, request: EngineOpenRequest) -> Result<Arc<dyn LedgerHandle>, EngineError> {
        Self::enter_point(&self.state, FaultPoint::Open).await?;
        if request.server_url.trim().is_empty() {
            return Err(EngineError::permanent("server url is required"));
        }
        let mut state = lock_state(&self.state)?;
        state.stats.opens += 1;
        state.stats.live_handles += 1;
        state.opened_dirs.push(request.working_dir);
        drop(state);
        Ok(Arc::new(MemoryLedgerHandle {
            state: Arc::clone(&self.state),
            ledger_id: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// SECTION: Handle
// ============================================================================

impl MemoryLedgerHandle {
    /// Fails when the handle has shut down.
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::permanent("engine handle is closed"));
        }
        Ok(())
    }

    /// Returns the loaded ledger id.
    fn loaded_ledger(&self) -> Result<String, EngineError> {
        self.ledger_id
            .lock()
            .map_err(|_| EngineError::permanent("handle mutex poisoned"))?
            .clone()
            .ok_or_else(|| EngineError::permanent("no ledger replica loaded"))
    }
}

#[async_trait]
impl LedgerHandle for MemoryLedgerHandle {
    async fn load_replica(
        &self,
        ledger_id: &str,
        _password: Option<&str>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let _scope = CallScope::enter(&self.state)?;
        InMemoryLedgerEngine::enter_point(&self.state, FaultPoint::LoadReplica).await?;
        if ledger_id.trim().is_empty() {
            return Err(EngineError::permanent("ledger id is required"));
        }
        {
            let mut state = lock_state(&self.state)?;
            state.ledgers.entry(ledger_id.to_string()).or_default();
            state.stats.replicas_loaded += 1;
        }
        *self.ledger_id.lock().map_err(|_| EngineError::permanent("handle mutex poisoned"))? =
            Some(ledger_id.to_string());
        Ok(())
    }

    async fn invoke(&self, operation: &EngineOperation) -> Result<Value, EngineError> {
        self.ensure_open()?;
        let ledger_id = self.loaded_ledger()?;
        let _scope = CallScope::enter(&self.state)?;
        InMemoryLedgerEngine::enter_point(&self.state, FaultPoint::Invoke).await?;
        let mut guard = lock_state(&self.state)?;
        let state = &mut *guard;
        let ledger = state
            .ledgers
            .get_mut(&ledger_id)
            .ok_or_else(|| EngineError::permanent(format!("ledger {ledger_id} not found")))?;
        let (value, mutated) = apply_operation(ledger, operation)?;
        if mutated {
            ledger.unsynced += 1;
            state.stats.mutations += 1;
        }
        state.stats.invocations += 1;
        drop(guard);
        Ok(value)
    }

    async fn synchronize(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        let ledger_id = self.loaded_ledger()?;
        let _scope = CallScope::enter(&self.state)?;
        InMemoryLedgerEngine::enter_point(&self.state, FaultPoint::Synchronize).await?;
        let mut state = lock_state(&self.state)?;
        if let Some(ledger) = state.ledgers.get_mut(&ledger_id) {
            ledger.unsynced = 0;
        }
        state.stats.syncs += 1;
        drop(state);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut state = lock_state(&self.state)?;
            state.stats.live_handles = state.stats.live_handles.saturating_sub(1);
        }
        InMemoryLedgerEngine::enter_point(&self.state, FaultPoint::Shutdown).await?;
        let mut state = lock_state(&self.state)?;
        state.stats.shutdowns += 1;
        drop(state);
        Ok(())
    }
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Applies one operation; returns the result and whether data changed.
fn apply_operation(
    ledger: &mut LedgerData,
    operation: &EngineOperation,
) -> Result<(Value, bool), EngineError> {
    let args = &operation.arguments;
    match operation.name.as_str() {
        "list" => {
            let entity = string_arg(args, "entity")?;
            let records: Vec<Value> = ledger
                .tables
                .get(entity)
                .map(|table| table.values().cloned().collect())
                .unwrap_or_default();
            Ok((Value::Array(records), false))
        }
        "get" => {
            let entity = string_arg(args, "entity")?;
            let id = string_arg(args, "id")?;
            let record = ledger
                .tables
                .get(entity)
                .and_then(|table| table.get(id))
                .cloned()
                .ok_or_else(|| EngineError::permanent(format!("{entity} {id} not found")))?;
            Ok((record, false))
        }
        "create" => {
            let entity = string_arg(args, "entity")?;
            let mut data = object_arg(args, "data")?;
            let id = if let Some(id) = data.get("id").and_then(Value::as_str) {
                id.to_string()
            } else {
                ledger.next_id += 1;
                format!("{entity}-{}", ledger.next_id)
            };
            data.insert("id".to_string(), Value::String(id.clone()));
            let table = ledger.tables.entry(entity.to_string()).or_default();
            if table.contains_key(&id) {
                return Err(EngineError::permanent(format!("{entity} {id} already exists")));
            }
            table.insert(id.clone(), Value::Object(data));
            Ok((json!({ "id": id }), true))
        }
        "update" => {
            let entity = string_arg(args, "entity")?;
            let id = string_arg(args, "id")?;
            let data = object_arg(args, "data")?;
            let record = ledger
                .tables
                .get_mut(entity)
                .and_then(|table| table.get_mut(id))
                .and_then(Value::as_object_mut)
                .ok_or_else(|| EngineError::permanent(format!("{entity} {id} not found")))?;
            for (key, value) in data {
                if key != "id" {
                    record.insert(key, value);
                }
            }
            Ok((Value::Object(record.clone()), true))
        }
        "delete" => {
            let entity = string_arg(args, "entity")?;
            let id = string_arg(args, "id")?;
            ledger
                .tables
                .get_mut(entity)
                .and_then(|table| table.remove(id))
                .ok_or_else(|| EngineError::permanent(format!("{entity} {id} not found")))?;
            Ok((json!({ "deleted": id }), true))
        }
        "budget_adjust" => {
            let key = budget_key(args)?;
            let amount = args
                .get("amount")
                .and_then(Value::as_i64)
                .ok_or_else(|| EngineError::permanent("missing integer argument `amount`"))?;
            let slot = ledger.budgets.entry(key).or_default();
            *slot = slot
                .checked_add(amount)
                .ok_or_else(|| EngineError::permanent("budget amount overflow"))?;
            Ok((json!({ "budgeted": *slot }), true))
        }
        "budget_get" => {
            let key = budget_key(args)?;
            let budgeted = ledger.budgets.get(&key).copied().unwrap_or_default();
            Ok((json!({ "budgeted": budgeted }), false))
        }
        "query" => {
            let query = string_arg(args, "query")?;
            Ok((run_query(ledger, query)?, false))
        }
        other => Err(EngineError::permanent(format!("unsupported operation `{other}`"))),
    }
}

/// Executes a parsed `SELECT` against ledger tables.
fn run_query(ledger: &LedgerData, query: &str) -> Result<Value, EngineError> {
    let parsed =
        parse_query(query).map_err(|diagnostic| EngineError::permanent(diagnostic.reason))?;
    let rows = ledger
        .tables
        .get(&parsed.table)
        .map(|table| table.values().cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    let offset = parsed.offset.unwrap_or(0);
    let limit = parsed.limit.unwrap_or(usize::MAX);
    let rows: Vec<Value> = rows
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|row| {
            if parsed.select_all || parsed.columns.is_empty() {
                return row;
            }
            let mut projected = Map::new();
            for column in &parsed.columns {
                let value = column
                    .field
                    .split('.')
                    .try_fold(&row, |current, segment| current.get(segment))
                    .cloned()
                    .unwrap_or(Value::Null);
                projected.insert(column.output.clone(), value);
            }
            Value::Object(projected)
        })
        .collect();
    Ok(json!({ "count": rows.len(), "rows": rows }))
}

/// Returns a required string argument.
fn string_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str, EngineError> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| EngineError::permanent(format!("missing string argument `{name}`")))
}

/// Returns a required object argument.
fn object_arg(args: &Value, name: &str) -> Result<Map<String, Value>, EngineError> {
    args.get(name)
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| EngineError::permanent(format!("missing object argument `{name}`")))
}

/// Builds the budget key from `month` and `category` arguments.
fn budget_key(args: &Value) -> Result<String, EngineError> {
    Ok(format!("{}/{}", string_arg(args, "month")?, string_arg(args, "category")?))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
